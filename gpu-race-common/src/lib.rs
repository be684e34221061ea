use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

pub mod errors;
pub mod status;

pub use errors::{classify_create_error, CreateError, CreateErrorKind};
pub use status::advance;

// --- Enums ---

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CandidatePhase {
    Pending,    // Waiting for its create call to be dispatched
    Creating,   // Create sent, no status observed yet
    Connecting, // Instance exists at the provider
    Loading,    // Provider reports the image is loading
    Running,    // Usable: winning condition
    Failed,     // Create error, bad status or round timeout
    Cancelled,  // Race cancelled or lost before an instance existed
    Destroyed,  // Lost the race, instance deleted
}

impl CandidatePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            CandidatePhase::Pending => "pending",
            CandidatePhase::Creating => "creating",
            CandidatePhase::Connecting => "connecting",
            CandidatePhase::Loading => "loading",
            CandidatePhase::Running => "running",
            CandidatePhase::Failed => "failed",
            CandidatePhase::Cancelled => "cancelled",
            CandidatePhase::Destroyed => "destroyed",
        }
    }

    /// Still taking part in the race.
    pub fn is_live(&self) -> bool {
        !matches!(
            self,
            CandidatePhase::Failed | CandidatePhase::Cancelled | CandidatePhase::Destroyed
        )
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RaceStatus {
    Idle,
    Racing,
    Completed,
    Failed,
    Cancelled,
}

impl RaceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RaceStatus::Idle => "idle",
            RaceStatus::Racing => "racing",
            RaceStatus::Completed => "completed",
            RaceStatus::Failed => "failed",
            RaceStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RaceStatus::Completed | RaceStatus::Failed | RaceStatus::Cancelled
        )
    }
}

// --- Wire shapes ---

/// A marketplace listing. Only `id` and `disk_space_gb` matter to the race;
/// the rest is carried along for display.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Offer {
    pub id: u64,
    #[serde(default)]
    pub gpu_name: String,
    #[serde(default)]
    pub num_gpus: u32,
    #[serde(default)]
    pub gpu_ram_gb: f64,
    #[serde(default, alias = "dph_total")]
    pub price_per_hour: f64,
    #[serde(default)]
    pub reliability: f64,
    #[serde(default, alias = "disk_space")]
    pub disk_space_gb: Option<f64>,
}

impl Offer {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            gpu_name: String::new(),
            num_gpus: 1,
            gpu_ram_gb: 0.0,
            price_per_hour: 0.0,
            reliability: 0.0,
            disk_space_gb: None,
        }
    }
}

/// One row of `GET /instances`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Instance {
    #[serde(alias = "instance_id", deserialize_with = "deserialize_instance_id")]
    pub id: String,
    #[serde(default)]
    pub actual_status: Option<String>,
    #[serde(default)]
    pub ssh_host: Option<String>,
    #[serde(default)]
    pub ssh_port: Option<u16>,
    #[serde(default)]
    pub label: Option<String>,
}

/// Backends return instance ids either as JSON numbers or strings.
pub fn instance_id_from_value(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn deserialize_instance_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    instance_id_from_value(&value)
        .ok_or_else(|| serde::de::Error::custom(format!("invalid instance id: {}", value)))
}

// --- Race entities ---

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Candidate {
    pub offer_id: u64,
    pub gpu_name: String,
    pub price_per_hour: f64,
    pub instance_id: Option<String>,
    pub phase: CandidatePhase,
    pub progress: u8,
    pub error_message: Option<String>,
    pub status_message: Option<String>,
    pub round: u32,
}

impl Candidate {
    pub fn from_offer(offer: &Offer, round: u32) -> Self {
        Self {
            offer_id: offer.id,
            gpu_name: offer.gpu_name.clone(),
            price_per_hour: offer.price_per_hour,
            instance_id: None,
            phase: CandidatePhase::Pending,
            progress: 0,
            error_message: None,
            status_message: None,
            round,
        }
    }

    pub fn is_live(&self) -> bool {
        self.phase.is_live()
    }

    /// Records the provider instance id once. A second call is ignored and returns false.
    pub fn record_instance(&mut self, instance_id: &str) -> bool {
        if self.instance_id.is_some() {
            return false;
        }
        self.instance_id = Some(instance_id.to_string());
        self.phase = CandidatePhase::Connecting;
        self.progress = self.progress.max(status::CREATED_PROGRESS);
        true
    }

    pub fn fail(&mut self, message: impl Into<String>) {
        self.phase = CandidatePhase::Failed;
        self.progress = 0;
        self.error_message = Some(message.into());
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Race {
    pub race_id: Option<Uuid>,
    pub status: RaceStatus,
    pub current_round: u32,
    pub max_rounds: u32,
    pub candidates: Vec<Candidate>,
    pub winner: Option<Candidate>,
    pub error_message: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Race {
    pub fn idle(max_rounds: u32) -> Self {
        Self {
            race_id: None,
            status: RaceStatus::Idle,
            current_round: 0,
            max_rounds,
            candidates: Vec::new(),
            winner: None,
            error_message: None,
            started_at: None,
            finished_at: None,
        }
    }
}
