//! Display-ready view of a race for the UI. Label lookups only.

use gpu_race_common::{Candidate, CandidatePhase, Race, RaceStatus};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct CandidateView {
    pub offer_id: u64,
    pub gpu_name: String,
    pub price_per_hour: f64,
    pub instance_id: Option<String>,
    pub phase: CandidatePhase,
    pub phase_label: &'static str,
    pub progress: u8,
    pub error_message: Option<String>,
    pub status_message: Option<String>,
    pub round: u32,
}

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct RaceView {
    pub race_id: Option<Uuid>,
    pub status: RaceStatus,
    pub status_label: &'static str,
    pub current_round: u32,
    pub max_rounds: u32,
    pub round_label: Option<String>,
    /// Best progress among the candidates still in the race.
    pub progress: u8,
    pub error_message: Option<String>,
    pub candidates: Vec<CandidateView>,
    pub winner: Option<CandidateView>,
}

pub fn phase_label(phase: CandidatePhase) -> &'static str {
    match phase {
        CandidatePhase::Pending => "Na fila",
        CandidatePhase::Creating => "Criando",
        CandidatePhase::Connecting => "Conectando",
        CandidatePhase::Loading => "Carregando",
        CandidatePhase::Running => "Pronta",
        CandidatePhase::Failed => "Falhou",
        CandidatePhase::Cancelled => "Cancelada",
        CandidatePhase::Destroyed => "Removida",
    }
}

pub fn status_label(status: RaceStatus) -> &'static str {
    match status {
        RaceStatus::Idle => "Aguardando",
        RaceStatus::Racing => "Provisionando",
        RaceStatus::Completed => "Máquina pronta",
        RaceStatus::Failed => "Falhou",
        RaceStatus::Cancelled => "Cancelado",
    }
}

pub fn candidate_view(candidate: &Candidate) -> CandidateView {
    CandidateView {
        offer_id: candidate.offer_id,
        gpu_name: candidate.gpu_name.clone(),
        price_per_hour: candidate.price_per_hour,
        instance_id: candidate.instance_id.clone(),
        phase: candidate.phase,
        phase_label: phase_label(candidate.phase),
        progress: candidate.progress,
        error_message: candidate.error_message.clone(),
        status_message: candidate.status_message.clone(),
        round: candidate.round,
    }
}

pub fn race_view(race: &Race) -> RaceView {
    let progress = match race.status {
        RaceStatus::Completed => 100,
        RaceStatus::Racing => race
            .candidates
            .iter()
            .filter(|c| c.is_live())
            .map(|c| c.progress)
            .max()
            .unwrap_or(0),
        _ => 0,
    };
    let round_label = (race.current_round > 0)
        .then(|| format!("Rodada {}/{}", race.current_round, race.max_rounds));

    RaceView {
        race_id: race.race_id,
        status: race.status,
        status_label: status_label(race.status),
        current_round: race.current_round,
        max_rounds: race.max_rounds,
        round_label,
        progress,
        error_message: race.error_message.clone(),
        candidates: race.candidates.iter().map(candidate_view).collect(),
        winner: race.winner.as_ref().map(candidate_view),
    }
}
