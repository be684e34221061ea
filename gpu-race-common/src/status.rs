//! Mapping of raw provider statuses to candidate phase/progress.
//!
//! | raw status                    | phase      | progress              |
//! |-------------------------------|------------|-----------------------|
//! | none yet (before any status)  | creating   | 10                    |
//! | `created`                     | connecting | 20                    |
//! | `loading`                     | loading    | min(previous+10, 85)  |
//! | `running`                     | running    | 100                   |
//! | `exited`/`error`/`destroyed`  | failed     | 0                     |
//! | anything else                 | connecting | unchanged             |
//!
//! Progress of a non-failed candidate never moves backwards: the table value
//! is applied as a floor over the previous progress.

use crate::{Candidate, CandidatePhase};

pub const CREATING_PROGRESS: u8 = 10;
pub const CONNECTING_PROGRESS: u8 = 20;
/// Progress right after the create call returned an instance id.
pub const CREATED_PROGRESS: u8 = 30;
pub const LOADING_STEP: u8 = 10;
pub const LOADING_CAP: u8 = 85;
pub const RUNNING_PROGRESS: u8 = 100;

const FAILED_STATUSES: [&str; 3] = ["exited", "error", "destroyed"];

/// Applies one observed raw status to a candidate. Pure.
///
/// Candidates that already left the race (or already run) are returned unchanged.
pub fn advance(mut candidate: Candidate, raw_status: Option<&str>) -> Candidate {
    if !candidate.is_live() || candidate.phase == CandidatePhase::Running {
        return candidate;
    }

    let Some(raw) = raw_status.map(str::trim).filter(|s| !s.is_empty()) else {
        // "none yet" only applies before anything was observed; a candidate
        // missing from one listing keeps its phase.
        if matches!(candidate.phase, CandidatePhase::Pending | CandidatePhase::Creating) {
            candidate.phase = CandidatePhase::Creating;
            candidate.progress = candidate.progress.max(CREATING_PROGRESS);
        }
        return candidate;
    };

    let status = raw.to_ascii_lowercase();
    match status.as_str() {
        "created" => {
            candidate.phase = CandidatePhase::Connecting;
            candidate.progress = candidate.progress.max(CONNECTING_PROGRESS);
            candidate.status_message = None;
        }
        "loading" => {
            let next = candidate.progress.saturating_add(LOADING_STEP).min(LOADING_CAP);
            candidate.phase = CandidatePhase::Loading;
            candidate.progress = candidate.progress.max(next);
            candidate.status_message = None;
        }
        "running" => {
            candidate.phase = CandidatePhase::Running;
            candidate.progress = RUNNING_PROGRESS;
            candidate.status_message = None;
        }
        s if FAILED_STATUSES.contains(&s) => {
            candidate.fail(format!("Falhou: {}", s));
        }
        _ => {
            candidate.phase = CandidatePhase::Connecting;
            candidate.status_message = Some(raw.to_string());
        }
    }
    candidate
}
