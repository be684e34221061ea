//! Provisioning race engine.
//!
//! A race rents several offers in parallel, polls the backend until one of
//! them reports `running`, keeps that one and deletes the rest. When a whole
//! round fails (creation errors, bad statuses or the round timeout) the next
//! batch of offers is raced, up to `max_rounds`.
//!
//! All mutable race state lives behind one mutex owned by the engine; a
//! single driver task runs the rounds. Every state mutation re-checks the race
//! generation and round under the lock, so results that arrive after a
//! winner, a timeout, a cancel or a reset are ignored (and any instance they
//! created is deleted).

use crate::config::RaceConfig;
use crate::scheduler;
use chrono::Utc;
use futures_util::future::join_all;
use gpu_race_common::{advance, Candidate, CandidatePhase, Instance, Offer, Race, RaceStatus};
use gpu_race_providers::ProvisioningClient;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep, sleep_until, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum RaceError {
    #[error("no offers to race")]
    NoOffers,
    #[error("a race is already running")]
    AlreadyRacing,
    #[error("race has not completed with a winner")]
    NotCompleted,
}

struct RaceInner {
    race: Race,
    /// Bumped on every start and reset. Tasks of older races compare against it.
    generation: u64,
    driver: Option<JoinHandle<()>>,
    /// Instances created by the current race and not deleted yet.
    owned: Vec<String>,
}

struct Shared {
    client: ProvisioningClient,
    config: RaceConfig,
    state: Mutex<RaceInner>,
    snapshots: watch::Sender<Race>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, RaceInner> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn publish(&self, inner: &RaceInner) {
        self.snapshots.send_replace(inner.race.clone());
    }

    fn cancel(&self) -> Option<Vec<String>> {
        let mut inner = self.lock();
        let ids = inner.cancel()?;
        self.publish(&inner);
        Some(ids)
    }
}

impl RaceInner {
    fn is_current(&self, generation: u64, round: u32) -> bool {
        self.generation == generation
            && self.race.status == RaceStatus::Racing
            && self.race.current_round == round
    }

    fn release(&mut self, ids: &[String]) {
        self.owned.retain(|id| !ids.contains(id));
    }

    /// Stops the race and marks it cancelled. Returns the instances to delete.
    fn cancel(&mut self) -> Option<Vec<String>> {
        if self.race.status != RaceStatus::Racing {
            return None;
        }
        if let Some(driver) = self.driver.take() {
            driver.abort();
        }
        for candidate in self.race.candidates.iter_mut().filter(|c| c.is_live()) {
            candidate.phase = CandidatePhase::Cancelled;
        }
        self.race.status = RaceStatus::Cancelled;
        self.race.finished_at = Some(Utc::now());
        Some(std::mem::take(&mut self.owned))
    }
}

fn spawn_deletes(client: &ProvisioningClient, ids: Vec<String>) {
    for id in ids {
        let client = client.clone();
        tokio::spawn(async move {
            client.delete_instance(&id).await;
        });
    }
}

/// Owns one race at a time. Cheap to share behind an `Arc`.
pub struct RaceEngine {
    shared: Arc<Shared>,
}

impl RaceEngine {
    pub fn new(client: ProvisioningClient, config: RaceConfig) -> Self {
        let (snapshots, _) = watch::channel(Race::idle(config.max_rounds));
        let inner = RaceInner {
            race: Race::idle(config.max_rounds),
            generation: 0,
            driver: None,
            owned: Vec::new(),
        };
        Self {
            shared: Arc::new(Shared {
                client,
                config,
                state: Mutex::new(inner),
                snapshots,
            }),
        }
    }

    pub fn config(&self) -> &RaceConfig {
        &self.shared.config
    }

    pub fn snapshot(&self) -> Race {
        self.shared.snapshots.borrow().clone()
    }

    /// Receives a new snapshot after every state change.
    pub fn subscribe(&self) -> watch::Receiver<Race> {
        self.shared.snapshots.subscribe()
    }

    /// Resolves once the race is no longer `racing`.
    pub async fn wait_until_settled(&self) -> Race {
        let mut rx = self.subscribe();
        let settled = match rx.wait_for(|race| race.status != RaceStatus::Racing).await {
            Ok(race) => Some(race.clone()),
            Err(_) => None,
        };
        settled.unwrap_or_else(|| self.snapshot())
    }

    /// Starts racing `offers` (already ranked, best first).
    ///
    /// Rejected while a race is running. A finished race is reset first.
    pub async fn start_race(&self, offers: Vec<Offer>) -> Result<(), RaceError> {
        if offers.is_empty() {
            warn!("⚠️ [race] start_race called without offers");
            return Err(RaceError::NoOffers);
        }

        let status = self.shared.lock().race.status;
        if status == RaceStatus::Racing {
            warn!("⚠️ [race] start_race rejected: a race is already running");
            return Err(RaceError::AlreadyRacing);
        }
        if status.is_terminal() {
            self.reset().await;
        }

        let mut inner = self.shared.lock();
        // Another start may have slipped in while resetting.
        if inner.race.status == RaceStatus::Racing {
            return Err(RaceError::AlreadyRacing);
        }
        inner.generation += 1;
        let generation = inner.generation;
        let race_id = Uuid::new_v4();
        inner.race = Race {
            race_id: Some(race_id),
            status: RaceStatus::Racing,
            started_at: Some(Utc::now()),
            ..Race::idle(self.shared.config.max_rounds)
        };
        info!(
            "🏁 [race] Race {} started: {} offer(s), {} per round, max {} round(s)",
            race_id,
            offers.len(),
            self.shared.config.max_candidates,
            self.shared.config.max_rounds
        );
        self.shared.publish(&inner);

        let shared = self.shared.clone();
        inner.driver = Some(tokio::spawn(run_race(shared, generation, race_id, offers)));
        Ok(())
    }

    /// Stops the race and deletes every instance it created. No-op unless
    /// racing; safe to call repeatedly.
    pub async fn cancel_race(&self) {
        let cancelled = self.shared.cancel();
        let Some(ids) = cancelled else {
            debug!("[race] cancel_race ignored: not racing");
            return;
        };
        info!("🛑 [race] Race cancelled, deleting {} instance(s)", ids.len());
        join_all(ids.iter().map(|id| self.shared.client.delete_instance(id))).await;
    }

    /// Hands the winner over to the caller. The engine makes no further
    /// provider calls for it.
    pub fn complete_race(&self) -> Result<Candidate, RaceError> {
        let mut inner = self.shared.lock();
        let winner = match (inner.race.status, inner.race.winner.clone()) {
            (RaceStatus::Completed, Some(winner)) => winner,
            _ => return Err(RaceError::NotCompleted),
        };
        // From here on the instance belongs to the caller.
        if let Some(id) = &winner.instance_id {
            inner.release(std::slice::from_ref(id));
        }
        inner.driver = None;
        info!(
            "🤝 [race] Winner acknowledged: offer_id={} instance_id={:?}",
            winner.offer_id, winner.instance_id
        );
        Ok(winner)
    }

    /// Back to `idle`. A running race is cancelled first, and instances the
    /// race still owns (other than the winner's) are deleted.
    pub async fn reset(&self) {
        self.cancel_race().await;

        let leftovers = {
            let mut inner = self.shared.lock();
            let winner_id = inner.race.winner.as_ref().and_then(|w| w.instance_id.clone());
            let mut owned = std::mem::take(&mut inner.owned);
            owned.retain(|id| Some(id) != winner_id.as_ref());
            if let Some(driver) = inner.driver.take() {
                driver.abort();
            }
            inner.generation += 1;
            inner.race = Race::idle(self.shared.config.max_rounds);
            self.shared.publish(&inner);
            owned
        };

        if !leftovers.is_empty() {
            warn!(
                "⚠️ [race] reset found {} undeleted instance(s), deleting",
                leftovers.len()
            );
            join_all(leftovers.iter().map(|id| self.shared.client.delete_instance(id))).await;
        }
        debug!("[race] Engine reset to idle");
    }
}

impl Drop for RaceEngine {
    fn drop(&mut self) {
        let Some(ids) = self.shared.cancel() else {
            return;
        };
        warn!(
            "🛑 [race] Engine dropped mid-race, deleting {} instance(s)",
            ids.len()
        );
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                for id in ids {
                    let client = self.shared.client.clone();
                    handle.spawn(async move {
                        client.delete_instance(&id).await;
                    });
                }
            }
            Err(_) if ids.is_empty() => {}
            Err(_) => error!(
                "🚨 [race] ORPHANED INSTANCES {:?}: no runtime left to delete them",
                ids
            ),
        }
    }
}

enum RoundOutcome {
    Won,
    AllFailed,
    /// The race moved on without this round (cancel, reset).
    Stale,
}

async fn run_race(shared: Arc<Shared>, generation: u64, race_id: Uuid, offers: Vec<Offer>) {
    let batch_size = shared.config.max_candidates;
    let mut round = 1;
    loop {
        let batch = scheduler::next_batch(&offers, round, batch_size);
        if batch.is_empty() || !begin_round(&shared, generation, round, batch) {
            break;
        }
        match run_round(&shared, generation, race_id, round, batch).await {
            RoundOutcome::Won | RoundOutcome::Stale => return,
            RoundOutcome::AllFailed => {}
        }
        if !scheduler::has_more_rounds(&offers, round, batch_size, shared.config.max_rounds) {
            break;
        }
        info!("🔁 [race] Round {} failed, moving to round {}", round, round + 1);
        round += 1;
    }
    finish_failed(&shared, generation, round);
}

fn begin_round(shared: &Shared, generation: u64, round: u32, batch: &[Offer]) -> bool {
    let mut inner = shared.lock();
    if inner.generation != generation || inner.race.status != RaceStatus::Racing {
        return false;
    }
    inner.race.current_round = round;
    inner.race.candidates = batch.iter().map(|o| Candidate::from_offer(o, round)).collect();
    shared.publish(&inner);
    info!(
        "🎯 [race] Round {}/{}: racing {} offer(s) {:?}",
        round,
        inner.race.max_rounds,
        batch.len(),
        batch.iter().map(|o| o.id).collect::<Vec<_>>()
    );
    true
}

async fn run_round(
    shared: &Arc<Shared>,
    generation: u64,
    race_id: Uuid,
    round: u32,
    batch: &[Offer],
) -> RoundOutcome {
    let config = &shared.config;
    let deadline = Instant::now() + config.timeout;
    let race_prefix: String = race_id.simple().to_string().chars().take(8).collect();

    let mut creates = Vec::with_capacity(batch.len());
    for (index, offer) in batch.iter().enumerate() {
        if index > 0 && !config.create_delay.is_zero() {
            sleep(config.create_delay).await;
        }
        {
            let mut inner = shared.lock();
            if !inner.is_current(generation, round) {
                return RoundOutcome::Stale;
            }
            if let Some(candidate) = inner.race.candidates.get_mut(index) {
                *candidate = advance(candidate.clone(), None);
            }
            shared.publish(&inner);
        }
        let label = format!("race-{}-r{}-{}", race_prefix, round, offer.id);
        creates.push(tokio::spawn(create_candidate(
            shared.clone(),
            generation,
            round,
            index,
            offer.id,
            config.disk_size_for(offer),
            label,
        )));
    }

    // Create tasks outlive this future: late results clean up after themselves.
    if tokio::time::timeout_at(deadline, join_all(creates)).await.is_err() {
        return time_out_round(shared, generation, round);
    }

    {
        let inner = shared.lock();
        if !inner.is_current(generation, round) {
            return RoundOutcome::Stale;
        }
        if !inner.race.candidates.iter().any(|c| c.is_live()) {
            warn!("❌ [race] Round {}: every create failed", round);
            return RoundOutcome::AllFailed;
        }
    }

    let start = Instant::now() + config.poll_interval;
    let mut ticker = tokio::time::interval_at(start, config.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = sleep_until(deadline) => return time_out_round(shared, generation, round),
            _ = ticker.tick() => {}
        }

        let listing = tokio::time::timeout_at(deadline, shared.client.list_instances()).await;
        let instances = match listing {
            Err(_) => return time_out_round(shared, generation, round),
            Ok(Ok(instances)) => instances,
            Ok(Err(e)) => {
                warn!("⚠️ [race] Poll failed, skipping tick: {:#}", e);
                continue;
            }
        };

        match apply_poll(shared, generation, round, &instances) {
            PollResult::Continue => {}
            PollResult::Won => return RoundOutcome::Won,
            PollResult::AllFailed => return RoundOutcome::AllFailed,
            PollResult::Stale => return RoundOutcome::Stale,
        }
    }
}

enum CreateAction {
    Recorded,
    Failed,
    /// The candidate's round is over: the new instance must go.
    DeleteLate(String),
    Ignored,
}

async fn create_candidate(
    shared: Arc<Shared>,
    generation: u64,
    round: u32,
    index: usize,
    offer_id: u64,
    disk_size: f64,
    label: String,
) {
    let result = shared.client.create_instance(offer_id, disk_size, &label).await;

    let action = {
        let mut inner = shared.lock();
        let accepting = inner.is_current(generation, round)
            && inner
                .race
                .candidates
                .get(index)
                .map(|c| c.offer_id == offer_id && c.phase == CandidatePhase::Creating)
                .unwrap_or(false);

        match result {
            Ok(instance_id) if accepting => {
                inner.race.candidates[index].record_instance(&instance_id);
                inner.owned.push(instance_id.clone());
                shared.publish(&inner);
                info!(
                    "✅ [race] Offer {} rented: instance_id={}",
                    offer_id, instance_id
                );
                CreateAction::Recorded
            }
            Ok(instance_id) => CreateAction::DeleteLate(instance_id),
            Err(err) if accepting => {
                warn!(
                    "❌ [race] Offer {} failed to create: kind={} message={}",
                    offer_id, err.kind, err.message
                );
                inner.race.candidates[index].fail(err.display_message());
                shared.publish(&inner);
                CreateAction::Failed
            }
            Err(err) => {
                debug!(
                    "[race] Ignoring late create failure for offer {}: {}",
                    offer_id, err
                );
                CreateAction::Ignored
            }
        }
    };

    if let CreateAction::DeleteLate(instance_id) = action {
        warn!(
            "⚠️ [race] Instance {} for offer {} arrived after its round ended, deleting",
            instance_id, offer_id
        );
        shared.client.delete_instance(&instance_id).await;
    }
}

enum PollResult {
    Continue,
    Won,
    AllFailed,
    Stale,
}

fn apply_poll(shared: &Shared, generation: u64, round: u32, instances: &[Instance]) -> PollResult {
    let mut inner = shared.lock();
    // Also the winner guard: a completed race is no longer current.
    if !inner.is_current(generation, round) {
        return PollResult::Stale;
    }

    let by_id: HashMap<&str, &Instance> = instances.iter().map(|i| (i.id.as_str(), i)).collect();
    let mut winner_index = None;
    let mut failed = Vec::new();
    for (index, candidate) in inner.race.candidates.iter_mut().enumerate() {
        if !candidate.is_live() {
            continue;
        }
        let Some(instance_id) = candidate.instance_id.clone() else {
            continue;
        };
        let raw_status = by_id
            .get(instance_id.as_str())
            .and_then(|i| i.actual_status.as_deref());
        *candidate = advance(candidate.clone(), raw_status);

        match candidate.phase {
            CandidatePhase::Running => {
                winner_index = Some(index);
                break;
            }
            CandidatePhase::Failed => {
                warn!(
                    "❌ [race] Offer {} instance {} failed: {}",
                    candidate.offer_id,
                    instance_id,
                    candidate.error_message.as_deref().unwrap_or_default()
                );
                failed.push(instance_id);
            }
            _ => {}
        }
    }

    inner.release(&failed);
    spawn_deletes(&shared.client, failed);

    let Some(winner_index) = winner_index else {
        shared.publish(&inner);
        if inner.race.candidates.iter().any(|c| c.is_live()) {
            return PollResult::Continue;
        }
        warn!("❌ [race] Round {}: every instance failed", round);
        return PollResult::AllFailed;
    };

    let mut losers = Vec::new();
    for (index, candidate) in inner.race.candidates.iter_mut().enumerate() {
        if index == winner_index || !candidate.is_live() {
            continue;
        }
        match &candidate.instance_id {
            Some(id) => {
                losers.push(id.clone());
                candidate.phase = CandidatePhase::Destroyed;
            }
            None => candidate.phase = CandidatePhase::Cancelled,
        }
    }
    inner.release(&losers);

    let winner = inner.race.candidates[winner_index].clone();
    info!(
        "🏆 [race] Winner: offer_id={} instance_id={:?} (round {}), deleting {} loser(s)",
        winner.offer_id,
        winner.instance_id,
        round,
        losers.len()
    );
    inner.race.winner = Some(winner);
    inner.race.status = RaceStatus::Completed;
    inner.race.finished_at = Some(Utc::now());
    shared.publish(&inner);
    drop(inner);

    spawn_deletes(&shared.client, losers);
    PollResult::Won
}

fn time_out_round(shared: &Shared, generation: u64, round: u32) -> RoundOutcome {
    let mut inner = shared.lock();
    if !inner.is_current(generation, round) {
        return RoundOutcome::Stale;
    }
    let mut ids = Vec::new();
    for candidate in inner.race.candidates.iter_mut().filter(|c| c.is_live()) {
        if let Some(id) = &candidate.instance_id {
            ids.push(id.clone());
        }
        candidate.fail("Timeout");
    }
    inner.release(&ids);
    shared.publish(&inner);
    drop(inner);

    warn!(
        "⏱️ [race] Round {} timed out after {:?}, deleting {} instance(s)",
        round,
        shared.config.timeout,
        ids.len()
    );
    spawn_deletes(&shared.client, ids);
    RoundOutcome::AllFailed
}

fn finish_failed(shared: &Shared, generation: u64, round: u32) {
    let mut inner = shared.lock();
    if inner.generation != generation || inner.race.status != RaceStatus::Racing {
        return;
    }

    let mut reasons: Vec<&str> = Vec::new();
    for message in inner.race.candidates.iter().filter_map(|c| c.error_message.as_deref()) {
        if !reasons.contains(&message) {
            reasons.push(message);
        }
    }
    let mut message = format!("Nenhuma máquina ficou pronta após {} rodada(s)", round);
    if !reasons.is_empty() {
        message = format!("{}: {}", message, reasons.join("; "));
    }

    error!("💥 [race] Race failed: {}", message);
    inner.race.status = RaceStatus::Failed;
    inner.race.error_message = Some(message);
    inner.race.finished_at = Some(Utc::now());
    inner.driver = None;
    let leftovers = std::mem::take(&mut inner.owned);
    shared.publish(&inner);
    drop(inner);

    spawn_deletes(&shared.client, leftovers);
}
