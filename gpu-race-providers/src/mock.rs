use crate::{inventory, InstanceProvider};
use anyhow::Result;
use async_trait::async_trait;
use gpu_race_common::Instance;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// Scripted behaviour of one offer in the mock marketplace.
#[derive(Clone, Debug, Default)]
pub struct OfferScript {
    /// When set, `create_instance` fails with this text.
    pub create_error: Option<String>,
    /// Simulated latency of the create call.
    pub create_latency: Duration,
    /// Raw status reported on the n-th listing after creation. The last entry
    /// repeats; an empty script lists the instance with no status.
    pub statuses: Vec<String>,
}

impl OfferScript {
    pub fn statuses(statuses: &[&str]) -> Self {
        Self {
            statuses: statuses.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            create_error: Some(message.to_string()),
            ..Default::default()
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.create_latency = latency;
        self
    }
}

#[derive(Debug)]
struct MockInstance {
    id: String,
    offer_id: u64,
    label: String,
    listings: usize,
    deleted: bool,
}

#[derive(Debug, Default)]
struct MockState {
    scripts: HashMap<u64, OfferScript>,
    default_script: OfferScript,
    instances: Vec<MockInstance>,
    deleted: Vec<String>,
    create_calls: Vec<u64>,
    list_calls: usize,
    failing_lists: usize,
    list_latency: Duration,
    fail_deletes: bool,
    next_id: u64,
}

/// In-memory marketplace used by tests and by `PROVIDER=mock`.
#[derive(Debug, Default)]
pub struct MockProvider {
    state: Mutex<MockState>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_script(self, offer_id: u64, script: OfferScript) -> Self {
        self.set_script(offer_id, script);
        self
    }

    /// Script for offers without their own.
    pub fn with_default_script(self, script: OfferScript) -> Self {
        self.lock().default_script = script;
        self
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_script(&self, offer_id: u64, script: OfferScript) {
        self.lock().scripts.insert(offer_id, script);
    }

    /// Every following delete fails (the instance stays listed).
    pub fn fail_deletes(&self, fail: bool) {
        self.lock().fail_deletes = fail;
    }

    /// Simulated latency of every listing.
    pub fn set_list_latency(&self, latency: Duration) {
        self.lock().list_latency = latency;
    }

    /// The next `count` listings fail.
    pub fn fail_next_lists(&self, count: usize) {
        self.lock().failing_lists = count;
    }

    /// Offer ids in the order their create calls arrived.
    pub fn create_calls(&self) -> Vec<u64> {
        self.lock().create_calls.clone()
    }

    /// Instance ids in the order they were deleted.
    pub fn deleted(&self) -> Vec<String> {
        self.lock().deleted.clone()
    }

    pub fn list_calls(&self) -> usize {
        self.lock().list_calls
    }

    pub fn instance_for_offer(&self, offer_id: u64) -> Option<String> {
        self.lock()
            .instances
            .iter()
            .rev()
            .find(|i| i.offer_id == offer_id)
            .map(|i| i.id.clone())
    }

    pub fn label_of(&self, instance_id: &str) -> Option<String> {
        self.lock()
            .instances
            .iter()
            .find(|i| i.id == instance_id)
            .map(|i| i.label.clone())
    }

    /// Instances created and not deleted.
    pub fn live_instances(&self) -> Vec<String> {
        self.lock()
            .instances
            .iter()
            .filter(|i| !i.deleted)
            .map(|i| i.id.clone())
            .collect()
    }
}

#[async_trait]
impl InstanceProvider for MockProvider {
    async fn create_instance(&self, request: &inventory::CreateInstanceRequest) -> Result<String> {
        let script = {
            let mut state = self.lock();
            state.create_calls.push(request.offer_id);
            state
                .scripts
                .get(&request.offer_id)
                .unwrap_or(&state.default_script)
                .clone()
        };

        if !script.create_latency.is_zero() {
            tokio::time::sleep(script.create_latency).await;
        }
        if let Some(message) = script.create_error {
            return Err(anyhow::anyhow!(message));
        }

        let mut state = self.lock();
        state.next_id += 1;
        let id = format!("mock-{}", 1000 + state.next_id);
        state.instances.push(MockInstance {
            id: id.clone(),
            offer_id: request.offer_id,
            label: request.label.clone(),
            listings: 0,
            deleted: false,
        });
        Ok(id)
    }

    async fn list_instances(&self) -> Result<Vec<Instance>> {
        let latency = self.lock().list_latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.lock();
        state.list_calls += 1;
        if state.failing_lists > 0 {
            state.failing_lists -= 1;
            return Err(anyhow::anyhow!("mock list_instances failure"));
        }

        let MockState {
            scripts,
            default_script,
            instances,
            ..
        } = &mut *state;
        let mut out = Vec::new();
        for instance in instances.iter_mut().filter(|i| !i.deleted) {
            let statuses = scripts
                .get(&instance.offer_id)
                .unwrap_or(default_script)
                .statuses
                .as_slice();
            let actual_status = statuses
                .get(instance.listings)
                .or_else(|| statuses.last())
                .cloned();
            instance.listings += 1;
            out.push(Instance {
                id: instance.id.clone(),
                actual_status,
                ssh_host: Some("ssh.mock.local".to_string()),
                ssh_port: Some(22000 + (instance.offer_id % 1000) as u16),
                label: Some(instance.label.clone()),
            });
        }
        Ok(out)
    }

    async fn delete_instance(&self, instance_id: &str) -> Result<bool> {
        let mut state = self.lock();
        state.deleted.push(instance_id.to_string());
        if state.fail_deletes {
            return Err(anyhow::anyhow!("mock delete failure for {}", instance_id));
        }
        match state
            .instances
            .iter_mut()
            .find(|i| i.id == instance_id && !i.deleted)
        {
            Some(instance) => {
                instance.deleted = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::CreateInstanceRequest;

    fn request(offer_id: u64) -> CreateInstanceRequest {
        CreateInstanceRequest {
            offer_id,
            disk_size: 50.0,
            label: format!("test-{}", offer_id),
        }
    }

    #[tokio::test]
    async fn scripted_statuses_advance_per_listing() {
        let mock = MockProvider::new()
            .with_script(1, OfferScript::statuses(&["created", "loading", "running"]));
        let id = mock.create_instance(&request(1)).await.unwrap();

        let mut seen = Vec::new();
        for _ in 0..4 {
            let list = mock.list_instances().await.unwrap();
            assert_eq!(list.len(), 1);
            assert_eq!(list[0].id, id);
            seen.push(list[0].actual_status.clone().unwrap());
        }
        assert_eq!(seen, ["created", "loading", "running", "running"]);
        assert_eq!(mock.label_of(&id).as_deref(), Some("test-1"));
    }

    #[tokio::test]
    async fn create_failure_and_delete_bookkeeping() {
        let mock = MockProvider::new().with_script(2, OfferScript::failing("Offer unavailable"));
        let err = mock.create_instance(&request(2)).await.unwrap_err();
        assert!(err.to_string().contains("unavailable"));

        let id = mock.create_instance(&request(3)).await.unwrap();
        assert!(mock.delete_instance(&id).await.unwrap());
        assert!(!mock.delete_instance(&id).await.unwrap());
        assert!(mock.list_instances().await.unwrap().is_empty());
        assert_eq!(mock.create_calls(), vec![2, 3]);
        assert_eq!(mock.deleted(), vec![id.clone(), id]);
    }

    #[tokio::test]
    async fn injected_failures() {
        let mock = MockProvider::new();
        let id = mock.create_instance(&request(4)).await.unwrap();
        mock.fail_next_lists(1);
        assert!(mock.list_instances().await.is_err());
        assert_eq!(mock.list_instances().await.unwrap().len(), 1);

        mock.fail_deletes(true);
        assert!(mock.delete_instance(&id).await.is_err());
        assert_eq!(mock.live_instances(), vec![id]);
    }

    #[tokio::test]
    async fn default_script_applies_to_unscripted_offers() {
        let mock = MockProvider::new()
            .with_default_script(OfferScript::statuses(&["running"]))
            .with_script(6, OfferScript::statuses(&["loading"]));
        mock.create_instance(&request(5)).await.unwrap();
        mock.create_instance(&request(6)).await.unwrap();
        let list = mock.list_instances().await.unwrap();
        assert_eq!(list[0].actual_status.as_deref(), Some("running"));
        assert_eq!(list[1].actual_status.as_deref(), Some("loading"));
    }
}
