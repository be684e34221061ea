use crate::{inventory::CreateInstanceRequest, InstanceProvider};
use anyhow::Result;
use gpu_race_common::{classify_create_error, CreateError, CreateErrorKind, Instance};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Provider wrapper used by the race: bounded calls, classified create
/// errors, best-effort deletes.
#[derive(Clone)]
pub struct ProvisioningClient {
    provider: Arc<dyn InstanceProvider>,
    request_timeout: Duration,
}

impl ProvisioningClient {
    pub fn new(provider: Arc<dyn InstanceProvider>, request_timeout: Duration) -> Self {
        Self {
            provider,
            request_timeout,
        }
    }

    pub async fn create_instance(
        &self,
        offer_id: u64,
        disk_size: f64,
        label: &str,
    ) -> Result<String, CreateError> {
        let request = CreateInstanceRequest {
            offer_id,
            disk_size,
            label: label.to_string(),
        };

        match tokio::time::timeout(self.request_timeout, self.provider.create_instance(&request))
            .await
        {
            Ok(Ok(instance_id)) => Ok(instance_id),
            Ok(Err(e)) => {
                let err = classify_create_error(&format!("{:#}", e));
                warn!(
                    "❌ [client] create_instance offer_id={} failed: kind={} message={}",
                    offer_id, err.kind, err.message
                );
                Err(err)
            }
            Err(_) => {
                warn!(
                    "⏱️ [client] create_instance offer_id={} timed out after {:?}",
                    offer_id, self.request_timeout
                );
                Err(CreateError::new(
                    CreateErrorKind::Timeout,
                    format!("create_instance timed out after {:?}", self.request_timeout),
                ))
            }
        }
    }

    pub async fn list_instances(&self) -> Result<Vec<Instance>> {
        match tokio::time::timeout(self.request_timeout, self.provider.list_instances()).await {
            Ok(result) => result,
            Err(_) => Err(anyhow::anyhow!(
                "list_instances timed out after {:?}",
                self.request_timeout
            )),
        }
    }

    /// Best-effort: failures are logged, never returned. Returns true when the
    /// provider confirmed the instance is gone.
    pub async fn delete_instance(&self, instance_id: &str) -> bool {
        match tokio::time::timeout(self.request_timeout, self.provider.delete_instance(instance_id))
            .await
        {
            Ok(Ok(_)) => {
                info!("🗑️ [client] Instance {} deleted", instance_id);
                true
            }
            Ok(Err(e)) => {
                error!(
                    "🚨 [client] ORPHANED INSTANCE {}: delete failed: {:#}",
                    instance_id, e
                );
                false
            }
            Err(_) => {
                error!(
                    "🚨 [client] ORPHANED INSTANCE {}: delete timed out after {:?}",
                    instance_id, self.request_timeout
                );
                false
            }
        }
    }
}
