use anyhow::Result;
use async_trait::async_trait;
use gpu_race_common::Instance;

pub mod client;

pub use client::ProvisioningClient;

/// Backend operations the provisioning race depends on.
///
/// Errors are returned as free text (`anyhow`); callers that need a typed
/// failure go through [`ProvisioningClient`], which classifies them.
#[async_trait]
pub trait InstanceProvider: Send + Sync {
    /// Rents the offer. Returns the provider instance id.
    async fn create_instance(&self, request: &inventory::CreateInstanceRequest) -> Result<String>;

    /// Every instance owned by the caller, with its current raw status.
    /// One call serves a whole poll tick.
    async fn list_instances(&self) -> Result<Vec<Instance>>;

    /// Returns false when the instance was already gone.
    async fn delete_instance(&self, instance_id: &str) -> Result<bool>;
}

pub mod inventory {
    use serde::Serialize;

    /// Body of `POST /instances`.
    #[derive(Clone, Debug, Serialize, PartialEq)]
    pub struct CreateInstanceRequest {
        pub offer_id: u64,
        pub disk_size: f64,
        pub label: String,
    }
}

#[cfg(feature = "mock")]
pub mod mock;

#[cfg(feature = "http")]
pub mod http;
