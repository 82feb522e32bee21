//! fleet-provisioner — the provisioning platform as seen by the controller.
//!
//! The platform owns installation state and lifecycle; the controller only
//! lists, fetches, locks/unlocks and mutates through the [`Provisioner`]
//! trait.
//!
//! # Components
//!
//! - **`client`** — `HttpProvisioner`, the REST client for a provisioning server
//! - **`memory`** — `InMemoryProvisioner`, a recording in-process platform

pub mod client;
pub mod error;
pub mod memory;

use async_trait::async_trait;
use fleet_core::{Installation, InstallationFilter};

pub use client::HttpProvisioner;
pub use error::{ProvisionerError, ProvisionerResult};
pub use memory::{Call, InMemoryProvisioner, Operation};

/// Capabilities the controller needs from the provisioning platform.
#[async_trait]
pub trait Provisioner: Send + Sync {
    /// List installations matching `filter`, exhausting pagination.
    async fn list_installations(
        &self,
        filter: &InstallationFilter,
    ) -> ProvisionerResult<Vec<Installation>>;

    /// Fetch one installation; `None` if the platform does not know it.
    async fn get_installation(&self, id: &str) -> ProvisionerResult<Option<Installation>>;

    /// Fleet-wide count of installations in a transitional state.
    async fn installations_updating(&self) -> ProvisionerResult<u64>;

    async fn lock_api(&self, id: &str) -> ProvisionerResult<()>;

    async fn unlock_api(&self, id: &str) -> ProvisionerResult<()>;

    async fn update_size(&self, id: &str, size: &str) -> ProvisionerResult<Installation>;

    async fn hibernate(&self, id: &str) -> ProvisionerResult<Installation>;

    async fn wake_up(&self, id: &str) -> ProvisionerResult<Installation>;

    async fn delete(&self, id: &str) -> ProvisionerResult<()>;
}
