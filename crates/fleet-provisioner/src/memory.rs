//! In-process provisioning platform.
//!
//! Behaves like the real platform for the calls the controller makes:
//! mutations are rejected on locked installations, and each mutation moves
//! the installation into the matching "requested" state. Every mutating
//! call is recorded so callers can assert exactly which endpoints ran.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use fleet_core::{Installation, InstallationFilter, LifecycleState};

use crate::Provisioner;
use crate::error::{ProvisionerError, ProvisionerResult};

/// Platform operations, used for failure injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    List,
    Get,
    Status,
    Lock,
    Unlock,
    UpdateSize,
    Hibernate,
    WakeUp,
    Delete,
}

/// A recorded mutating call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Lock(String),
    Unlock(String),
    UpdateSize(String, String),
    Hibernate(String),
    WakeUp(String),
    Delete(String),
}

impl Call {
    /// Whether this call changes the installation itself (not just its lock).
    pub fn is_mutation(&self) -> bool {
        !matches!(self, Self::Lock(_) | Self::Unlock(_))
    }
}

#[derive(Default)]
struct Inner {
    installations: Vec<Installation>,
    /// Scripted gauge readings; the last one repeats.
    updating: VecDeque<u64>,
    status_queries: usize,
    calls: Vec<Call>,
    failures: HashMap<Operation, String>,
}

/// An in-memory provisioning platform.
#[derive(Default)]
pub struct InMemoryProvisioner {
    inner: Mutex<Inner>,
}

impl InMemoryProvisioner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_installations(installations: impl IntoIterator<Item = Installation>) -> Self {
        let platform = Self::new();
        for installation in installations {
            platform.insert(installation);
        }
        platform
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Insert or replace an installation.
    pub fn insert(&self, installation: Installation) {
        let mut inner = self.lock();
        match inner
            .installations
            .iter_mut()
            .find(|i| i.id == installation.id)
        {
            Some(existing) => *existing = installation,
            None => inner.installations.push(installation),
        }
    }

    /// Remove an installation, as if another actor deleted it.
    pub fn remove(&self, id: &str) {
        self.lock().installations.retain(|i| i.id != id);
    }

    pub fn installation(&self, id: &str) -> Option<Installation> {
        self.lock()
            .installations
            .iter()
            .find(|i| i.id == id)
            .cloned()
    }

    /// Set a constant "currently updating" gauge.
    pub fn set_updating(&self, count: u64) {
        self.script_updating([count]);
    }

    /// Script successive gauge readings; the final value repeats.
    pub fn script_updating(&self, readings: impl IntoIterator<Item = u64>) {
        self.lock().updating = readings.into_iter().collect();
    }

    /// Number of gauge reads so far.
    pub fn status_queries(&self) -> usize {
        self.lock().status_queries
    }

    /// Make every call of `operation` fail.
    pub fn fail_on(&self, operation: Operation, message: &str) {
        self.lock().failures.insert(operation, message.to_string());
    }

    pub fn clear_failure(&self, operation: Operation) {
        self.lock().failures.remove(&operation);
    }

    /// All recorded lock/unlock/mutation calls, in order.
    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    /// Recorded calls that changed an installation.
    pub fn mutations(&self) -> Vec<Call> {
        self.calls().into_iter().filter(Call::is_mutation).collect()
    }

    fn check(inner: &Inner, operation: Operation) -> ProvisionerResult<()> {
        match inner.failures.get(&operation) {
            Some(message) => Err(ProvisionerError::Unavailable(message.clone())),
            None => Ok(()),
        }
    }

    /// Apply a mutation to an unlocked installation.
    fn mutate(
        &self,
        operation: Operation,
        id: &str,
        call: Call,
        apply: impl FnOnce(&mut Installation),
    ) -> ProvisionerResult<Installation> {
        let mut inner = self.lock();
        Self::check(&inner, operation)?;
        let installation = inner
            .installations
            .iter_mut()
            .find(|i| i.id == id)
            .ok_or_else(|| ProvisionerError::NotFound(id.to_string()))?;
        if installation.api_security_lock {
            return Err(ProvisionerError::Locked(id.to_string()));
        }
        apply(installation);
        let updated = installation.clone();
        inner.calls.push(call);
        Ok(updated)
    }

    fn set_lock(&self, operation: Operation, id: &str, locked: bool) -> ProvisionerResult<()> {
        let mut inner = self.lock();
        Self::check(&inner, operation)?;
        let installation = inner
            .installations
            .iter_mut()
            .find(|i| i.id == id)
            .ok_or_else(|| ProvisionerError::NotFound(id.to_string()))?;
        installation.api_security_lock = locked;
        let call = if locked {
            Call::Lock(id.to_string())
        } else {
            Call::Unlock(id.to_string())
        };
        inner.calls.push(call);
        Ok(())
    }
}

#[async_trait]
impl Provisioner for InMemoryProvisioner {
    async fn list_installations(
        &self,
        filter: &InstallationFilter,
    ) -> ProvisionerResult<Vec<Installation>> {
        let inner = self.lock();
        Self::check(&inner, Operation::List)?;
        Ok(inner
            .installations
            .iter()
            .filter(|i| i.state != LifecycleState::Deleted && filter.matches(i))
            .cloned()
            .collect())
    }

    async fn get_installation(&self, id: &str) -> ProvisionerResult<Option<Installation>> {
        let inner = self.lock();
        Self::check(&inner, Operation::Get)?;
        Ok(inner.installations.iter().find(|i| i.id == id).cloned())
    }

    async fn installations_updating(&self) -> ProvisionerResult<u64> {
        let mut inner = self.lock();
        Self::check(&inner, Operation::Status)?;
        inner.status_queries += 1;
        let reading = if inner.updating.len() > 1 {
            inner.updating.pop_front()
        } else {
            inner.updating.front().copied()
        };
        Ok(reading.unwrap_or(0))
    }

    async fn lock_api(&self, id: &str) -> ProvisionerResult<()> {
        self.set_lock(Operation::Lock, id, true)
    }

    async fn unlock_api(&self, id: &str) -> ProvisionerResult<()> {
        self.set_lock(Operation::Unlock, id, false)
    }

    async fn update_size(&self, id: &str, size: &str) -> ProvisionerResult<Installation> {
        self.mutate(
            Operation::UpdateSize,
            id,
            Call::UpdateSize(id.to_string(), size.to_string()),
            |i| {
                i.size = size.to_string();
                i.state = LifecycleState::UpdateRequested;
            },
        )
    }

    async fn hibernate(&self, id: &str) -> ProvisionerResult<Installation> {
        self.mutate(Operation::Hibernate, id, Call::Hibernate(id.to_string()), |i| {
            i.state = LifecycleState::HibernationRequested;
        })
    }

    async fn wake_up(&self, id: &str) -> ProvisionerResult<Installation> {
        self.mutate(Operation::WakeUp, id, Call::WakeUp(id.to_string()), |i| {
            i.state = LifecycleState::WakeUpRequested;
        })
    }

    async fn delete(&self, id: &str) -> ProvisionerResult<()> {
        self.mutate(Operation::Delete, id, Call::Delete(id.to_string()), |i| {
            i.state = LifecycleState::DeletionRequested;
        })?;
        Ok(())
    }
}
