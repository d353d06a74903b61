//! StateStore: the single mutation path for a deployment's progress record.
//!
//! Every change is a read-modify-write of the whole record: load, apply a
//! closure, check the transition rules against the loaded copy, write the
//! whole record back. Partial in-place edits are impossible by construction.
//! Each write logs one progress line per changed key on the
//! `landfall::audit` target.

use std::path::Path;
use std::sync::{Arc, Mutex};

use tracing::{debug, info};

use crate::backend::{FileBackend, MemoryBackend, StateBackend};
use crate::error::{StateError, StateResult};
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Handle to one deployment's state record.
///
/// Cloning is cheap; clones share the backend and the write lock.
#[derive(Clone)]
pub struct StateStore {
    backend: Arc<dyn StateBackend>,
    write_lock: Arc<Mutex<()>>,
}

impl StateStore {
    pub fn new(backend: impl StateBackend + 'static) -> Self {
        Self {
            backend: Arc::new(backend),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Store backed by a JSON file at `path`.
    pub fn open_file(path: &Path) -> Self {
        debug!(?path, "state store opened");
        Self::new(FileBackend::new(path))
    }

    /// Ephemeral store (for testing).
    pub fn open_in_memory() -> Self {
        Self::new(MemoryBackend::new())
    }

    pub fn location(&self) -> String {
        self.backend.location()
    }

    pub fn exists(&self) -> StateResult<bool> {
        Ok(self.backend.load()?.is_some())
    }

    /// Create a fresh record. Fails if one already exists.
    pub fn initialize(&self, deployment: &str, required_endpoint_count: u32) -> StateResult<DeploymentState> {
        let _guard = self.lock()?;
        if self.backend.load()?.is_some() {
            return Err(StateError::AlreadyInitialized(self.location()));
        }
        self.create(deployment, required_endpoint_count)
    }

    /// Discard any existing record and create a fresh one.
    pub fn reset(&self, deployment: &str, required_endpoint_count: u32) -> StateResult<DeploymentState> {
        let _guard = self.lock()?;
        if self.backend.discard()? {
            info!(target: "landfall::audit", %deployment, location = %self.location(), "previous state discarded");
        }
        self.create(deployment, required_endpoint_count)
    }

    /// Remove the record. Returns true if one existed.
    pub fn discard(&self) -> StateResult<bool> {
        let _guard = self.lock()?;
        self.backend.discard()
    }

    /// Load the whole record.
    pub fn load(&self) -> StateResult<DeploymentState> {
        let document = self
            .backend
            .load()?
            .ok_or_else(|| StateError::NotInitialized(self.location()))?;
        serde_json::from_str(&document).map_err(map_err!(Deserialize))
    }

    pub fn get(&self, key: &str) -> StateResult<StateValue> {
        self.load()?
            .get(key)
            .ok_or_else(|| StateError::NotFound(key.to_string()))
    }

    /// Replace one field through a whole-record rewrite.
    pub fn set(&self, key: &str, value: impl Into<StateValue>) -> StateResult<DeploymentState> {
        let value = value.into();
        self.update(|state| state.apply(key, value))
    }

    /// Evaluate the completion invariant without changing anything.
    pub fn is_complete(&self) -> StateResult<bool> {
        Ok(self.load()?.is_complete())
    }

    /// Load, mutate, validate, and write back the whole record.
    ///
    /// If `f` fails or the result breaks a transition rule, nothing is
    /// written.
    pub fn update<F>(&self, f: F) -> StateResult<DeploymentState>
    where
        F: FnOnce(&mut DeploymentState) -> StateResult<()>,
    {
        let _guard = self.lock()?;
        let prev = self.load()?;
        let mut next = prev.clone();
        f(&mut next)?;
        next.check_transition(&prev)?;

        if next == prev {
            return Ok(next);
        }
        next.updated_at = epoch_secs();
        self.write(&next)?;
        audit(&prev, &next);
        Ok(next)
    }

    fn create(&self, deployment: &str, required_endpoint_count: u32) -> StateResult<DeploymentState> {
        let state = DeploymentState::new(deployment, required_endpoint_count);
        state.check_counts()?;
        self.write(&state)?;
        info!(
            target: "landfall::audit",
            %deployment,
            required_endpoint_count,
            location = %self.location(),
            "deployment state initialized"
        );
        Ok(state)
    }

    fn write(&self, state: &DeploymentState) -> StateResult<()> {
        let mut document = serde_json::to_string_pretty(state).map_err(map_err!(Serialize))?;
        document.push('\n');
        self.backend.save(&document)
    }

    fn lock(&self) -> StateResult<std::sync::MutexGuard<'_, ()>> {
        self.write_lock
            .lock()
            .map_err(|_| StateError::Write("state lock poisoned".to_string()))
    }
}

/// One progress line per changed key.
fn audit(prev: &DeploymentState, next: &DeploymentState) {
    let before = prev.entries();
    let after = next.entries();
    for (key, value) in &after {
        match before.get(key) {
            Some(old) if old == value => {}
            Some(old) => info!(
                target: "landfall::audit",
                deployment = %next.deployment,
                "{key}: {old} -> {value}"
            ),
            None => info!(
                target: "landfall::audit",
                deployment = %next.deployment,
                "{key} = {value}"
            ),
        }
    }
    for key in before.keys().filter(|k| !after.contains_key(*k)) {
        info!(target: "landfall::audit", deployment = %next.deployment, "{key} cleared");
    }
}
