//! Storage backends for the state record.
//!
//! A backend stores one opaque document. [`FileBackend`] keeps it as a
//! plain-text file next to the working directory so an operator can read or
//! diff it; [`MemoryBackend`] is for tests.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::error::{StateError, StateResult};

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Whole-document storage. Implementations must make `save` all-or-nothing.
pub trait StateBackend: Send + Sync {
    /// The stored document, or `None` if nothing has been written.
    fn load(&self) -> StateResult<Option<String>>;

    /// Replace the stored document.
    fn save(&self, document: &str) -> StateResult<()>;

    /// Remove the stored document. Returns true if one existed.
    fn discard(&self) -> StateResult<bool>;

    /// Where the document lives, for messages.
    fn location(&self) -> String;
}

/// Document on local disk, replaced atomically via a sibling temp file.
#[derive(Debug, Clone)]
pub struct FileBackend {
    path: PathBuf,
}

impl FileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl StateBackend for FileBackend {
    fn load(&self) -> StateResult<Option<String>> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StateError::Read(format!("{}: {e}", self.path.display()))),
        }
    }

    fn save(&self, document: &str) -> StateResult<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(map_err!(Write))?;
        }
        let tmp = self.temp_path();
        {
            let mut file = fs::File::create(&tmp).map_err(map_err!(Write))?;
            file.write_all(document.as_bytes()).map_err(map_err!(Write))?;
            file.sync_all().map_err(map_err!(Write))?;
        }
        fs::rename(&tmp, &self.path).map_err(map_err!(Write))?;
        debug!(path = %self.path.display(), bytes = document.len(), "state document written");
        Ok(())
    }

    fn discard(&self) -> StateResult<bool> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StateError::Write(e.to_string())),
        }
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }
}

/// In-memory document. Clones share the same slot, so a second store
/// built from a clone sees what the first one wrote (a simulated restart).
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    document: Arc<Mutex<Option<String>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self) -> StateResult<std::sync::MutexGuard<'_, Option<String>>> {
        self.document
            .lock()
            .map_err(|_| StateError::Read("memory backend lock poisoned".to_string()))
    }
}

impl StateBackend for MemoryBackend {
    fn load(&self) -> StateResult<Option<String>> {
        Ok(self.slot()?.clone())
    }

    fn save(&self, document: &str) -> StateResult<()> {
        *self.slot()? = Some(document.to_string());
        Ok(())
    }

    fn discard(&self) -> StateResult<bool> {
        Ok(self.slot()?.take().is_some())
    }

    fn location(&self) -> String {
        "memory".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_backend_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::new(dir.path().join("nested").join("demo.state.json"));

        assert_eq!(backend.load().unwrap(), None);
        backend.save("{\"a\":1}").unwrap();
        assert_eq!(backend.load().unwrap().as_deref(), Some("{\"a\":1}"));

        backend.save("{\"a\":2}").unwrap();
        assert_eq!(backend.load().unwrap().as_deref(), Some("{\"a\":2}"));
        assert!(!backend.temp_path().exists());
    }

    #[test]
    fn file_backend_discard() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::new(dir.path().join("demo.state.json"));
        assert!(!backend.discard().unwrap());
        backend.save("{}").unwrap();
        assert!(backend.discard().unwrap());
        assert_eq!(backend.load().unwrap(), None);
    }

    #[test]
    fn memory_backend_clones_share_document() {
        let a = MemoryBackend::new();
        let b = a.clone();
        a.save("doc").unwrap();
        assert_eq!(b.load().unwrap().as_deref(), Some("doc"));
        assert!(b.discard().unwrap());
        assert_eq!(a.load().unwrap(), None);
    }
}
