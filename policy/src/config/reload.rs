//! Atomic model replacement for callers that reload configuration.
//!
//! The replacement model is fully loaded and validated **before** the
//! write lock is taken, so readers either see the old model or the new
//! one, never a partially parsed state. A failed reload keeps the
//! previous valid model in place.

use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use crate::config::error::Result;
use crate::config::loader::ConfigLoader;
use crate::model::PolicyModel;

/// Shared, atomically swappable handle to the current policy model.
///
/// Cloning the handle is cheap; all clones observe the same swaps.
/// `current()` returns a snapshot `Arc`, so in-flight resolutions keep
/// the model they started with even if a reload lands mid-flight.
#[derive(Clone)]
pub struct ModelHandle {
    inner: Arc<RwLock<Arc<PolicyModel>>>,
    path: PathBuf,
}

impl ModelHandle {
    /// Load and validate the file at `path`, producing the initial model.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let model = ConfigLoader::new().with_file(&path).load()?;
        Ok(Self {
            inner: Arc::new(RwLock::new(Arc::new(model))),
            path: path.as_ref().to_path_buf(),
        })
    }

    /// Snapshot of the current model.
    pub fn current(&self) -> Arc<PolicyModel> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Re-read and validate the config file, swapping the model in only
    /// if the whole load succeeds. On error the previous model stays.
    pub fn reload(&self) -> Result<()> {
        let model = ConfigLoader::new().with_file(&self.path).load()?;
        let mut slot = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        *slot = Arc::new(model);
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
