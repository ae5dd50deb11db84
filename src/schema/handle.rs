//! Atomically swappable schema model.

use std::sync::{Arc, RwLock};

use super::SchemaModel;

/// A schema model paired with the version it was installed under.
#[derive(Debug, Clone)]
pub struct SchemaSnapshot {
    pub version: u64,
    pub model: Arc<SchemaModel>,
}

/// Holds the current schema model. Readers take a cheap snapshot; a refresh
/// replaces the model whole, so no reader ever sees a half-updated schema.
#[derive(Debug)]
pub struct SchemaHandle {
    current: RwLock<SchemaSnapshot>,
}

impl SchemaHandle {
    pub fn new(model: SchemaModel) -> Self {
        Self {
            current: RwLock::new(SchemaSnapshot {
                version: 1,
                model: Arc::new(model),
            }),
        }
    }

    pub fn current(&self) -> SchemaSnapshot {
        match self.current.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn version(&self) -> u64 {
        self.current().version
    }

    /// Install a new model and return its version.
    pub fn replace(&self, model: SchemaModel) -> u64 {
        let mut guard = match self.current.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let version = guard.version + 1;
        *guard = SchemaSnapshot {
            version,
            model: Arc::new(model),
        };
        version
    }
}
