//! Local persistence for the tracked order
//!
//! Only the order id and the absolute confirmation timestamp survive a
//! restart. Everything else is re-fetched from the server, so a
//! restarted client reconciles instead of trusting stale local state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{ClientError, ClientResult};

/// The minimal durable record of an in-flight order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedOrder {
    pub order_id: String,
    pub confirmed_at: DateTime<Utc>,
}

/// Pluggable persistence seam for the tracked order
pub trait LocalStore: Send + Sync {
    fn save(&self, order: &TrackedOrder) -> ClientResult<()>;
    fn load(&self) -> ClientResult<Option<TrackedOrder>>;
    fn clear(&self) -> ClientResult<()>;
}

/// JSON file backing, one file per tracked order slot
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl LocalStore for JsonFileStore {
    fn save(&self, order: &TrackedOrder) -> ClientResult<()> {
        let json = serde_json::to_string_pretty(order)?;
        std::fs::write(&self.path, json)
            .map_err(|e| ClientError::Store(format!("Failed to write {:?}: {}", self.path, e)))
    }

    fn load(&self) -> ClientResult<Option<TrackedOrder>> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(ClientError::Store(format!(
                    "Failed to read {:?}: {}",
                    self.path, e
                )))
            }
        };
        Ok(Some(serde_json::from_str(&contents)?))
    }

    fn clear(&self) -> ClientResult<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ClientError::Store(format!(
                "Failed to remove {:?}: {}",
                self.path, e
            ))),
        }
    }
}
