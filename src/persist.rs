use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::{debug, warn};

use crate::engine::QueueState;

const APP_DIR: &str = "mailsweep";
const STATE_FILE: &str = "queue_state.json";

/// Durable slot for the serialized queue state.
///
/// All failures degrade to "no persisted state": a missing or corrupt blob is
/// never an error, and a failed write never interrupts triage.
pub trait StateStore: Send + Sync {
    fn load(&self) -> Option<QueueState>;
    fn save(&self, state: &QueueState);
    fn clear(&self);
}

/// JSON file store under the platform config directory.
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Store at the conventional per-user location.
    pub fn at_default_location() -> Option<Self> {
        Some(Self::new(
            dirs::config_dir()?.join(APP_DIR).join(STATE_FILE),
        ))
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

impl StateStore for FileStore {
    fn load(&self) -> Option<QueueState> {
        let content = fs::read_to_string(&self.path).ok()?;
        match serde_json::from_str(&content) {
            Ok(state) => Some(state),
            Err(err) => {
                warn!("discarding unreadable queue state at {:?}: {err}", self.path);
                None
            }
        }
    }

    fn save(&self, state: &QueueState) {
        if let Some(parent) = self.path.parent()
            && let Err(err) = fs::create_dir_all(parent)
        {
            warn!("cannot create state directory {parent:?}: {err}");
            return;
        }
        match serde_json::to_string(state) {
            Ok(json) => {
                if let Err(err) = fs::write(&self.path, json) {
                    warn!("failed to persist queue state: {err}");
                } else {
                    debug!("persisted queue state ({} groups)", state.groups.len());
                }
            }
            Err(err) => warn!("failed to serialize queue state: {err}"),
        }
    }

    fn clear(&self) {
        let _ = fs::remove_file(&self.path);
    }
}

/// In-memory store, for tests and hosts without a filesystem slot.
///
/// Holds the serialized blob rather than the state itself, mirroring what a
/// real key-value slot would round-trip.
#[derive(Default)]
pub struct MemoryStore {
    slot: Mutex<Option<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for MemoryStore {
    fn load(&self) -> Option<QueueState> {
        let guard = self.slot.lock().ok()?;
        serde_json::from_str(guard.as_ref()?).ok()
    }

    fn save(&self, state: &QueueState) {
        if let (Ok(mut guard), Ok(json)) = (self.slot.lock(), serde_json::to_string(state)) {
            *guard = Some(json);
        }
    }

    fn clear(&self) {
        if let Ok(mut guard) = self.slot.lock() {
            *guard = None;
        }
    }
}
