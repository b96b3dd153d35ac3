use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::Config;
use crate::defense::DefensiveTradeState;

/// Crash-recovery snapshot of the defensive state machine: live states are
/// written periodically, closed states appended to an archive list.
pub struct DefenseArchive {
    live_file: Option<PathBuf>,
    closed_file: Option<PathBuf>,
}

impl DefenseArchive {
    pub fn new(cfg: &Config) -> Self {
        let dir = Path::new(&cfg.data_dir);
        Self {
            live_file: Some(dir.join("defense_live.json")),
            closed_file: Some(dir.join("defense_closed.json")),
        }
    }

    pub fn in_memory() -> Self {
        Self {
            live_file: None,
            closed_file: None,
        }
    }

    /// Persist the current live states (full replace) and append any newly
    /// closed states to the archive.
    pub fn snapshot(&self, live: Vec<&DefensiveTradeState>, newly_closed: &[DefensiveTradeState]) {
        let Some(ref live_file) = self.live_file else {
            return;
        };
        if let Some(parent) = live_file.parent() {
            let _ = fs::create_dir_all(parent);
        }
        if let Ok(json) = serde_json::to_string_pretty(&live) {
            let _ = fs::write(live_file, json);
        }

        if newly_closed.is_empty() {
            return;
        }
        if let Some(ref closed_file) = self.closed_file {
            let mut all: Vec<DefensiveTradeState> = fs::read_to_string(closed_file)
                .ok()
                .and_then(|c| serde_json::from_str(&c).ok())
                .unwrap_or_default();
            all.extend_from_slice(newly_closed);
            if let Ok(json) = serde_json::to_string_pretty(&all) {
                let _ = fs::write(closed_file, json);
            }
        }
    }

    /// Load the live states written by the previous run, if any.
    pub fn load_live(&self) -> Vec<DefensiveTradeState> {
        let Some(ref live_file) = self.live_file else {
            return Vec::new();
        };
        match fs::read_to_string(live_file) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                debug!("Defense archive load skipped: {}", e);
                Vec::new()
            }),
            Err(_) => Vec::new(),
        }
    }
}
