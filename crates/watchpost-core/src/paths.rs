use crate::error::{Result, WatchpostError};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

// ---------------------------------------------------------------------------
// Directory constants
// ---------------------------------------------------------------------------

pub const WATCHPOST_DIR: &str = ".watchpost";
pub const FIXTURES_DIR: &str = ".watchpost/fixtures";

pub const CONFIG_FILE: &str = ".watchpost/config.yaml";
pub const STORE_FILE: &str = ".watchpost/store.redb";
pub const OUTBOX_FILE: &str = ".watchpost/outbox.jsonl";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

pub fn config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE)
}

pub fn fixtures_dir(root: &Path) -> PathBuf {
    root.join(FIXTURES_DIR)
}

/// Resolve a path from config: absolute paths pass through, relative ones
/// are anchored at the project root.
pub fn resolve(root: &Path, configured: &Path) -> PathBuf {
    if configured.is_absolute() {
        configured.to_path_buf()
    } else {
        root.join(configured)
    }
}

// ---------------------------------------------------------------------------
// Name validation
// ---------------------------------------------------------------------------

static NAME_RE: OnceLock<Regex> = OnceLock::new();

fn name_re() -> &'static Regex {
    NAME_RE.get_or_init(|| {
        Regex::new(r"^[a-z0-9][a-z0-9\-]*[a-z0-9]$|^[a-z0-9]$").expect("static regex")
    })
}

/// Job names and ledger kinds share one namespace rule.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > 64 || !name_re().is_match(name) {
        return Err(WatchpostError::InvalidName(name.to_string()));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
