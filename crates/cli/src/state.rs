use crate::error::CliError;
use engine_core::offsets::SledOffsetStore;
use std::path::{Path, PathBuf};
use tracing::debug;

const STATE_DIR: &str = ".tributary";
const OFFSETS_DIR: &str = "offsets";

/// `explicit`, or `~/.tributary`.
pub fn state_dir(explicit: Option<PathBuf>) -> Result<PathBuf, CliError> {
    if let Some(dir) = explicit {
        return Ok(dir);
    }
    let home = dirs::home_dir()
        .ok_or_else(|| CliError::Unexpected("Could not determine home directory".into()))?;
    Ok(home.join(STATE_DIR))
}

pub fn open_offset_store(state_dir: &Path) -> Result<SledOffsetStore, CliError> {
    let path = state_dir.join(OFFSETS_DIR);
    let store = SledOffsetStore::open(&path)?;
    debug!(path = %path.display(), "Opened offset store");
    Ok(store)
}
