//! Named artifact groups: `<group>.json` documents stored next to a run's
//! inputs and outputs.

use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};
use tracing::info;

use crate::document::{DocumentCodec, Value};
use crate::error::LedgerError;

pub const RESERVED_GROUPS: [&str; 2] = ["inputs", "outputs"];

pub fn group_path(run_dir: &Path, group: &str) -> PathBuf {
    run_dir.join(format!("{}.json", group))
}

/// Group names must stay inside the run directory.
pub fn check_name(group: &str) -> Result<(), LedgerError> {
    if group.is_empty() || group.contains(['/', '\\']) || group.contains("..") {
        return Err(LedgerError::InvalidGroup(group.to_string()));
    }
    Ok(())
}

/// Write `value` as the artifact group `group` of the run at `run_dir`.
///
/// An existing group is an error unless `overwrite` is set, in which case
/// the old group's artifacts and document are removed first.
pub fn dump(
    codec: &DocumentCodec,
    value: &Value,
    run_dir: &Path,
    group: &str,
    overwrite: bool,
) -> Result<serde_json::Value> {
    check_name(group)?;
    if RESERVED_GROUPS.contains(&group) {
        return Err(LedgerError::ReservedGroup(group.to_string()).into());
    }

    let path = group_path(run_dir, group);
    if path.exists() {
        if !overwrite {
            return Err(LedgerError::GroupExists(group.to_string()).into());
        }
        let old = codec.load(&path)?;
        codec.remove_nested(&old)?;
        std::fs::remove_file(&path)
            .with_context(|| format!("Failed to remove {}", path.display()))?;
        info!(group = %group, run_dir = %run_dir.display(), "Replaced artifact group");
    }

    codec.dump(value, &path, run_dir)
}

/// Delete every artifact referenced by the group document. The document itself stays.
pub fn remove(codec: &DocumentCodec, run_dir: &Path, group: &str) -> Result<()> {
    check_name(group)?;
    let doc = codec.load(&group_path(run_dir, group))?;
    codec.remove_nested(&doc)?;
    info!(group = %group, run_dir = %run_dir.display(), "Removed group artifacts");
    Ok(())
}
