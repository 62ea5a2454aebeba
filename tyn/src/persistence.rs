// File persistence helpers shared by the journal generator and the config layer

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

/// Atomically save data to a file using write-to-temp + rename.
/// The parent directory is created when missing.
pub fn atomic_write(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("Invalid path: {}", path.display()))?;

    fs::create_dir_all(parent)
        .with_context(|| format!("Failed to create directory: {}", parent.display()))?;

    // Temp file lives next to the target so the rename stays on one filesystem
    let temp_path = parent.join(format!(
        ".{}.tmp.{}",
        path.file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown"),
        std::process::id()
    ));

    fs::write(&temp_path, contents)
        .with_context(|| format!("Failed to write temp file: {}", temp_path.display()))?;

    fs::rename(&temp_path, path).with_context(|| {
        format!(
            "Failed to rename {} to {}",
            temp_path.display(),
            path.display()
        )
    })?;

    Ok(())
}
