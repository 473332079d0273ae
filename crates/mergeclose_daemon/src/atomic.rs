//! Crash-safe JSON file writes.

use serde::Serialize;
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// `<path>.<pid>.tmp`, next to the target so the rename stays on one
/// filesystem. The pid keeps two writers from sharing a temp file.
fn temp_path_for(path: &Path) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_os_string();
    name.push(format!(".{}.tmp", std::process::id()));
    PathBuf::from(name)
}

/// Write `value` as JSON with sorted keys and a trailing newline.
///
/// The content is written to a sibling temp file, synced, then renamed over
/// the target. Readers see either the old file or the new one, never a
/// partial write.
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> io::Result<()> {
    // Round-trip through Value: its map is ordered, so keys come out sorted.
    let value = serde_json::to_value(value).map_err(io::Error::from)?;
    let mut content = serde_json::to_vec(&value).map_err(io::Error::from)?;
    content.push(b'\n');

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let temp_path = temp_path_for(path);
    {
        let mut file = File::create(&temp_path)?;
        file.write_all(&content)?;
        file.flush()?;
        file.sync_all()?;
    }
    fs::rename(&temp_path, path)
}
