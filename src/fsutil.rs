// src/fsutil.rs

use crate::error::{Error, Result};
use serde::Serialize;
use serde_json::ser::PrettyFormatter;
use std::fs;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

/// Replace `path` with `contents` so readers see either the old or the new file
///
/// The data goes to a temporary file in the same directory first and is then
/// renamed over the destination.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).map_err(|e| Error::filesystem(parent, e))?;

    let mut temp = NamedTempFile::new_in(parent).map_err(|e| Error::filesystem(parent, e))?;
    temp.write_all(contents)
        .map_err(|e| Error::filesystem(temp.path(), e))?;
    temp.as_file()
        .sync_all()
        .map_err(|e| Error::filesystem(temp.path(), e))?;
    temp.persist(path)
        .map_err(|e| Error::filesystem(path, e.error))?;

    Ok(())
}

/// Four-space indented JSON, the layout of every state file OPM writes
pub fn to_pretty_json<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let mut serializer =
        serde_json::Serializer::with_formatter(&mut out, PrettyFormatter::with_indent(b"    "));
    value.serialize(&mut serializer)?;
    Ok(out)
}
