//! Small cross-cutting helpers.

use std::fs;
use std::io;
use std::path::Path;

/// Write `bytes` to `path` atomically: write a sibling temp file, then
/// rename it over the destination, so readers never observe a
/// half-written file.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)
}
