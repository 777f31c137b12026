use std::io::{self, Write};
use std::path::Path;

use tempfile::NamedTempFile;

/// Replace the server configuration file at `path` with `data` in one
/// rename, so a starting server never reads a partial file.
///
/// Errors name the file being written.
pub fn atomic_write(path: &Path, data: &[u8]) -> io::Result<()> {
    let at = |e: io::Error| io::Error::new(e.kind(), format!("writing {}: {e}", path.display()));
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir).map_err(at)?;
    let mut tmp = NamedTempFile::new_in(dir).map_err(at)?;
    tmp.write_all(data).map_err(at)?;
    tmp.persist(path).map_err(|e| at(e.error))?;
    Ok(())
}

/// Recursively copy the directory `src` to `dst`, creating `dst`.
///
/// Only regular files and directories are copied; anything else is skipped.
pub fn copy_dir(src: &Path, dst: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dst)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let kind = entry.file_type()?;
        let target = dst.join(entry.file_name());
        if kind.is_dir() {
            copy_dir(&entry.path(), &target)?;
        } else if kind.is_file() {
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}
