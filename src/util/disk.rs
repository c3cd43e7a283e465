//! Disk space checks for the merge and worktree gates.

use std::io;
use std::path::Path;

use nix::sys::statvfs::statvfs;

/// Available bytes on the filesystem holding `path`.
pub fn available_space(path: &Path) -> io::Result<u64> {
    let stat = statvfs(path).map_err(|e| io::Error::other(format!("statvfs failed: {}", e)))?;
    Ok(stat.blocks_available() as u64 * stat.fragment_size() as u64)
}

/// Error unless at least `required` bytes are free at `path`.
pub fn ensure_space(path: &Path, required: u64) -> io::Result<()> {
    let available = available_space(path)?;
    if available < required {
        return Err(io::Error::other(format!(
            "insufficient disk space: {} available, {} required",
            format_bytes(available),
            format_bytes(required)
        )));
    }
    Ok(())
}

/// Human-readable byte count.
pub fn format_bytes(bytes: u64) -> String {
    const UNIT: u64 = 1024;
    if bytes < UNIT {
        return format!("{} B", bytes);
    }

    let mut div = UNIT;
    let mut exp = 0;
    let mut n = bytes / UNIT;
    while n >= UNIT {
        div *= UNIT;
        exp += 1;
        n /= UNIT;
    }

    let units = ["KiB", "MiB", "GiB", "TiB", "PiB"];
    format!("{:.1} {}", bytes as f64 / div as f64, units[exp])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KiB");
        assert_eq!(format_bytes(100 * 1024 * 1024), "100.0 MiB");
        assert_eq!(format_bytes(3 * 1024 * 1024 * 1024), "3.0 GiB");
    }

    #[test]
    fn test_available_space_on_tmp() {
        let available = available_space(Path::new("/tmp")).unwrap();
        assert!(available > 0);
    }

    #[test]
    fn test_ensure_space_absurd_requirement_fails() {
        assert!(ensure_space(Path::new("/tmp"), u64::MAX).is_err());
    }
}
