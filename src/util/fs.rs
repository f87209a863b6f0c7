use std::io::Write;
use std::path::Path;

/// Atomically replaces `dst` with `content` using write-to-temp-then-rename.
///
/// The destination is never left in a partial state: readers see either the
/// old file or the new one.
pub fn atomic_write(dst: &Path, content: &[u8]) -> std::io::Result<()> {
    // Randomized temp filename so a stale or attacker-placed file cannot be
    // reused; create_new fails instead of following a symlink.
    use std::time::{SystemTime, UNIX_EPOCH};
    let random_suffix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let temp_path = dst.with_extension(format!("tmp.{:016x}", random_suffix));

    let mut temp_file = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&temp_path)?;

    let written = temp_file
        .write_all(content)
        .and_then(|_| temp_file.sync_all());
    drop(temp_file);
    if let Err(e) = written {
        let _ = std::fs::remove_file(&temp_path);
        return Err(e);
    }

    // On Windows, rename fails if destination exists, so remove it first
    #[cfg(windows)]
    if dst.exists() {
        if let Err(e) = std::fs::remove_file(dst) {
            let _ = std::fs::remove_file(&temp_path);
            return Err(e);
        }
    }

    // POSIX guarantees atomicity for rename on the same filesystem
    std::fs::rename(&temp_path, dst).inspect_err(|_| {
        let _ = std::fs::remove_file(&temp_path);
    })
}
