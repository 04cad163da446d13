//! Write-then-rename file replacement.
//!
//! Contents go to a hidden temp file next to the target, are fsynced, and
//! only then renamed over the target. Readers see either the old file or the
//! new one. A temp file left behind by a crash never shadows the target and is
//! swept by [`sweep_stale_temps`].

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// A pending replacement of `target`.
pub struct AtomicFile {
    target: PathBuf,
    temp_path: PathBuf,
    writer: Option<BufWriter<File>>,
}

impl AtomicFile {
    /// Open a temp file beside `target`. Parent directories are created.
    pub fn create(target: &Path) -> io::Result<Self> {
        if let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let temp_path = temp_sibling(target);
        let file = File::create(&temp_path)?;
        Ok(Self {
            target: target.to_path_buf(),
            temp_path,
            writer: Some(BufWriter::new(file)),
        })
    }

    pub fn temp_path(&self) -> &Path {
        &self.temp_path
    }

    /// Flush, fsync and rename the temp file over the target.
    pub fn commit(mut self) -> io::Result<()> {
        let writer = self
            .writer
            .take()
            .ok_or_else(|| io::Error::other("atomic file already committed"))?;
        let file = writer.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        drop(file);

        if let Err(e) = fs::rename(&self.temp_path, &self.target) {
            let _ = fs::remove_file(&self.temp_path);
            return Err(e);
        }

        #[cfg(unix)]
        if let Some(parent) = self.target.parent().filter(|p| !p.as_os_str().is_empty()) {
            if let Ok(dir) = File::open(parent) {
                let _ = dir.sync_all();
            }
        }

        debug!(path = %self.target.display(), "Atomic replace committed");
        Ok(())
    }

    fn writer_mut(&mut self) -> io::Result<&mut BufWriter<File>> {
        self.writer
            .as_mut()
            .ok_or_else(|| io::Error::other("atomic file already committed"))
    }
}

impl Write for AtomicFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.writer_mut()?.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer_mut()?.flush()
    }
}

impl Drop for AtomicFile {
    fn drop(&mut self) {
        // Not committed: discard the partial temp file.
        if self.writer.take().is_some() {
            if let Err(e) = fs::remove_file(&self.temp_path) {
                warn!(path = %self.temp_path.display(), error = %e, "Failed to remove temp file");
            }
        }
    }
}

/// Replace `target` with `bytes` atomically.
pub fn write_atomic(target: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = AtomicFile::create(target)?;
    file.write_all(bytes)?;
    file.commit()
}

/// Replace `target` with a copy of `source` atomically.
pub fn copy_atomic(source: &Path, target: &Path) -> io::Result<u64> {
    let mut input = File::open(source)?;
    let mut file = AtomicFile::create(target)?;
    let copied = io::copy(&mut input, &mut file)?;
    file.commit()?;
    Ok(copied)
}

/// Remove temp files a crashed writer left beside `target`.
///
/// Returns the number of files removed.
pub fn sweep_stale_temps(target: &Path) -> usize {
    let Some(name) = target.file_name().and_then(|n| n.to_str()) else {
        return 0;
    };
    let dir = target
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let pattern = format!(
        "{}/.{}.*.tmp",
        glob::Pattern::escape(&dir.to_string_lossy()),
        glob::Pattern::escape(name)
    );

    let Ok(paths) = glob::glob(&pattern) else {
        return 0;
    };

    let mut removed = 0;
    for path in paths.filter_map(|r| r.ok()) {
        match fs::remove_file(&path) {
            Ok(()) => {
                warn!(path = %path.display(), "Removed stale temp file from interrupted write");
                removed += 1;
            }
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove stale temp file"),
        }
    }
    removed
}

fn temp_sibling(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("file");
    target.with_file_name(format!(".{}.{}.tmp", name, uuid::Uuid::new_v4()))
}
