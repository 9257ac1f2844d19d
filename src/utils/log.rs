// src/utils/log.rs

//! Log file output.
//!
//! Provides the writer the binary hands to its logger: every line goes to a
//! size-rotated log file and, in verbose mode, is mirrored to stderr.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::models::LoggingConfig;

/// Writer that appends to the log file and optionally mirrors to stderr.
///
/// The file is rotated on open and again whenever it grows past
/// `max_bytes` while the sink is in use.
pub struct LogSink {
    path: PathBuf,
    file: File,
    written: u64,
    max_bytes: u64,
    backups: usize,
    mirror_console: bool,
}

impl LogSink {
    /// Open (and rotate if needed) the log file.
    pub fn open(path: &Path, config: &LoggingConfig, mirror_console: bool) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        rotate_if_needed(path, config.max_bytes, config.backups)?;

        let file = open_append(path)?;
        let written = file.metadata()?.len();
        Ok(Self {
            path: path.to_path_buf(),
            file,
            written,
            max_bytes: config.max_bytes,
            backups: config.backups,
            mirror_console,
        })
    }

    fn rotate(&mut self) -> io::Result<()> {
        self.file.flush()?;
        rotate_if_needed(&self.path, self.max_bytes, self.backups)?;
        self.file = open_append(&self.path)?;
        self.written = self.file.metadata()?.len();
        Ok(())
    }
}

fn open_append(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

impl Write for LogSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.mirror_console {
            let _ = io::stderr().write_all(buf);
        }
        self.file.write_all(buf)?;
        self.written += buf.len() as u64;
        if self.max_bytes > 0 && self.written >= self.max_bytes {
            self.rotate()?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.mirror_console {
            let _ = io::stderr().flush();
        }
        self.file.flush()
    }
}

/// Shift `file` → `file.1` → … → `file.{backups}` once `file` exceeds `max_bytes`.
///
/// The oldest backup is dropped. With zero backups the file is truncated.
pub fn rotate_if_needed(path: &Path, max_bytes: u64, backups: usize) -> io::Result<()> {
    let size = match fs::metadata(path) {
        Ok(meta) => meta.len(),
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };
    if max_bytes == 0 || size < max_bytes {
        return Ok(());
    }

    if backups == 0 {
        return File::create(path).map(|_| ());
    }

    let oldest = backup_path(path, backups);
    if oldest.exists() {
        fs::remove_file(&oldest)?;
    }
    for n in (1..backups).rev() {
        let from = backup_path(path, n);
        if from.exists() {
            fs::rename(&from, backup_path(path, n + 1))?;
        }
    }
    fs::rename(path, backup_path(path, 1))
}

fn backup_path(path: &Path, n: usize) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(format!(".{n}"));
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_small_file_is_not_rotated() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("watch.log");
        fs::write(&path, b"short").unwrap();

        rotate_if_needed(&path, 1024, 3).unwrap();
        assert!(path.exists());
        assert!(!backup_path(&path, 1).exists());
    }

    #[test]
    fn test_rotation_shifts_backups() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("watch.log");
        fs::write(&path, b"current log").unwrap();
        fs::write(backup_path(&path, 1), b"older").unwrap();
        fs::write(backup_path(&path, 2), b"oldest").unwrap();

        rotate_if_needed(&path, 4, 2).unwrap();

        assert!(!path.exists());
        assert_eq!(fs::read(backup_path(&path, 1)).unwrap(), b"current log");
        assert_eq!(fs::read(backup_path(&path, 2)).unwrap(), b"older");
        assert!(!backup_path(&path, 3).exists());
    }

    #[test]
    fn test_sink_rotates_while_writing() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("watch.log");
        let config = LoggingConfig {
            max_bytes: 100,
            backups: 2,
            ..LoggingConfig::default()
        };
        let mut sink = LogSink::open(&path, &config, false).unwrap();

        let line = [b'x'; 50];
        for _ in 0..5 {
            sink.write_all(&line).unwrap();
        }
        sink.flush().unwrap();

        assert_eq!(fs::metadata(&path).unwrap().len(), 50);
        assert_eq!(fs::metadata(backup_path(&path, 1)).unwrap().len(), 100);
        assert_eq!(fs::metadata(backup_path(&path, 2)).unwrap().len(), 100);
        assert!(!backup_path(&path, 3).exists());
    }

    #[test]
    fn test_sink_appends_to_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("logs").join("watch.log");
        let mut sink = LogSink::open(&path, &LoggingConfig::default(), false).unwrap();

        sink.write_all(b"line one\n").unwrap();
        sink.flush().unwrap();
        drop(sink);

        let mut sink = LogSink::open(&path, &LoggingConfig::default(), false).unwrap();
        sink.write_all(b"line two\n").unwrap();
        sink.flush().unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "line one\nline two\n");
    }
}
