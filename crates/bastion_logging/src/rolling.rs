//! Size-based log rotation: `<name>.log`, then `<name>.log.1` .. `<name>.log.N-1`.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy)]
pub struct RotationPolicy {
    /// Total files kept, including the live one.
    pub max_files: usize,
    pub max_bytes: u64,
}

impl Default for RotationPolicy {
    fn default() -> Self {
        Self {
            max_files: 5,
            max_bytes: 10 * 1024 * 1024,
        }
    }
}

struct RollingFile {
    dir: PathBuf,
    stem: String,
    policy: RotationPolicy,
    file: Option<File>,
    written: u64,
}

impl RollingFile {
    fn open(dir: PathBuf, name: &str, policy: RotationPolicy) -> io::Result<Self> {
        fs::create_dir_all(&dir)?;
        let mut rolling = Self {
            dir,
            stem: sanitize_name(name),
            policy: RotationPolicy {
                max_files: policy.max_files.max(1),
                ..policy
            },
            file: None,
            written: 0,
        };
        rolling.reopen()?;
        if rolling.written > rolling.policy.max_bytes {
            rolling.rotate()?;
        }
        Ok(rolling)
    }

    fn live_path(&self) -> PathBuf {
        self.dir.join(format!("{}.log", self.stem))
    }

    fn archive_path(&self, index: usize) -> PathBuf {
        self.dir.join(format!("{}.log.{}", self.stem, index))
    }

    fn reopen(&mut self) -> io::Result<()> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.live_path())?;
        self.written = file.metadata()?.len();
        self.file = Some(file);
        Ok(())
    }

    fn rotate(&mut self) -> io::Result<()> {
        if let Some(mut file) = self.file.take() {
            let _ = file.flush();
        }

        let last = self.policy.max_files - 1;
        if last == 0 {
            // Single-file policy: truncate in place.
            let _ = fs::remove_file(self.live_path());
            return self.reopen();
        }

        let oldest = self.archive_path(last);
        if oldest.exists() {
            fs::remove_file(&oldest)?;
        }
        for idx in (1..last).rev() {
            let src = self.archive_path(idx);
            if src.exists() {
                fs::rename(&src, self.archive_path(idx + 1))?;
            }
        }
        let live = self.live_path();
        if live.exists() {
            fs::rename(live, self.archive_path(1))?;
        }

        self.reopen()
    }
}

impl Write for RollingFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.written > 0 && self.written + buf.len() as u64 > self.policy.max_bytes {
            self.rotate()?;
        }

        let file = self
            .file
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "log file unavailable"))?;
        let bytes = file.write(buf)?;
        self.written += bytes as u64;
        Ok(bytes)
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.file.as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}

/// `MakeWriter` handing every event the same mutex-guarded rolling file.
#[derive(Clone)]
pub(crate) struct SharedRollingWriter {
    inner: Arc<Mutex<RollingFile>>,
}

impl SharedRollingWriter {
    pub(crate) fn new(dir: PathBuf, name: &str, policy: RotationPolicy) -> io::Result<Self> {
        Ok(Self {
            inner: Arc::new(Mutex::new(RollingFile::open(dir, name, policy)?)),
        })
    }
}

pub(crate) struct SharedRollingGuard {
    inner: Arc<Mutex<RollingFile>>,
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for SharedRollingWriter {
    type Writer = SharedRollingGuard;

    fn make_writer(&'a self) -> Self::Writer {
        SharedRollingGuard {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl SharedRollingGuard {
    fn with_file<T>(&self, f: impl FnOnce(&mut RollingFile) -> io::Result<T>) -> io::Result<T> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "log writer lock poisoned"))?;
        f(&mut guard)
    }
}

impl Write for SharedRollingGuard {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.with_file(|file| file.write(buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        self.with_file(|file| file.flush())
    }
}

fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|ch| if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' { ch } else { '_' })
        .collect()
}
