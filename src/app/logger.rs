use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::hash::Hash;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Mutex;
use std::time::SystemTime;

use syslog::{Facility, Formatter3164, LoggerBackend};

use crate::{Error, Result};

/// Size at which the log file is rotated to `<file>.1`.
pub const ROTATE_BYTES: u64 = 100 * 1024;

/// Log verbosity levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum LogLevel {
    Error = 0,
    Warn = 1,
    #[default]
    Info = 2,
    Debug = 3,
    Trace = 4,
}

impl FromStr for LogLevel {
    type Err = ();
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            _ => Err(()),
        }
    }
}

type SyslogWriter = syslog::Logger<LoggerBackend, Formatter3164>;

/// Leveled logger writing to stderr, an optional rotating file and optional syslog.
///
/// Sinks sit behind mutexes so one `Arc<Logger>` serves the monitor and the button thread.
pub struct Logger {
    level: LogLevel,
    file: Option<Mutex<RotatingFile>>,
    syslog: Option<Mutex<SyslogWriter>>,
}

impl Logger {
    /// Builds the logger. `PISTATUS_LOG_LEVEL` overrides the configured level;
    /// `PISTATUS_LOG_PATH` is used only when no file was configured.
    pub fn new(level: LogLevel, file_path: Option<String>, use_syslog: bool) -> Result<Self> {
        let level = resolve_level(level, std::env::var("PISTATUS_LOG_LEVEL").ok().as_deref());
        let path = resolve_path(file_path, std::env::var("PISTATUS_LOG_PATH").ok());
        Self::with_sinks(level, path.map(PathBuf::from), use_syslog)
    }

    pub fn with_sinks(level: LogLevel, file_path: Option<PathBuf>, use_syslog: bool) -> Result<Self> {
        let file = match file_path {
            Some(path) => Some(Mutex::new(RotatingFile::open(path, ROTATE_BYTES)?)),
            None => None,
        };
        let syslog = if use_syslog {
            Some(Mutex::new(connect_syslog()?))
        } else {
            None
        };
        Ok(Self {
            level,
            file,
            syslog,
        })
    }

    pub fn level(&self) -> LogLevel {
        self.level
    }

    pub fn enabled(&self, level: LogLevel) -> bool {
        level <= self.level
    }

    pub fn log(&self, level: LogLevel, msg: impl AsRef<str>) {
        if !self.enabled(level) {
            return;
        }
        let msg = msg.as_ref();
        let ts = humantime::format_rfc3339_seconds(SystemTime::now());
        let line = format!("[{ts}] [{level:?}] {msg}");
        eprintln!("{line}");
        if let Some(file) = self.file.as_ref() {
            if let Ok(mut file) = file.lock() {
                let _ = file.write_line(&line);
            }
        }
        if let Some(syslog) = self.syslog.as_ref() {
            if let Ok(mut writer) = syslog.lock() {
                let _ = match level {
                    LogLevel::Error => writer.err(msg),
                    LogLevel::Warn => writer.warning(msg),
                    LogLevel::Info => writer.info(msg),
                    LogLevel::Debug | LogLevel::Trace => writer.debug(msg),
                };
            }
        }
    }

    pub fn error(&self, msg: impl AsRef<str>) {
        self.log(LogLevel::Error, msg);
    }

    pub fn warn(&self, msg: impl AsRef<str>) {
        self.log(LogLevel::Warn, msg);
    }

    pub fn info(&self, msg: impl AsRef<str>) {
        self.log(LogLevel::Info, msg);
    }

    pub fn debug(&self, msg: impl AsRef<str>) {
        self.log(LogLevel::Debug, msg);
    }

    #[allow(dead_code)]
    pub fn trace(&self, msg: impl AsRef<str>) {
        self.log(LogLevel::Trace, msg);
    }
}

fn resolve_level(configured: LogLevel, env: Option<&str>) -> LogLevel {
    env.and_then(|raw| LogLevel::from_str(raw).ok())
        .unwrap_or(configured)
}

fn resolve_path(configured: Option<String>, env: Option<String>) -> Option<String> {
    configured.or(env)
}

fn connect_syslog() -> Result<SyslogWriter> {
    let formatter = Formatter3164 {
        facility: Facility::LOG_DAEMON,
        hostname: None,
        process: env!("CARGO_PKG_NAME").into(),
        pid: std::process::id(),
    };
    syslog::unix(formatter).map_err(|e| Error::Io(std::io::Error::other(e.to_string())))
}

/// Append-only file that moves itself to `<path>.1` once it would grow past `max_bytes`.
struct RotatingFile {
    path: PathBuf,
    file: File,
    written: u64,
    max_bytes: u64,
}

impl RotatingFile {
    fn open(path: PathBuf, max_bytes: u64) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let written = file.metadata()?.len();
        Ok(Self {
            path,
            file,
            written,
            max_bytes,
        })
    }

    fn write_line(&mut self, line: &str) -> Result<()> {
        let len = line.len() as u64 + 1;
        if self.written > 0 && self.written + len > self.max_bytes {
            self.rotate()?;
        }
        writeln!(self.file, "{line}")?;
        self.written += len;
        Ok(())
    }

    fn rotate(&mut self) -> Result<()> {
        fs::rename(&self.path, backup_path(&self.path))?;
        self.file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)?;
        self.written = 0;
        Ok(())
    }
}

fn backup_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".1");
    PathBuf::from(name)
}

/// Remembers which sources are currently failing so each outage is logged once.
#[derive(Debug)]
pub struct FailureLatch<K> {
    failing: HashSet<K>,
}

impl<K> Default for FailureLatch<K> {
    fn default() -> Self {
        Self {
            failing: HashSet::new(),
        }
    }
}

impl<K: Eq + Hash> FailureLatch<K> {
    /// Returns true if `key` was healthy before this failure.
    pub fn fail(&mut self, key: K) -> bool {
        self.failing.insert(key)
    }

    /// Returns true if `key` had been failing.
    pub fn recover(&mut self, key: &K) -> bool {
        self.failing.remove(key)
    }

    pub fn is_failing(&self, key: &K) -> bool {
        self.failing.contains(key)
    }
}
