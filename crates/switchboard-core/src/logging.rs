//! Per-session transcript files.
//!
//! Engines that talk to an external process write every line they exchange
//! to `{log_dir}/{log_id}.log` so a misbehaving agent can be inspected after
//! the fact. Logging is best-effort: failures never reach the caller.

use std::{
    fs::{File, OpenOptions},
    io::Write,
    path::Path,
    sync::{Arc, Mutex},
};

use chrono::{SecondsFormat, Utc};

/// Thread-safe handle to an append-only log file. `None` disables logging.
pub type LogHandle = Arc<Mutex<Option<File>>>;

/// A handle that discards everything.
pub fn disabled() -> LogHandle {
    Arc::new(Mutex::new(None))
}

/// Write a timestamped line, e.g. `[2026-02-04T10:15:30.123Z] STDIN: ...`.
pub fn log_line(handle: &LogHandle, direction: &str, data: &str) {
    if let Ok(mut guard) = handle.lock() {
        if let Some(ref mut file) = *guard {
            let ts = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
            let _ = writeln!(file, "[{}] {}: {}", ts, direction, data);
            let _ = file.flush();
        }
    }
}

/// Open (or create) `{log_dir}/{log_id}.log` and return a shared handle.
///
/// Characters that cannot appear in a file name are replaced with `_`.
pub fn open_log_file(log_dir: Option<&Path>, log_id: &str) -> LogHandle {
    let file = log_dir.and_then(|dir| {
        std::fs::create_dir_all(dir).ok()?;
        let path = dir.join(format!("{}.log", file_stem(log_id)));
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .ok()
    });
    match file {
        Some(file) => Arc::new(Mutex::new(Some(file))),
        None => disabled(),
    }
}

fn file_stem(log_id: &str) -> String {
    let stem: String = log_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if stem.is_empty() || stem.chars().all(|c| c == '.') {
        "session".to_string()
    } else {
        stem
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn open_log_file_creates_file() {
        let dir = tempdir().unwrap();

        let handle = open_log_file(Some(dir.path()), "abc-123");
        assert!(handle.lock().unwrap().is_some());
        assert!(dir.path().join("abc-123.log").exists());
    }

    #[test]
    fn open_log_file_without_dir_is_disabled() {
        let handle = open_log_file(None, "test");
        assert!(handle.lock().unwrap().is_none());
    }

    #[test]
    fn log_id_is_sanitized() {
        assert_eq!(file_stem("../etc/passwd"), ".._etc_passwd");
        assert_eq!(file_stem("my session"), "my_session");
        assert_eq!(file_stem(".."), "session");
        assert_eq!(file_stem(""), "session");
    }

    #[test]
    fn log_line_writes_timestamped_entry() {
        let dir = tempdir().unwrap();
        let handle = open_log_file(Some(dir.path()), "test");

        log_line(&handle, "STDIN", "hello world");

        let contents = std::fs::read_to_string(dir.path().join("test.log")).unwrap();
        assert!(contents.starts_with('['));
        assert!(contents.contains("Z] STDIN: hello world"));
    }

    #[test]
    fn log_line_on_disabled_handle_is_noop() {
        log_line(&disabled(), "STDOUT", "ignored");
    }
}
