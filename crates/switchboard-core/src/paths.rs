use std::env;
use std::path::PathBuf;

/// Directory name under the home directory holding all Switchboard data.
const DATA_DIR_NAME: &str = ".switchboard";

/// Return the user's home directory.
///
/// Uses HOME on Unix-like systems and USERPROFILE on Windows.
pub fn home_dir() -> Option<PathBuf> {
    ["HOME", "USERPROFILE"]
        .iter()
        .filter_map(|key| env::var(key).ok())
        .find(|value| !value.is_empty())
        .map(PathBuf::from)
}

/// `~/.switchboard`
pub fn data_dir() -> Option<PathBuf> {
    home_dir().map(|home| home.join(DATA_DIR_NAME))
}

/// `~/.switchboard/sessions`, the default persisted session index.
pub fn sessions_dir() -> Option<PathBuf> {
    data_dir().map(|dir| dir.join("sessions"))
}

/// `~/.switchboard/logs`, the default transcript directory.
pub fn logs_dir() -> Option<PathBuf> {
    data_dir().map(|dir| dir.join("logs"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn with_env<F: FnOnce()>(home: Option<&str>, userprofile: Option<&str>, f: F) {
        let _guard = ENV_LOCK.lock().unwrap();
        let prev_home = env::var("HOME").ok();
        let prev_userprofile = env::var("USERPROFILE").ok();

        match home {
            Some(value) => env::set_var("HOME", value),
            None => env::remove_var("HOME"),
        }
        match userprofile {
            Some(value) => env::set_var("USERPROFILE", value),
            None => env::remove_var("USERPROFILE"),
        }

        f();

        match prev_home {
            Some(value) => env::set_var("HOME", value),
            None => env::remove_var("HOME"),
        }
        match prev_userprofile {
            Some(value) => env::set_var("USERPROFILE", value),
            None => env::remove_var("USERPROFILE"),
        }
    }

    #[test]
    fn home_dir_prefers_home() {
        with_env(Some("/tmp/home"), Some("/tmp/profile"), || {
            assert_eq!(home_dir(), Some(PathBuf::from("/tmp/home")));
        });
    }

    #[test]
    fn home_dir_falls_back_to_userprofile() {
        with_env(Some(""), Some("/tmp/profile"), || {
            assert_eq!(home_dir(), Some(PathBuf::from("/tmp/profile")));
        });
    }

    #[test]
    fn sessions_and_logs_live_under_data_dir() {
        with_env(Some("/tmp/home"), None, || {
            assert_eq!(
                sessions_dir(),
                Some(PathBuf::from("/tmp/home/.switchboard/sessions"))
            );
            assert_eq!(logs_dir(), Some(PathBuf::from("/tmp/home/.switchboard/logs")));
        });
    }

    #[test]
    fn no_home_means_no_dirs() {
        with_env(None, None, || {
            assert!(home_dir().is_none());
            assert!(sessions_dir().is_none());
        });
    }
}
