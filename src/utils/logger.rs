use crate::shared::constants;
use lazy_static::lazy_static;
use std::backtrace::Backtrace;
use std::fs::OpenOptions;
use std::io::Write;
use std::panic;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

#[derive(Clone)]
struct LoggerPaths {
    error_path: PathBuf,
    debug_path: PathBuf,
}

lazy_static! {
    static ref LOGGER: Mutex<Option<LoggerPaths>> = Mutex::new(None);
}

fn paths() -> MutexGuard<'static, Option<LoggerPaths>> {
    match LOGGER.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn append_line(path: &Path, line: &str) {
    if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(path) {
        let _ = writeln!(file, "{}", line);
    }
}

fn start_file(path: &Path, title: &str) {
    if let Ok(mut file) = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)
    {
        let _ = writeln!(file, "=== {} Started: {} ===", title, chrono::Local::now());
    }
}

/// Log to the working directory and install the panic hook
pub fn init() {
    let dir = std::env::current_dir().unwrap_or_default();
    init_in(&dir);
    install_panic_hook();
}

/// Start fresh `error.log` and `debug.log` files in `dir`.
/// Messages logged before this are dropped.
pub fn init_in(dir: &Path) {
    let _ = std::fs::create_dir_all(dir);
    let error_path = dir.join(constants::ERROR_LOG_FILE);
    let debug_path = dir.join(constants::DEBUG_LOG_FILE);

    start_file(&error_path, "Error Log");
    start_file(&debug_path, "Debug Log");

    *paths() = Some(LoggerPaths {
        error_path,
        debug_path,
    });
}

pub fn log_dir() -> Option<PathBuf> {
    paths()
        .as_ref()
        .and_then(|p| p.debug_path.parent().map(Path::to_path_buf))
}

fn install_panic_hook() {
    panic::set_hook(Box::new(move |info| {
        let backtrace = Backtrace::capture();
        let msg = match info.payload().downcast_ref::<&str>() {
            Some(s) => *s,
            None => match info.payload().downcast_ref::<String>() {
                Some(s) => &s[..],
                None => "Box<Any>",
            },
        };

        let location = info
            .location()
            .map(|l| format!("{}:{}", l.file(), l.line()))
            .unwrap_or_else(|| "unknown".to_string());

        let thread = std::thread::current();
        let error_msg = format!(
            "\nCRITICAL PANIC in thread '{}' at {}:\nMessage: {}\nBacktrace:\n{:?}\n",
            thread.name().unwrap_or("<unnamed>"),
            location,
            msg,
            backtrace
        );

        // clone out so the lock is not held while writing
        let current = paths().clone();
        match current {
            Some(paths) => {
                append_line(&paths.error_path, &error_msg);
                append_line(&paths.debug_path, &error_msg);
                eprintln!("{} crashed. See {} for details.", constants::APP_NAME, paths.error_path.display());
            }
            None => eprintln!("{}", error_msg),
        }
    }));
}

pub fn log(level: &str, msg: &str) {
    let current = paths().clone();
    if let Some(paths) = current {
        let timestamp = chrono::Local::now().format("%H:%M:%S%.3f");
        let thread = std::thread::current();
        let line = format!(
            "[{}][{}][{}] {}",
            timestamp,
            level,
            thread.name().unwrap_or("main"),
            msg
        );
        append_line(&paths.debug_path, &line);

        if level == "ERROR" {
            append_line(&paths.error_path, &line);
        }
    }
}

pub fn info(msg: &str) {
    log("INFO", msg);
}

pub fn error(msg: &str) {
    log("ERROR", msg);
}

pub fn debug(msg: &str) {
    log("DEBUG", msg);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_go_to_both_files() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("logs");
        init_in(&dir);
        error("relay stalled");
        debug("slot recycled");

        let debug_log = std::fs::read_to_string(dir.join(constants::DEBUG_LOG_FILE)).unwrap();
        let error_log = std::fs::read_to_string(dir.join(constants::ERROR_LOG_FILE)).unwrap();
        assert!(debug_log.contains("[ERROR]"));
        assert!(debug_log.contains("slot recycled"));
        assert!(error_log.contains("relay stalled"));
        assert!(!error_log.contains("slot recycled"));
        assert!(log_dir().is_some());
    }
}
