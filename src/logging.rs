/*
 * PCAT Manager - Logging
 * Copyright (c) 2025 Dynamic Devices Ltd
 * All rights reserved.
 */

//! `env_logger` to stderr always; when `Debug.OutputLog` is set in the
//! static config, a second timestamped line-oriented file logger appends
//! to `/tmp/pcat-manager.log`.

use std::fs::OpenOptions;
use std::io::Write;
use std::sync::Mutex;

use chrono::Local;
use log::{Level, LevelFilter, Log, Metadata, Record};

const LOG_FILE_PATH: &str = "/tmp/pcat-manager.log";

struct FileLogger {
    file: Mutex<std::fs::File>,
}

/// Wraps an `env_logger` instance and, when enabled, a file sink that
/// receives every record the stderr logger would also print.
struct DualLogger {
    stderr: env_logger::Logger,
    file: Option<FileLogger>,
}

impl Log for DualLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        self.stderr.enabled(metadata)
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        self.stderr.log(record);
        if let Some(file) = &self.file {
            let line = format!(
                "{} [{}] {}: {}\n",
                Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                record.level(),
                record.target(),
                record.args()
            );
            if let Ok(mut f) = file.file.lock() {
                let _ = f.write_all(line.as_bytes());
                let _ = f.flush();
            }
        }
    }

    fn flush(&self) {
        self.stderr.flush();
        if let Some(file) = &self.file {
            if let Ok(mut f) = file.file.lock() {
                let _ = f.flush();
            }
        }
    }
}

/// Initializes logging. `file_logging` mirrors `StaticConfig::debug_output_log`.
pub fn init(file_logging: bool) {
    let stderr = env_logger::Builder::from_default_env()
        .filter_level(LevelFilter::Info)
        .build();
    let max_level = stderr.filter();

    let file = if file_logging {
        match OpenOptions::new().create(true).append(true).open(LOG_FILE_PATH) {
            Ok(f) => Some(FileLogger { file: Mutex::new(f) }),
            Err(e) => {
                eprintln!("failed to open {}: {}; file logging disabled", LOG_FILE_PATH, e);
                None
            }
        }
    } else {
        None
    };

    let logger = DualLogger { stderr, file };
    log::set_max_level(max_level);
    if log::set_boxed_logger(Box::new(logger)).is_err() {
        eprintln!("logger already initialized");
    }
}

/// The crate's one intentional abort path: a "fatal" log line is treated
/// as unrecoverable and deliberately terminates the process.
pub fn fatal(message: &str) -> ! {
    log::log!(Level::Error, "FATAL: {}", message);
    std::process::exit(1);
}
