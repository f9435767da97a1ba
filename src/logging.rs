//! Process logger: every record goes to stderr and to a timestamped file
//! under the configured log directory.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use log::{Level, LevelFilter, Log, Metadata, Record};

struct DualLogger {
    level: LevelFilter,
    file: Mutex<BufWriter<File>>,
}

impl Log for DualLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let ts = chrono::Local::now().format("%H:%M:%S%.3f");
        let msg = format!("{} [{}] {}", ts, record.level(), record.args());
        eprintln!("{}", msg);
        if let Ok(mut f) = self.file.lock() {
            let _ = writeln!(f, "{}", msg);
            if record.level() <= Level::Warn {
                let _ = f.flush();
            }
        }
    }

    fn flush(&self) {
        if let Ok(mut f) = self.file.lock() {
            let _ = f.flush();
        }
    }
}

/// `{dir}/{prefix}_YYYYmmdd_HHMMSS.log` を作成してロガーを登録する
pub fn init<P: AsRef<Path>>(dir: P, prefix: &str, verbose: bool) -> Result<PathBuf> {
    let dir = dir.as_ref();
    fs::create_dir_all(dir)
        .with_context(|| format!("failed to create log dir {}", dir.display()))?;
    let ts = chrono::Local::now().format("%Y%m%d_%H%M%S");
    let path = dir.join(format!("{}_{}.log", prefix, ts));
    let file = File::create(&path)
        .with_context(|| format!("failed to create {}", path.display()))?;

    let level = if verbose { LevelFilter::Debug } else { LevelFilter::Info };
    let logger = DualLogger {
        level,
        file: Mutex::new(BufWriter::new(file)),
    };
    log::set_boxed_logger(Box::new(logger)).context("logger already initialised")?;
    log::set_max_level(level);

    eprintln!("Log: {}", path.display());
    Ok(path)
}
