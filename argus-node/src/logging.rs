use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::Result;
use log::LevelFilter;

/// Initialize logging with optional file output and configurable log level
pub fn init_logging(
    logs_path: Option<PathBuf>,
    logs_enabled: Option<bool>,
    log_level: Option<String>,
) -> Result<()> {
    let save_logs = logs_enabled.unwrap_or(true);

    let level_str = log_level.unwrap_or_else(|| "info".to_string());
    let level_filter = match level_str.to_lowercase().as_str() {
        "error" => LevelFilter::Error,
        "warn" | "warning" => LevelFilter::Warn,
        "info" => LevelFilter::Info,
        "debug" => LevelFilter::Debug,
        "trace" => LevelFilter::Trace,
        _ => LevelFilter::Info,
    };

    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&level_str));
    builder.filter_level(level_filter);

    if save_logs {
        if let Some(logs_dir) = logs_path {
            std::fs::create_dir_all(&logs_dir)?;

            let log_file_path = logs_dir.join("argus.log");
            let log_file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&log_file_path)?;

            builder.target(env_logger::Target::Pipe(Box::new(DualWriter::new(log_file))));
            builder.init();

            log::info!(
                "Logging to terminal and {} (level: {})",
                log_file_path.display(),
                level_str
            );
            return Ok(());
        }
    }

    builder.init();
    log::info!("Logging to terminal only (level: {})", level_str);
    Ok(())
}

/// A writer that writes to both a file and stdout
struct DualWriter {
    file: std::fs::File,
}

impl DualWriter {
    fn new(file: std::fs::File) -> Self {
        Self { file }
    }
}

impl Write for DualWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write_all(buf)?;
        io::stdout().write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()?;
        io::stdout().flush()?;
        Ok(())
    }
}
