//! Logger setup on top of `env_logger`.
//!
//! `RUST_LOG` takes precedence over the configured level. The `json` format
//! writes one object per line for log aggregation.

use std::{io::Write, str::FromStr};

use env_logger::{Builder, Env};

/// Log line format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" | "pretty" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format {other:?}, expected \"text\" or \"json\"")),
        }
    }
}

/// Installs the global logger.
pub fn init(level: &str, format: LogFormat) -> Result<(), log::SetLoggerError> {
    let mut builder = Builder::from_env(Env::default().default_filter_or(level));
    if format == LogFormat::Json {
        builder.format(|buf, record| {
            let line = serde_json::json!({
                "timestamp": buf.timestamp_millis().to_string(),
                "level": record.level().as_str(),
                "target": record.target(),
                "message": record.args().to_string(),
            });
            writeln!(buf, "{line}")
        });
    }
    builder.try_init()
}
