use anyhow::Result;
use serde::Deserialize;
use std::fs::OpenOptions;
use tracing_subscriber::{
    fmt::{self, writer::MakeWriterExt},
    prelude::*,
    EnvFilter, Registry,
};

#[derive(Debug, Deserialize, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    #[default]
    Plain,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    #[default]
    Stdout,
    File,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "kebab-case", default)]
pub struct LogConfig {
    /// Filter directives, e.g. `"info"` or `"walletmesh_router=debug,info"`.
    /// `RUST_LOG` takes precedence when set.
    pub filter: String,
    pub format: LogFormat,
    pub output: LogOutput,
    pub file_path: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: "info".into(),
            format: LogFormat::default(),
            output: LogOutput::default(),
            file_path: None,
        }
    }
}

/// Installs the global subscriber. Call once, early.
pub fn init(config: &LogConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = Registry::default().with(filter);

    match config.output {
        LogOutput::File => {
            let file_path = config.file_path.as_deref().ok_or_else(|| {
                anyhow::anyhow!("Log output is 'file' but 'file-path' is not specified")
            })?;
            let log_file = OpenOptions::new().create(true).append(true).open(file_path)?;
            let writer = log_file.with_max_level(tracing::Level::TRACE);
            match config.format {
                LogFormat::Json => subscriber.with(fmt::layer().with_writer(writer).json()).init(),
                LogFormat::Plain => subscriber.with(fmt::layer().with_writer(writer)).init(),
            }
        }
        LogOutput::Stdout => match config.format {
            LogFormat::Json => subscriber.with(fmt::layer().json()).init(),
            LogFormat::Plain => subscriber.with(fmt::layer().pretty()).init(),
        },
    };

    Ok(())
}
