//! Command-line argument parsing, overriding the environment-variable
//! configuration the server otherwise reads at startup.

use std::path::PathBuf;

use clap::Parser;

use crate::logging::LogFormat;

#[derive(Parser, Debug)]
#[command(name = "infractl")]
#[command(about = "Infrastructure lifecycle tool server driving OpenTofu-compatible provider plugins")]
#[command(long_about = None)]
#[command(version)]
pub struct Cli {
    /// Directory containing the durable state store file, overrides `DB_DIR`.
    #[arg(long, env = "DB_DIR")]
    pub db_dir: Option<PathBuf>,

    /// Root directory for the Provider Binary Cache, overrides `TMP_DIR`.
    #[arg(long, env = "TMP_DIR")]
    pub tmp_dir: Option<PathBuf>,

    /// Log rendering format, overrides `INFRACTL_LOG_FORMAT`.
    #[arg(long, env = "INFRACTL_LOG_FORMAT", default_value = "text", value_enum)]
    pub log_format: LogFormat,
}

/// Parses `argv`, exiting the process on `--help`/`--version`/a parse error,
/// matching `clap`'s default behavior.
#[must_use]
pub fn parse() -> Cli {
    Cli::parse()
}
