//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::LogFormat;

/// Resource cache tooling - normalize definitions, derive request keys, resolve against a saved state
#[derive(Parser, Debug)]
#[command(name = "resource-cache")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "RESOURCE_CACHE_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(long, env = "RESOURCE_CACHE_LOG_LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Log format; overrides the config file
    #[arg(long, value_enum, env = "RESOURCE_CACHE_LOG_FORMAT", global = true)]
    pub log_format: Option<LogFormat>,

    /// Subcommand
    #[command(subcommand)]
    pub command: Command,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Normalize a resource definition and print it as JSON
    Normalize {
        /// Path to definition file (YAML or JSON)
        #[arg(required = true)]
        file: PathBuf,
    },

    /// Derive the request key for a request shape
    Key {
        /// HTTP method
        #[arg(short, long, default_value = "GET")]
        method: String,

        /// Request URL
        #[arg(short, long)]
        url: String,

        /// Headers as a JSON object
        #[arg(long, default_value = "{}")]
        headers: String,

        /// Body as JSON
        #[arg(long, default_value = "null")]
        body: String,
    },

    /// Resolve a definition against a serialized cache state
    Resolve {
        /// Path to definition file (YAML or JSON)
        #[arg(required = true)]
        file: PathBuf,

        /// Path to cache state JSON
        #[arg(short, long)]
        state: PathBuf,
    },
}
