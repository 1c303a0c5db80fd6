//! Resource Cache - command-line tooling for resource definitions and cache snapshots

use std::path::Path;
use std::process::ExitCode;

use clap::Parser;
use serde_json::Value;
use tracing::{debug, error};

use resource_cache::{
    ResourceCache,
    cli::{Cli, Command},
    config::Config,
    definition::load_definition_file,
    derive_key, setup_tracing,
    store::CacheState,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("❌ Failed to load config: {e}");
            return ExitCode::FAILURE;
        }
    };

    let level = cli.log_level.as_deref().unwrap_or(&config.log.level);
    let format = cli.log_format.unwrap_or(config.log.format);
    if let Err(e) = setup_tracing(level, format) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    let cache = match ResourceCache::from_config(&config) {
        Ok(cache) => cache,
        Err(e) => {
            eprintln!("❌ Invalid cache configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    match cli.command {
        Command::Normalize { file } => run_normalize(&cache, &file).await,
        Command::Key {
            method,
            url,
            headers,
            body,
        } => run_key(&method, &url, &headers, &body),
        Command::Resolve { file, state } => run_resolve(cache, &file, &state).await,
    }
}

/// Print the normalized definition
async fn run_normalize(cache: &ResourceCache, file: &Path) -> ExitCode {
    let definition = match load_definition_file(file).await.and_then(|raw| cache.define(raw)) {
        Ok(definition) => definition,
        Err(e) => {
            error!(file = %file.display(), error = %e, "Normalization failed");
            eprintln!("❌ {}: {e}", file.display());
            return ExitCode::FAILURE;
        }
    };

    print_json(&definition)
}

/// Print the request key for a request shape
fn run_key(method: &str, url: &str, headers: &str, body: &str) -> ExitCode {
    let parse = |label: &str, text: &str| {
        serde_json::from_str::<Value>(text).map_err(|e| format!("--{label} is not valid JSON: {e}"))
    };
    let (headers, body) = match (parse("headers", headers), parse("body", body)) {
        (Ok(headers), Ok(body)) => (headers, body),
        (Err(e), _) | (_, Err(e)) => {
            eprintln!("❌ {e}");
            return ExitCode::FAILURE;
        }
    };

    println!("{}", derive_key(&method.to_ascii_uppercase(), url, &headers, &body));
    ExitCode::SUCCESS
}

/// Resolve a definition against a saved snapshot
async fn run_resolve(cache: ResourceCache, file: &Path, state_path: &Path) -> ExitCode {
    let state = match tokio::fs::read_to_string(state_path).await {
        Ok(content) => match serde_json::from_str::<CacheState>(&content) {
            Ok(state) => state,
            Err(e) => {
                eprintln!("❌ Invalid cache state {}: {e}", state_path.display());
                return ExitCode::FAILURE;
            }
        },
        Err(e) => {
            eprintln!("❌ Failed to read {}: {e}", state_path.display());
            return ExitCode::FAILURE;
        }
    };
    debug!(requests = state.requests.len(), "Loaded cache state");

    let cache = cache.with_state(state);
    let definition = match load_definition_file(file).await.and_then(|raw| cache.define(raw)) {
        Ok(definition) => definition,
        Err(e) => {
            eprintln!("❌ {}: {e}", file.display());
            return ExitCode::FAILURE;
        }
    };

    print_json(&cache.resolve(&definition))
}

fn print_json<T: serde::Serialize>(value: &T) -> ExitCode {
    match serde_json::to_string_pretty(value) {
        Ok(json) => {
            println!("{json}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("❌ Failed to serialize to JSON: {e}");
            ExitCode::FAILURE
        }
    }
}
