//! TABULA command line entry point.

use serde_json::json;
use tabula_client::{init_tracing, Tabula};
use tabula_core::{ConfigError, TabulaConfig, TabulaError, TabulaResult};

const USAGE: &str = "usage: tabula [--config PATH] <command>

commands:
  names [TERM]    list indexed names, or those sharing TERM's first word
  codes NAME      codes recorded for NAME
  prices NAME     price history for NAME across all resources
  info            import metadata of the newest resource
  status          derived index status
  clear-cache     remove every cached response";

enum Command {
    Names(Option<String>),
    Codes(String),
    Prices(String),
    Info,
    Status,
    ClearCache,
}

#[tokio::main]
async fn main() -> TabulaResult<()> {
    let config = match TabulaConfig::load() {
        Ok(config) => config,
        Err(ConfigError::MissingConfigPath) => {
            let config = TabulaConfig::default();
            config.validate()?;
            config
        }
        Err(err) => return Err(err.into()),
    };
    init_tracing(&config.telemetry)?;

    let command = match parse_command(std::env::args().skip(1).collect()) {
        Some(command) => command,
        None => {
            eprintln!("{}", USAGE);
            std::process::exit(2);
        }
    };

    let tabula = Tabula::open(&config)?;
    run(&tabula, command).await
}

fn parse_command(args: Vec<String>) -> Option<Command> {
    let mut positional = Vec::new();
    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        if arg == "--config" {
            args.next();
            continue;
        }
        positional.push(arg);
    }

    let mut positional = positional.into_iter();
    let command = positional.next()?;
    let rest: Vec<String> = positional.collect();
    let joined = (!rest.is_empty()).then(|| rest.join(" "));

    match command.as_str() {
        "names" => Some(Command::Names(joined)),
        "codes" => joined.map(Command::Codes),
        "prices" => joined.map(Command::Prices),
        "info" => Some(Command::Info),
        "status" => Some(Command::Status),
        "clear-cache" => Some(Command::ClearCache),
        _ => None,
    }
}

async fn run(tabula: &Tabula, command: Command) -> TabulaResult<()> {
    if !matches!(command, Command::ClearCache) {
        tabula.index.warm_up().await?;
    }

    match command {
        Command::Names(term) => {
            let names = match term {
                Some(term) => tabula.index.names_matching_base(&term).await?,
                None => tabula.index.all_names().await?,
            };
            print(&json!(names))
        }
        Command::Codes(name) => {
            let codes = tabula.index.lookup(&name).await?;
            print(&json!(codes))
        }
        Command::Prices(name) => {
            let result = tabula.prices.prices_for_names(&[name], None).await?;
            for failure in &result.failures {
                eprintln!(
                    "warning: query for `{}` on {} failed: {}",
                    failure.item, failure.resource.id, failure.error
                );
            }
            print(&json!(result.records))
        }
        Command::Info => print(&tabula.prices.dataset_info().await?),
        Command::Status => {
            let status = tabula.index.status()?;
            print(&json!({
                "state": status.state,
                "built_at": status.built_at,
                "names": status.names,
                "rebuilds": status.rebuilds,
                "failures": status.failures,
                "last_error": status.last_error.map(|e| e.to_string()),
            }))
        }
        Command::ClearCache => {
            let removed = tabula.executor.cache().clear().await?;
            tracing::info!(removed, "cache cleared");
            print(&json!({ "removed": removed }))
        }
    }
}

fn print(value: &serde_json::Value) -> TabulaResult<()> {
    let text = serde_json::to_string_pretty(value).map_err(|e| TabulaError::Validation {
        field: "output".to_string(),
        reason: e.to_string(),
    })?;
    println!("{}", text);
    Ok(())
}
