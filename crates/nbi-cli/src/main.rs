//! `nbi` - stage notebook messages into a durable store and inspect it

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use nbi_core::{
    init_tracing, CommandOutput, HostError, InboundMessage, IngestConfig, IngestService, LogFormat,
    NotebookHost,
};
use nbi_store::{FsStore, PersistentStore};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;

/// Host with no UI: no commands, no documents, no local storage
#[derive(Debug, Default)]
struct HeadlessHost;

#[async_trait]
impl NotebookHost for HeadlessHost {
    fn has_command(&self, _command: &str) -> bool {
        false
    }

    async fn execute(&self, command: &str, _args: Value) -> Result<CommandOutput, HostError> {
        Err(HostError::UnknownCommand(command.to_string()))
    }

    fn current_document(&self) -> Option<nbi_core::DocumentHandle> {
        None
    }

    fn set_local_item(&self, key: &str, _value: &str) -> Result<(), HostError> {
        Err(HostError::LocalStorage {
            key: key.to_string(),
            message: "no local storage in headless mode".to_string(),
        })
    }
}

fn root_arg() -> Arg {
    Arg::new("root")
        .long("root")
        .required(true)
        .value_parser(value_parser!(PathBuf))
        .help("Directory holding the store databases")
}

fn config_arg() -> Arg {
    Arg::new("config")
        .long("config")
        .value_parser(value_parser!(PathBuf))
        .help("TOML configuration file")
}

fn cli() -> Command {
    Command::new("nbi")
        .version(nbi_core::VERSION)
        .about("Notebook ingest pipeline tools")
        .subcommand_required(true)
        .arg(
            Arg::new("json-logs")
                .long("json-logs")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON lines"),
        )
        .subcommand(
            Command::new("stage")
                .about("Validate a load-notebook message and persist its notebook")
                .arg(root_arg())
                .arg(config_arg())
                .arg(
                    Arg::new("message")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("Message JSON file, or - for stdin"),
                ),
        )
        .subcommand(
            Command::new("inspect")
                .about("List keys in a store, or print one record")
                .arg(root_arg())
                .arg(config_arg())
                .arg(
                    Arg::new("database")
                        .long("database")
                        .help("Database name (defaults to the configured one)"),
                )
                .arg(
                    Arg::new("store")
                        .long("store")
                        .help("Store name (defaults to the configured one)"),
                )
                .arg(Arg::new("key").help("Record key")),
        )
        .subcommand(
            Command::new("config")
                .about("Print the effective configuration")
                .arg(config_arg()),
        )
}

fn load_config(args: &ArgMatches) -> Result<IngestConfig> {
    match args.get_one::<PathBuf>("config") {
        Some(path) => IngestConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display())),
        None => Ok(IngestConfig::default()),
    }
}

fn read_message(path: &PathBuf) -> Result<Value> {
    let text = if path.as_os_str() == "-" {
        std::io::read_to_string(std::io::stdin()).context("reading message from stdin")?
    } else {
        std::fs::read_to_string(path)
            .with_context(|| format!("reading message from {}", path.display()))?
    };
    serde_json::from_str(&text).context("message is not valid JSON")
}

fn store_at(args: &ArgMatches) -> Result<FsStore> {
    let root = args
        .get_one::<PathBuf>("root")
        .context("--root is required")?;
    Ok(FsStore::new(root.clone()))
}

async fn stage(args: &ArgMatches, config: IngestConfig) -> Result<()> {
    let message = read_message(args.get_one::<PathBuf>("message").context("missing message")?)?;

    let request = match InboundMessage::parse(&message)? {
        InboundMessage::LoadNotebook(request) => request,
        InboundMessage::Ignored { message_type } => {
            bail!("not a load-notebook message (type: {message_type:?})")
        }
    };

    let store: Arc<dyn PersistentStore> = Arc::new(store_at(args)?);
    let service = IngestService::new(store, Arc::new(HeadlessHost), config);
    let staged = service.stage(request).await?;

    let aux: Vec<Value> = staged
        .aux
        .iter()
        .map(|outcome| match outcome {
            nbi_core::AuxOutcome::Stored { kind, handle } => {
                json!({"kind": kind.to_string(), "stored": handle.to_string()})
            }
            nbi_core::AuxOutcome::Failed { kind, reason } => {
                json!({"kind": kind.to_string(), "error": reason})
            }
        })
        .collect();

    let summary = json!({
        "request_id": staged.request_id.to_string(),
        "path": staged.artifact.path,
        "size": staged.artifact.size,
        "stored": staged.handle.to_string(),
        "aux": aux,
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

async fn inspect(args: &ArgMatches, config: IngestConfig) -> Result<()> {
    let store = store_at(args)?;
    let database = args
        .get_one::<String>("database")
        .unwrap_or(&config.database_name);
    let store_name = args
        .get_one::<String>("store")
        .unwrap_or(&config.store_name);

    let Some(schema) = store.schema(database).await? else {
        bail!("database '{database}' does not exist");
    };
    eprintln!(
        "{database} v{} stores: {}",
        schema.version,
        schema.store_names().join(", ")
    );
    if !schema.contains(store_name) {
        bail!("store '{store_name}' does not exist in '{database}'");
    }

    let handle = store.open(database, store_name).await?;
    match args.get_one::<String>("key") {
        Some(key) => {
            let record = store
                .get(&handle, key)
                .await?
                .with_context(|| format!("no record '{key}' in {handle}"))?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        None => {
            for key in store.keys(&handle).await? {
                println!("{key}");
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli().get_matches();

    let format = if matches.get_flag("json-logs") {
        LogFormat::Json
    } else {
        LogFormat::Pretty
    };

    let Some((name, args)) = matches.subcommand() else {
        bail!("no subcommand given");
    };
    let config = load_config(args)?;
    init_tracing(&config.log_filter, format);
    tracing::debug!(command = name, "starting");

    match name {
        "stage" => stage(args, config).await,
        "inspect" => inspect(args, config).await,
        "config" => {
            print!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
        other => bail!("unknown subcommand '{other}'"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        cli().debug_assert();
    }

    #[test]
    fn stage_requires_root_and_message() {
        assert!(cli().try_get_matches_from(["nbi", "stage", "m.json"]).is_err());
        let matches = cli()
            .try_get_matches_from(["nbi", "stage", "--root", "/tmp/s", "m.json"])
            .unwrap();
        let (name, args) = matches.subcommand().unwrap();
        assert_eq!(name, "stage");
        assert_eq!(
            args.get_one::<PathBuf>("message").unwrap(),
            &PathBuf::from("m.json")
        );
    }

    #[tokio::test]
    async fn headless_host_has_no_commands() {
        let host = HeadlessHost;
        assert!(!host.has_command("docmanager:open"));
        assert!(host.execute("docmanager:open", json!({})).await.is_err());
        assert!(host.set_local_item("bearerToken", "t").is_err());
    }
}
