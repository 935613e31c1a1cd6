use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use exloapi_core_sdk::prelude::*;
use exloapi_core_sdk::{server, telemetry};

/**
 * \brief CLI entry: manage providers, send a one-off request, or run the gateway.
 */
#[derive(Parser, Debug)]
#[command(name = "exloapi", version, about = "LLM provider registry and chat-completion gateway")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /**
     * \brief Register a provider (inactive until `activate`).
     */
    Add {
        #[arg(long)]
        base_url: String,
        #[arg(long)]
        api_key: String,
        #[arg(long)]
        model: String,
        #[arg(long)]
        label: Option<String>,
    },

    /**
     * \brief Replace a provider's fields; the active flag is left as is.
     * \details Omitting `--api-key` keeps the stored key.
     */
    Edit {
        id: i64,
        #[arg(long)]
        base_url: String,
        #[arg(long)]
        api_key: Option<String>,
        #[arg(long)]
        model: String,
        #[arg(long)]
        label: Option<String>,
    },

    /** \brief Delete a provider. */
    Remove { id: i64 },

    /** \brief List providers with masked keys. */
    List,

    /** \brief Make a provider the single active one. */
    Activate { id: i64 },

    /** \brief Show the active provider. */
    Active,

    /**
     * \brief Send one message through the gateway and print the upstream body.
     */
    Send {
        #[arg(long)]
        message: String,
        #[arg(long)]
        model: Option<String>,
    },

    /**
     * \brief Start the HTTP gateway and serve the frontend build.
     */
    Serve {
        #[arg(long, default_value = "127.0.0.1:3001")]
        addr: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env().context("load configuration failed")?;
    let _log_guard = telemetry::init(config.log_dir.as_deref()).context("init logging failed")?;

    let store: Arc<dyn ProviderStore> = Arc::new(
        SqliteProviderStore::open(&config.db_path)
            .with_context(|| format!("open database {} failed", config.db_path.display()))?,
    );
    let gateway =
        ForwardingGateway::new(config.gateway.clone()).context("build gateway failed")?;
    let facade = GatewayFacade::from_store(store.clone(), gateway);

    match cli.command {
        Commands::Add {
            base_url,
            api_key,
            model,
            label,
        } => {
            let entry = NewProvider {
                base_url,
                api_key,
                model,
                label,
            };
            let id = store.add(&entry).context("save provider failed")?;
            println!("Saved provider id={} ({} | {})", id, entry.base_url, entry.model);
        }
        Commands::Edit {
            id,
            base_url,
            api_key,
            model,
            label,
        } => {
            let Some(stored) = store.get(id).context("load provider failed")? else {
                println!("No provider with id={}", id);
                return Ok(());
            };
            let mut entry = NewProvider {
                base_url,
                api_key: api_key.unwrap_or_default(),
                model,
                label,
            };
            entry.keep_stored_key(&stored);
            store.update(id, &entry).context("edit provider failed")?;
            println!("Updated provider id={}", id);
        }
        Commands::Remove { id } => {
            if store.delete(id).context("delete provider failed")? {
                println!("Deleted provider id={}", id);
            } else {
                println!("No provider with id={}", id);
            }
        }
        Commands::List => {
            for p in store.list().context("list providers failed")? {
                println!(
                    "{} {:<3} {} | {} | {} | {}",
                    if p.is_active { "*" } else { " " },
                    p.id,
                    p.label.as_deref().unwrap_or("-"),
                    p.base_url,
                    p.model,
                    p.masked_api_key()
                );
            }
        }
        Commands::Activate { id } => {
            let activation = facade.selector().activate(id)?;
            if activation.changed {
                println!("Provider id={} is now active", id);
            } else {
                println!("Provider id={} was already active", id);
            }
        }
        Commands::Active => match facade.selector().get_active()? {
            Some(p) => println!("{} | {} | {}", p.id, p.base_url, p.model),
            None => println!("No active provider"),
        },
        Commands::Send { message, model } => {
            let mut payload = serde_json::json!({ "message": message });
            if let Some(model) = model {
                payload["model"] = serde_json::Value::String(model);
            }
            let upstream = facade.complete(&payload).await?;
            if let Some(kind) = upstream.error_kind() {
                tracing::warn!(status = %upstream.status, kind = kind.code(), "upstream rejected the request");
            }
            println!("{}", String::from_utf8_lossy(&upstream.body));
        }
        Commands::Serve { addr } => {
            let ui_dir = config.ui_dir.clone();
            server::run(&addr, AppState::new(store, facade), Some(ui_dir.as_path())).await?;
        }
    }

    Ok(())
}
