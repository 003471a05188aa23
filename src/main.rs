mod application;
mod cli;
mod config;
mod infrastructure;

pub use application::{agent, tooling};
pub use infrastructure::{model, retrieval};

use agent::{Agent, LimitOverrides};
use clap::Parser;
use cli::{Cli, RunMode};
use config::AppConfig;
use model::GeminiClient;
use retrieval::{CorpusClient, KnowledgeRetriever, UnconfiguredRetriever};
use serde_json::json;
use std::error::Error;
use std::io::{self, IsTerminal, Read};
use std::path::Path;
use std::sync::Arc;
use tooling::{ProviderRegistry, RegistrySettings, StdioTransport, ToolDispatch};
use tracing::{debug, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let _ = dotenvy::dotenv();
    init_tracing();
    info!("Starting ariadne");

    let args = Cli::parse();
    debug!(?args.mode, config = ?args.config, "CLI arguments parsed");
    let config_path = args.config.as_deref().map(Path::new);
    let config = AppConfig::load(config_path)?;
    if let Some(path) = config_path {
        info!(path = %path.display(), "Loaded configuration from file");
    } else {
        info!("Loaded configuration using default path or defaults");
    }

    let tenant_id = args.tenant.clone().or_else(|| config.tenant_id.clone());
    let registry = Arc::new(ProviderRegistry::new(RegistrySettings { tenant_id }));
    for provider in &config.providers {
        registry.register(
            provider.clone(),
            Arc::new(StdioTransport::new(provider.clone())),
        );
    }
    registry.connect_all().await;

    let inference = Arc::new(GeminiClient::from_config(&config.inference));
    let retriever: Arc<dyn KnowledgeRetriever> = match &config.retrieval {
        Some(retrieval) => Arc::new(CorpusClient::from_config(retrieval)),
        None => {
            warn!("No retrieval endpoint configured; knowledge queries will be unavailable");
            Arc::new(UnconfiguredRetriever)
        }
    };

    match args.mode {
        RunMode::Tools => {
            let catalog = registry.list_all_tools();
            println!("{}", serde_json::to_string_pretty(&catalog)?);
        }
        RunMode::Probe => {
            use model::InferenceProvider;
            let inference_ok = inference.test_connection().await;
            let retrieval_ok = retriever.test_connection().await;
            println!(
                "{}",
                serde_json::to_string_pretty(&json!({
                    "inference": inference_ok,
                    "retrieval": retrieval_ok,
                }))?
            );
        }
        RunMode::Query => {
            let query = load_query(&args)?;
            let dispatch: Arc<dyn ToolDispatch> = registry.clone();
            let mut agent = Agent::new(inference, dispatch, retriever);
            let mut overrides = config.limits.clone();
            if let Some(max_steps) = args.max_steps {
                overrides = LimitOverrides {
                    max_steps: Some(max_steps),
                    ..overrides
                };
            }
            agent.set_limits(&overrides);

            info!("Dispatching query through the agent loop");
            let report = agent.execute_query(&query).await;
            println!(
                "{}",
                serde_json::to_string_pretty(&json!({
                    "run_id": report.run_id,
                    "answer": report.answer,
                    "state": report.state,
                    "steps": report.steps,
                }))?
            );
        }
    }

    registry.disconnect_all().await;
    info!("Client execution finished");
    Ok(())
}

fn init_tracing() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_level(true)
            .init();
    });
}

fn load_query(args: &Cli) -> Result<String, Box<dyn Error>> {
    if let Some(path) = &args.query_file {
        info!(path = %path, "Loading query from file");
        let content = std::fs::read_to_string(path)?;
        return Ok(content.trim().to_string());
    }

    if !args.query.is_empty() {
        return Ok(args.query.join(" ").trim().to_string());
    }

    if !io::stdin().is_terminal() {
        info!("Reading query from standard input");
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        return Ok(buffer.trim().to_string());
    }

    warn!("Query not provided via arguments, file, or stdin");
    Err("query required via arguments, file, or stdin".into())
}
