mod ad_policy;
mod api_client;
mod auth;
mod config;
mod data;
mod error;
mod fetch;
mod gaql;
mod payload;
mod report;
mod report_config;
mod runner;
mod server;
mod warehouse;

use clap::{Parser, Subcommand};
use config::Config;
use env_logger::Env;
use error::Error;
use log::error;
use payload::{RequestSchema, AD_POLICY_DATA_SCHEMA, POLICY_MONITOR_SCHEMA};
use runner::LiveClients;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};

#[derive(Parser)]
struct Args {
    #[command(flatten)]
    config: Config,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the configured policy reports once.
    PolicyMonitor {
        #[arg(help = "JSON file holding the trigger payload")]
        payload_file: PathBuf,
    },

    /// Export every ad with its policy topic entries once.
    AdPolicyData {
        #[arg(help = "JSON file holding the trigger payload")]
        payload_file: PathBuf,
    },

    /// Serve both pipelines as HTTP triggers.
    Serve {
        #[arg(long, default_value = "0.0.0.0", env = "HOST")]
        host: String,

        #[arg(long, default_value_t = 8080, env = "PORT")]
        port: u16,
    },
}

fn read_payload<T: DeserializeOwned>(path: &Path, schema: &RequestSchema) -> Result<T, Error> {
    let raw = std::fs::read_to_string(path)?;
    schema.parse(serde_json::from_str(&raw)?)
}

async fn run(args: Args) -> Result<(), Error> {
    match args.command {
        Command::PolicyMonitor { payload_file } => {
            let payload = read_payload(&payload_file, &POLICY_MONITOR_SCHEMA)?;
            let clients = LiveClients::new(args.config.clone());
            runner::run_policy_monitor(&args.config, &clients, payload).await
        }
        Command::AdPolicyData { payload_file } => {
            let payload = read_payload(&payload_file, &AD_POLICY_DATA_SCHEMA)?;
            let clients = LiveClients::new(args.config.clone());
            runner::run_ad_policy_data(&args.config, &clients, payload).await
        }
        Command::Serve { host, port } => server::serve(args.config, &host, port).await,
    }
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let args = Args::parse();

    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    if let Err(err) = run(args).await {
        error!("failed to run: {}", err);
        std::process::exit(1);
    }

    Ok(())
}
