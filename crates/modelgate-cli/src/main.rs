use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use modelgate::config::Settings;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;
mod tools;

use commands::chat::ChatOptions;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Settings file (defaults to ./modelgate.toml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show which provider serves a model identifier
    Route {
        /// Model identifier or alias
        model: String,
    },

    /// List configured providers, their models and aliases
    Models,

    /// Send a prompt through the gateway and stream the answer
    Chat {
        /// Model identifier or alias
        #[arg(short, long)]
        model: String,

        /// System instruction for the conversation
        #[arg(short, long)]
        system: Option<String>,

        #[arg(long)]
        temperature: Option<f64>,

        #[arg(long)]
        max_tokens: Option<u32>,

        /// Do not offer the built-in tools to the model
        #[arg(long)]
        no_tools: bool,

        /// Prompt to send; starts an interactive session when omitted
        prompt: Option<String>,
    },

    /// Print the version
    Version,
}

fn init_logging() {
    let filter =
        EnvFilter::try_from_env("MODELGATE_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_logging();

    let cli = Cli::parse();
    let load = || {
        Settings::load(cli.config.as_deref()).context("failed to load modelgate settings")
    };

    match cli.command {
        Command::Route { ref model } => commands::route::execute(&load()?, model),
        Command::Models => commands::models::execute(&load()?),
        Command::Chat {
            ref model,
            ref system,
            temperature,
            max_tokens,
            no_tools,
            ref prompt,
        } => {
            let options = ChatOptions {
                model: model.clone(),
                system: system.clone(),
                temperature,
                max_tokens,
                tools: !no_tools,
            };
            commands::chat::execute(&load()?, options, prompt.clone()).await
        }
        Command::Version => commands::version::execute(),
    }
}
