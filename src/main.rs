//! Sandbox Agent - CLI entry point
//!
//! Runs one prompt through the agent loop and prints the model's final answer.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use sandbox_agent::agent::{Agent, StopReason};
use sandbox_agent::config::Config;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const USAGE: &str = "Usage: sandbox-agent <prompt> [--verbose]";

#[derive(Debug, Parser)]
#[command(name = "sandbox-agent", version, about = "Run a prompt through a sandboxed coding agent")]
struct Cli {
    /// What to ask the agent
    prompt: Option<String>,

    /// Log full tool arguments and print token usage
    #[arg(long)]
    verbose: bool,

    /// Model identifier (overrides GEMINI_MODEL)
    #[arg(long)]
    model: Option<String>,

    /// Working root for all tools (overrides WORKSPACE_PATH)
    #[arg(long)]
    workspace: Option<PathBuf>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let Some(prompt) = cli.prompt else {
        eprintln!("{}", USAGE);
        std::process::exit(1);
    };

    // Diagnostics go to stderr so stdout carries only the answer.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sandbox_agent=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let mut config = Config::from_env()?;
    if let Some(model) = cli.model {
        config.model = model;
    }
    if let Some(workspace) = cli.workspace {
        config.workspace_path = workspace;
    }
    config.verbose |= cli.verbose;

    info!(
        "Loaded configuration: model={}, workspace={}",
        config.model,
        config.workspace_path.display()
    );

    let agent = Agent::from_config(config.clone()).with_context(|| {
        format!(
            "Cannot use {} as the working directory",
            config.workspace_path.display()
        )
    })?;

    let outcome = agent.run_task(&prompt).await?;

    match (&outcome.final_text, outcome.stop_reason) {
        (Some(text), _) => println!("{}", text),
        (None, StopReason::IterationLimit) => println!(
            "Stopped after {} iterations without a final response.",
            config.max_iterations
        ),
        (None, StopReason::Completed) => println!("The model returned no text."),
    }

    if config.verbose {
        println!("User prompt: {}", prompt);
        if let Some(usage) = outcome.usage {
            println!("Prompt tokens: {}", usage.prompt_tokens);
            println!("Response tokens: {}", usage.response_tokens);
        }
    }

    Ok(())
}
