use anyhow::{anyhow, Result};
use clap::Parser;
use mend::config::{setup_api_key_interactive, Config, PipelineConfig};
use mend::github::GhCli;
use mend::lang;
use mend::llm::client::{EmbeddingClient, OracleClient};
use mend::pipeline::{Pipeline, RunOutcome};
use mend::sandbox::DockerSandbox;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(
    name = "mend",
    about = "An autonomous issue-fixing pipeline for your repository",
    version
)]
struct Args {
    /// Issue number to resolve
    #[arg(required_unless_present = "setup")]
    issue: Option<u64>,

    /// Path to the repository (defaults to current directory)
    #[arg(short, long, default_value = ".")]
    path: PathBuf,

    /// Maximum review/regenerate iterations before publishing the best attempt
    #[arg(long, default_value = "3")]
    review_iterations: u32,

    /// Maximum test/repair rounds before publishing with a failure flag
    #[arg(long, default_value = "3")]
    max_repairs: u32,

    /// Wall-clock timeout for one sandboxed test run, in seconds
    #[arg(long, default_value = "300")]
    test_timeout: u64,

    /// Override the Docker image used for the test sandbox
    #[arg(long)]
    image: Option<String>,

    /// Override the shell command run inside the sandbox
    #[arg(long)]
    test_command: Option<String>,

    /// Override the chat model id
    #[arg(long)]
    model: Option<String>,

    /// Skip the sandboxed verification loop
    #[arg(long)]
    no_sandbox: bool,

    /// Do everything locally: no push, no PR
    #[arg(long)]
    no_push: bool,

    /// Rebuild the chunk index even when a cached one exists
    #[arg(long)]
    reindex: bool,

    /// Interactively store the API key and exit
    #[arg(long)]
    setup: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.setup {
        setup_api_key_interactive().map_err(|e| anyhow!(e))?;
        return Ok(());
    }

    let issue_id = args
        .issue
        .ok_or_else(|| anyhow!("An issue number is required"))?;
    let repo_path = args.path.canonicalize()?;

    let mut user_config = Config::load();
    let api_key = user_config
        .get_api_key()
        .ok_or_else(|| anyhow!("No API key configured. Run 'mend --setup' to get started."))?;

    let project_kind = lang::detect_project_kind(&repo_path);
    eprintln!("  Project: {}", project_kind.name());

    let mut config = PipelineConfig::for_project(project_kind);
    config.max_review_iterations = args.review_iterations;
    config.max_repairs = args.max_repairs;
    config.test_timeout = Duration::from_secs(args.test_timeout);
    config.sandbox_enabled = !args.no_sandbox;
    config.push_enabled = !args.no_push;
    config.force_reindex = args.reindex;
    if let Some(image) = args.image {
        config.docker_image = image;
    }
    if let Some(test_command) = args.test_command {
        config.test_command = test_command;
    }
    config.model = args.model.unwrap_or_else(|| user_config.chat_model());

    let oracle = OracleClient::new(
        api_key.clone(),
        config.model.clone(),
        user_config.chat_endpoint.clone(),
    );
    let embedder = EmbeddingClient::new(
        Some(api_key),
        user_config.embedding_model(),
        user_config.embeddings_endpoint.clone(),
    );
    let host = GhCli::new(&repo_path)?;
    let tester = DockerSandbox::new(
        config.docker_image.clone(),
        config.test_command.clone(),
        config.test_timeout,
    );

    let mut pipeline = Pipeline::new(&repo_path, config, &oracle, &host, &tester, embedder)?;
    let outcome = pipeline.run(issue_id).await?;

    println!();
    match outcome {
        RunOutcome::NothingToFix => {
            println!("  Nothing to fix for issue #{}.", issue_id);
        }
        RunOutcome::Published {
            pr_url,
            tests_passed,
            review_approved,
        } => {
            match pr_url {
                Some(url) => println!("  Published: {}", url),
                None => println!("  Changes committed locally (no PR opened)."),
            }
            match tests_passed {
                Some(true) => println!("  Tests: passing"),
                Some(false) => println!("  Tests: FAILING (flagged on the PR)"),
                None => println!("  Tests: skipped"),
            }
            if !review_approved {
                println!("  Review: outstanding concerns recorded");
            }
        }
    }

    Ok(())
}
