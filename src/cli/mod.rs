//! Jacobine CLI - dispatcher for the pipeline processes
//!
//! One binary runs every role: `jacobine produce` seeds the pipeline from
//! the upstream release feed and exits; `jacobine consume` runs a single
//! stage consumer until a shutdown signal interrupts it at a delivery
//! boundary. Exit code 0 means a clean shutdown; initialisation failures
//! and broker connection loss exit non-zero and an external supervisor
//! restarts the process.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::sync::Mutex;
use tracing::info;

use jacobine_core::config::{Config, ProjectSettings};
use jacobine_core::domain::stage::StageName;
use jacobine_core::infrastructure::database::{ConnectionSettings, DatabaseGateway};
use jacobine_core::infrastructure::http::HttpFetcher;
use jacobine_core::infrastructure::process::ProcessRunner;
use jacobine_core::init_tracing;
use jacobine_queue::{ConsumerRuntime, MessageQueue};
use jacobine_stages::context::StageContext;
use jacobine_stages::producer::Producer;

/// Jacobine - distributed analysis pipeline for project release artifacts
#[derive(Parser, Debug)]
#[command(
    name = "jacobine",
    version,
    about = "Ingest release metadata, fan analysis work out over a broker, and run stage consumers"
)]
pub struct Cli {
    /// Configuration file path (default: config/jacobine.yml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Read the project's release feed once, record new releases, and
    /// publish the initial download messages
    Produce(ProduceArgs),

    /// Run one stage consumer until shutdown
    Consume(ConsumeArgs),
}

#[derive(clap::Args, Debug)]
pub struct ProduceArgs {
    /// Project name from the configuration's `projects` section
    #[arg(long)]
    pub project: String,
}

#[derive(clap::Args, Debug)]
pub struct ConsumeArgs {
    /// Project name from the configuration's `projects` section
    #[arg(long)]
    pub project: String,

    /// Stage to run, e.g. `download-http` or `analysis.phploc`
    pub stage: String,
}

/// Load configuration, install logging, and dispatch the subcommand.
pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let config =
        Arc::new(Config::load(cli.config.as_deref()).context("failed to load configuration")?);
    init_tracing(&config.logging)?;

    match cli.command {
        Commands::Produce(args) => run_producer(config, &args.project).await,
        Commands::Consume(args) => run_consumer(config, &args.project, &args.stage).await,
    }
}

fn resolve_project(config: &Config, name: &str) -> anyhow::Result<ProjectSettings> {
    config
        .project(name)
        .cloned()
        .with_context(|| format!("project '{name}' is not configured"))
}

async fn run_producer(config: Arc<Config>, project_name: &str) -> anyhow::Result<()> {
    let project = resolve_project(&config, project_name)?;

    let gateway = DatabaseGateway::connect(ConnectionSettings::from_config(
        &config.mysql,
        &project.mysql_database,
    ))
    .await?;
    let queue = MessageQueue::connect(&config.rabbitmq).await?;
    let fetcher = HttpFetcher::new()?;

    let mut producer = Producer::new(&config, project_name, project, gateway, queue, fetcher);
    let report = producer.run().await?;

    info!(
        inserted = report.inserted,
        republished = report.republished,
        skipped = report.skipped,
        "Producer finished"
    );
    Ok(())
}

async fn run_consumer(
    config: Arc<Config>,
    project_name: &str,
    stage_name: &str,
) -> anyhow::Result<()> {
    let stage: StageName = stage_name.parse()?;
    let project = resolve_project(&config, project_name)?;
    let exchange = project.exchange.clone();

    let gateway = DatabaseGateway::connect(ConnectionSettings::from_config(
        &config.mysql,
        &project.mysql_database,
    ))
    .await?;
    let queue = Arc::new(MessageQueue::connect(&config.rabbitmq).await?);

    let context = Arc::new(StageContext {
        config: config.clone(),
        project_name: project_name.to_string(),
        project,
        gateway: Mutex::new(gateway),
        queue: queue.clone(),
        runner: ProcessRunner::new(),
        fetcher: HttpFetcher::new()?,
    });

    let handler = jacobine_stages::build_stage(stage, context);
    let runtime = ConsumerRuntime::new(queue, exchange);

    info!(stage = %stage, project = %project_name, "Starting consumer");
    runtime.run(handler.as_ref()).await?;

    info!(stage = %stage, "Consumer shut down cleanly");
    Ok(())
}
