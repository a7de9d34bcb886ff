use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Args, Parser, Subcommand, ValueEnum};
use comfy_table::presets::UTF8_FULL;
use comfy_table::Table;
use tidemark_bucket::S3BucketStore;
use tidemark_core::pipeline::{
    fetch_watermark, run_entities, EntityReport, LoadMode, PipelineContext,
};
use tidemark_core::AppConfig;
use tidemark_source::PostgresSource;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Delta-load reconciliation from Postgres to S3", long_about = None)]
struct Cli {
    /// Optional TOML config file; environment variables override it
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Json, global = true)]
    log_format: LogFormat,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run full or delta loads for the configured entities
    Run(RunArgs),
    /// List the resolved entity catalog
    Entities,
    /// Print the watermark of an entity's currently published object
    ShowWatermark(ShowWatermarkArgs),
}

#[derive(Args, Debug)]
struct RunArgs {
    #[arg(long, value_enum, default_value_t = ModeArg::Delta)]
    mode: ModeArg,
    /// Restrict the run to these entities (repeatable); defaults to all
    #[arg(long = "entity")]
    entities: Vec<String>,
    /// Print the run report as JSON instead of a table
    #[arg(long)]
    json: bool,
}

#[derive(Args, Debug)]
struct ShowWatermarkArgs {
    #[arg(long)]
    entity: String,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModeArg {
    Full,
    Delta,
}

impl From<ModeArg> for LoadMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Full => LoadMode::Full,
            ModeArg::Delta => LoadMode::Delta,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Json,
    Pretty,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let config = AppConfig::load(cli.config.as_deref()).context("failed to load configuration")?;

    match cli.command {
        Command::Run(args) => handle_run(&config, args).await,
        Command::Entities => handle_entities(&config),
        Command::ShowWatermark(args) => handle_show_watermark(&config, args).await,
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.pretty().init(),
    }
}

async fn handle_run(config: &AppConfig, args: RunArgs) -> Result<ExitCode> {
    let entities = config.select_entities(&args.entities)?;
    let run_date = config.run_date(Utc::now())?;
    let mode = LoadMode::from(args.mode);

    let source = PostgresSource::connect(config.database_url()?, config.database.max_connections)
        .await
        .context("failed to connect to the source database")?;
    let store = S3BucketStore::new(&config.storage)
        .await
        .context("failed to configure object storage")?;

    let context = PipelineContext {
        source: Arc::new(source),
        store: Arc::new(store),
        bucket: config.storage.bucket.clone(),
        run_date,
    };

    info!(%mode, %run_date, entities = entities.len(), "starting run");
    let reports = run_entities(&context, &entities, mode).await;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    } else {
        println!("{}", report_table(&reports));
    }

    let failures = reports.iter().filter(|report| report.outcome.is_failure()).count();
    if failures > 0 {
        warn!(failures, "run finished with failures");
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}

fn handle_entities(config: &AppConfig) -> Result<ExitCode> {
    let run_date = config.run_date(Utc::now())?;
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["entity", "watermark", "object"]);
    for entity in config.resolve_entities()? {
        table.add_row(vec![
            entity.name.clone(),
            entity.strategy.to_string(),
            entity.destination(&config.storage.bucket, run_date).to_string(),
        ]);
    }
    println!("{table}");
    Ok(ExitCode::SUCCESS)
}

async fn handle_show_watermark(config: &AppConfig, args: ShowWatermarkArgs) -> Result<ExitCode> {
    let entity = config
        .select_entities(std::slice::from_ref(&args.entity))?
        .into_iter()
        .next()
        .with_context(|| format!("unknown entity '{}'", args.entity))?;
    let run_date = config.run_date(Utc::now())?;
    let location = entity.destination(&config.storage.bucket, run_date);

    let store = S3BucketStore::new(&config.storage)
        .await
        .context("failed to configure object storage")?;
    let current = fetch_watermark(&store, &location, &entity.strategy)
        .await
        .with_context(|| format!("failed to derive watermark for {}", entity.name))?;

    println!("{location}\t{}\t{current}", entity.strategy);
    Ok(ExitCode::SUCCESS)
}

fn report_table(reports: &[EntityReport]) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["entity", "mode", "object", "outcome"]);
    for report in reports {
        table.add_row(vec![
            report.entity.clone(),
            report.mode.to_string(),
            report.location.clone(),
            report.outcome.to_string(),
        ]);
    }
    table
}
