use blockdelta::application::pipeline::{PipelineOrchestrator, RunRequest};
use blockdelta::application::query::{self, QueryParams};
use blockdelta::config::{BackendSettings, PipelineConfig, QueryDefaults};
use blockdelta::domain::outcome::{Data, ErrorEvent};
use blockdelta::domain::ports::SharedBlockFetcher;
use blockdelta::infrastructure::build_backend;
use blockdelta::infrastructure::etherscan::{DEFAULT_API_URL, EtherscanClient};
use blockdelta::interfaces::report::{ReportFormat, ReportWriter};
use blockdelta::telemetry;
use clap::Parser;
use miette::{IntoDiagnostic, Result};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Queue engine: memory, rocksdb or redis
    #[arg(long, env = "BLOCKDELTA_LIBRARY")]
    library: Option<String>,

    /// How many blocks before --last-block to aggregate (1..=19)
    #[arg(long, env = "BLOCKDELTA_BLOCKS_AMOUNT", allow_negative_numbers = true)]
    blocks_amount: Option<String>,

    /// Hex block number the range ends before, or `last`
    #[arg(long, env = "BLOCKDELTA_LAST_BLOCK")]
    last_block: Option<String>,

    /// Output format
    #[arg(long, default_value_t = ReportFormat::Json)]
    format: ReportFormat,

    /// Cadence of download tasks
    #[arg(long, env = "BLOCKDELTA_REQUEST_INTERVAL_MS", default_value_t = 200)]
    request_interval_ms: u64,

    /// Time allowance per block before the run is abandoned
    #[arg(long, env = "BLOCKDELTA_BLOCK_BUDGET_MS", default_value_t = 1000)]
    block_budget_ms: u64,

    #[arg(long, env = "REDIS_URL", default_value = "redis://127.0.0.1:6379")]
    redis_url: String,

    /// Directory of the RocksDB queue (feature `queue-rocksdb`)
    #[arg(long, env = "BLOCKDELTA_ROCKSDB_PATH", default_value = "./blockdelta-queue")]
    rocksdb_path: PathBuf,

    #[arg(long, env = "ETHERSCAN_URL", default_value = DEFAULT_API_URL)]
    etherscan_url: String,

    #[arg(long, env = "ETHERSCAN_API_KEY")]
    etherscan_api_key: Option<String>,

    /// Log every queue iteration
    #[arg(long, env = "LOG_BENCHMARKS")]
    log_benchmarks: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    telemetry::init(cli.log_benchmarks);

    let fetcher: SharedBlockFetcher = Arc::new(
        EtherscanClient::new(cli.etherscan_url.clone(), cli.etherscan_api_key.clone())
            .into_diagnostic()?,
    );

    let (data, event) = run(&cli, fetcher).await;

    let stdout = io::stdout();
    let mut writer = ReportWriter::new(stdout.lock());
    writer.write(&data, cli.format).into_diagnostic()?;

    match data {
        Data::Failure { error } => match event {
            Some(event) => Err(miette::miette!(
                help = format!("run session {}", event.session_key),
                "{}",
                error
            )),
            None => Err(miette::miette!(error)),
        },
        Data::Success(_) => Ok(()),
    }
}

/// Resolves the query and runs the pipeline. A fatal pipeline error also
/// comes back as the event the orchestrator published for it.
async fn run(cli: &Cli, fetcher: SharedBlockFetcher) -> (Data, Option<ErrorEvent>) {
    let params = QueryParams {
        library: cli.library.clone(),
        blocks_amount: cli.blocks_amount.clone(),
        last_block: cli.last_block.clone(),
    };
    let query = match query::resolve(params, &QueryDefaults::default(), fetcher.as_ref()).await {
        Ok(query) => query,
        Err(e) => return (Data::Failure { error: e.to_string() }, None),
    };

    let settings = BackendSettings {
        redis_url: cli.redis_url.clone(),
        rocksdb_path: cli.rocksdb_path.clone(),
    };
    let backend = match build_backend(query.library, &settings) {
        Ok(backend) => backend,
        Err(e) => return (Data::Failure { error: e.to_string() }, None),
    };

    let config = PipelineConfig {
        request_interval: Duration::from_millis(cli.request_interval_ms),
        block_budget: Duration::from_millis(cli.block_budget_ms),
        ..PipelineConfig::default()
    };

    let (errors_tx, mut errors_rx) = mpsc::unbounded_channel();
    let data = PipelineOrchestrator::new(backend, fetcher, config)
        .with_error_channel(errors_tx)
        .run(RunRequest::from(&query))
        .await
        .into_data();
    (data, errors_rx.try_recv().ok())
}
