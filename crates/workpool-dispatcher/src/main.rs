use async_trait::async_trait;
use clap::{Parser, Subcommand};
use std::time::{Duration, Instant};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use workpool_core::TaskRequest;
use workpool_dispatcher::{PoolConfig, WorkerKind, WorkerPool};
use workpool_worker::handler::TaskResult;
use workpool_worker::{FramedTransport, TaskHandler, TaskHandlerRegistry, Worker};

#[derive(Parser, Debug)]
#[command(name = "workpool")]
#[command(about = "Fixed-size worker pool task dispatcher", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start a pool, run a batch of tasks and print their results
    Run {
        /// Path to configuration file
        #[arg(short, long)]
        config: Option<String>,

        /// Number of workers
        #[arg(short, long)]
        size: Option<usize>,

        /// Run workers as child processes
        #[arg(long)]
        process: bool,

        /// Task type to submit
        #[arg(short, long)]
        task_type: String,

        /// Number of tasks to submit
        #[arg(short = 'n', long, default_value = "1")]
        count: usize,

        /// Payload for every task
        #[arg(short, long, default_value = "")]
        payload: String,

        /// Per-task timeout in seconds (0 = none)
        #[arg(long)]
        timeout_secs: Option<u64>,

        /// Print Prometheus metrics after the batch
        #[arg(long)]
        metrics: bool,
    },

    /// Serve tasks over stdin/stdout (spawned by process pools)
    Worker {
        /// Also register the `block` and `abort` handlers
        #[arg(long)]
        fault_handlers: bool,
    },
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    match args.command {
        Commands::Worker { fault_handlers } => {
            init_tracing(PoolConfig::default().log_filter());

            // Single thread: a blocking handler stalls the whole worker
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()?;
            runtime.block_on(serve_worker(fault_handlers))
        }
        Commands::Run {
            config,
            size,
            process,
            task_type,
            count,
            payload,
            timeout_secs,
            metrics,
        } => {
            let mut config = match config {
                Some(path) => PoolConfig::from_file(&path)?,
                None => PoolConfig::default(),
            };

            // Override with CLI args
            if let Some(size) = size {
                config.size = size;
            }
            if process {
                config.worker.kind = WorkerKind::Process;
            }
            if let Some(timeout_secs) = timeout_secs {
                config.tasks.timeout_secs = timeout_secs;
            }
            config.validate()?;
            init_tracing(config.log_filter());

            let batch = Batch {
                task_type,
                count,
                payload,
                print_metrics: metrics,
            };

            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(run_batch(config, batch))
        }
    }
}

/// Log to stderr; stdout belongs to the protocol in worker mode
fn init_tracing(filter: tracing_subscriber::EnvFilter) {
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();
}

async fn serve_worker(fault_handlers: bool) -> anyhow::Result<()> {
    let registry = TaskHandlerRegistry::with_builtin_handlers();
    if fault_handlers {
        registry.register("block", BlockHandler);
        registry.register("abort", AbortHandler);
    }

    tracing::debug!("Registered task types: {:?}", registry.task_types());

    Worker::new(registry)
        .serve(FramedTransport::stdio())
        .await?;

    Ok(())
}

struct Batch {
    task_type: String,
    count: usize,
    payload: String,
    print_metrics: bool,
}

async fn run_batch(config: PoolConfig, batch: Batch) -> anyhow::Result<()> {
    tracing::info!("Starting pool with config: {:?}", config);

    let pool = WorkerPool::from_config(config, TaskHandlerRegistry::with_builtin_handlers())?;
    let started = Instant::now();

    let mut handles = Vec::with_capacity(batch.count);
    for _ in 0..batch.count {
        let request = TaskRequest::new(batch.task_type.as_str(), batch.payload.clone().into_bytes());
        handles.push(pool.submit(request)?);
    }

    let ids: Vec<_> = handles.iter().map(|h| h.id()).collect();
    let outcomes = futures::future::join_all(handles).await;

    let mut succeeded = 0;
    for (task_id, outcome) in ids.into_iter().zip(outcomes) {
        match outcome {
            Ok(output) => {
                succeeded += 1;
                println!("task {}: ok {}", task_id, String::from_utf8_lossy(&output));
            }
            Err(e) => println!("task {}: error {}", task_id, e),
        }
    }

    let stats = pool.stats().await?;
    println!(
        "{}/{} succeeded in {:.2?} ({} workers ready)",
        succeeded,
        batch.count,
        started.elapsed(),
        stats.ready + stats.busy
    );

    if batch.print_metrics {
        print!("{}", pool.metrics().render());
    }

    pool.shutdown().await;
    Ok(())
}

/// Blocks the worker's thread for the payload's milliseconds
struct BlockHandler;

#[async_trait]
impl TaskHandler for BlockHandler {
    async fn execute(&self, payload: Vec<u8>) -> TaskResult {
        let ms = std::str::from_utf8(&payload)
            .ok()
            .and_then(|s| s.trim().parse::<u64>().ok())
            .unwrap_or(60_000);
        std::thread::sleep(Duration::from_millis(ms));
        Ok(payload)
    }
}

/// Exits the worker process mid-task
struct AbortHandler;

#[async_trait]
impl TaskHandler for AbortHandler {
    async fn execute(&self, _payload: Vec<u8>) -> TaskResult {
        tracing::warn!("Aborting worker process");
        std::process::exit(70);
    }
}
