use std::sync::Arc;
use video_generator::workflow::{
    create_pipeline_executor, CheckpointStore, MemoryCheckpointer, PgCheckpointer, TracingObserver,
};
use video_generator::{Services, Settings, TaskConfig};

#[tokio::main]
async fn main() {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    if let Err(e) = init_logging() {
        eprintln!("Failed to initialize logging: {}", e);
        std::process::exit(1);
    }

    if let Err(e) = run().await {
        tracing::error!("❌ {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let mut args = std::env::args().skip(1);
    let topic = args
        .next()
        .ok_or("usage: video_generator <topic> [style] [theme]")?;
    let mut config = TaskConfig::new(topic);
    if let Some(style) = args.next() {
        config = config.with_style(style);
    }
    if let Some(theme) = args.next() {
        config = config.with_theme(theme);
    }

    let settings = Settings::from_env()?;

    if let Err(e) = std::fs::create_dir_all(&settings.output_dir) {
        tracing::warn!("Failed to create output directory: {}", e);
    } else {
        tracing::info!("Output directory ready: {}", settings.output_dir.display());
    }

    let checkpointer: Arc<dyn CheckpointStore> = match &settings.database_url {
        Some(url) => {
            tracing::info!("Using Postgres checkpoints");
            let pg = PgCheckpointer::connect(url).await?;
            if let Some(days) = settings.checkpoint_retention_days {
                if let Err(e) = pg.cleanup_old_checkpoints(days).await {
                    tracing::warn!("Checkpoint cleanup failed: {}", e);
                }
            }
            Arc::new(pg)
        }
        None => {
            tracing::warn!("DATABASE_URL not found. Checkpoints are kept in memory only.");
            Arc::new(MemoryCheckpointer::new())
        }
    };

    let executor = create_pipeline_executor(
        Services::from_settings(&settings),
        checkpointer,
        Arc::new(TracingObserver),
        settings.executor_config(),
    )?;

    let cancel = executor.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("🛑 Ctrl-C received, cancelling");
            cancel.cancel();
        }
    });

    let state = executor.run(config).await?;

    println!("{}", serde_json::to_string_pretty(&state)?);
    if !state.final_artifact_url.is_set() {
        return Err(format!("task {} ended {}: {}", state.task_id, state.step(), state.errors.join("; ")).into());
    }
    Ok(())
}

fn init_logging() -> Result<(), Box<dyn std::error::Error>> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

    // Get log level from environment or default to INFO for production
    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cfg!(debug_assertions) {
            "debug,video_generator=trace,sqlx=info,reqwest=info,hyper=info".to_string()
        } else {
            "info,video_generator=info,sqlx=warn,reqwest=warn,hyper=warn".to_string()
        }
    });

    let env_filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&log_level))?;

    let fmt_layer = if std::env::var("LOG_FORMAT").as_deref() == Ok("json") {
        // JSON logging for log aggregation
        fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(false)
            .with_target(true)
            .with_thread_ids(true)
            .with_thread_names(true)
            .boxed()
    } else {
        fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_thread_names(false)
            .with_file(true)
            .with_line_number(true)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();

    tracing::info!("🎬 Video generator starting up...");
    tracing::info!("Version: {}", env!("CARGO_PKG_VERSION"));
    Ok(())
}
