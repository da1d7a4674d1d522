use anyhow::Context;
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use chat_digest::{
    api::{dto::parse_date, routes},
    config::Config,
    orchestrator::{
        conversation_title, format_summary, ScheduleSettings, SummaryOrchestrator,
        SummaryOutcome, SummaryScheduler,
    },
    api::rate_limiter::RateLimiter,
    services::{build_provider, Clock, SummaryDelivery, SystemClock, WebhookDelivery},
    storage::{self, MessageStore, SummaryArchive, WindowRetriever},
};

const RATE_LIMIT_CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Parser)]
#[command(name = "chat-digest", version, about = "Daily AI summaries of chat conversations")]
struct Cli {
    /// Config file (defaults to ~/.chat-digest/config)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the admin API and the daily scheduler
    Serve,
    /// Summarize one calendar day of a conversation
    Summarize {
        conversation_id: i64,
        /// YYYY-MM-DD, defaults to yesterday
        #[arg(long)]
        date: Option<String>,
    },
    /// Summarize the last 24 hours of a conversation
    Today { conversation_id: i64 },
    /// Print stored summaries, newest first
    History {
        conversation_id: i64,
        #[arg(long, default_value_t = 7)]
        limit: usize,
    },
}

struct Components {
    config: Arc<Config>,
    store: Arc<MessageStore>,
    retriever: Arc<WindowRetriever>,
    archive: Arc<SummaryArchive>,
    clock: Arc<dyn Clock>,
    scheduler: Option<SummaryScheduler>,
}

fn build_components(config: Config) -> anyhow::Result<Components> {
    let config = Arc::new(config);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let blobs = storage::init_blob_store(&config.storage_backend, &config.data_dir)?;
    let store = Arc::new(MessageStore::new(
        blobs.clone(),
        config.max_messages_per_partition,
    ));
    let retriever = Arc::new(WindowRetriever::new(store.clone()));
    let archive = Arc::new(SummaryArchive::new(
        blobs,
        clock.clone(),
        config.summary_options(),
    ));

    let scheduler = if config.summarization_enabled {
        let provider = build_provider(&config)?;
        tracing::info!("Summary provider: {}", provider.name());
        let orchestrator = Arc::new(SummaryOrchestrator::new(
            retriever.clone(),
            provider,
            archive.clone(),
            clock.clone(),
            config.min_messages_for_summary,
        ));
        let delivery = config.delivery_webhook_url.clone().map(|url| {
            Arc::new(WebhookDelivery::new(url)) as Arc<dyn SummaryDelivery>
        });
        Some(SummaryScheduler::new(
            orchestrator,
            ScheduleSettings::from_config(&config),
            delivery,
        ))
    } else {
        tracing::info!("Summarization disabled");
        None
    };

    Ok(Components {
        config,
        store,
        retriever,
        archive,
        clock,
        scheduler,
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load_from(path, true),
        None => Config::load(),
    }
    .context("Failed to load configuration")?;

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("chat_digest={}", config.log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let components = build_components(config)?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(components).await,
        Command::Summarize {
            conversation_id,
            date,
        } => {
            let scheduler = require_scheduler(&components)?;
            let date = date
                .as_deref()
                .map(parse_date)
                .transpose()
                .map_err(anyhow::Error::msg)?;
            let outcome = scheduler.manual_summary(conversation_id, date).await?;
            print_outcome(outcome);
            Ok(())
        }
        Command::Today { conversation_id } => {
            let scheduler = require_scheduler(&components)?;
            let outcome = scheduler.today_summary(conversation_id).await?;
            print_outcome(outcome);
            Ok(())
        }
        Command::History {
            conversation_id,
            limit,
        } => {
            let artifacts = components.archive.history(conversation_id, limit).await?;
            if artifacts.is_empty() {
                println!("No summaries stored for conversation {}", conversation_id);
            }
            for artifact in artifacts {
                let messages = components
                    .retriever
                    .by_calendar_date(conversation_id, artifact.date)
                    .await;
                let title = conversation_title(conversation_id, &messages);
                println!("{}\n", format_summary(&artifact, &title));
            }
            Ok(())
        }
    }
}

fn require_scheduler(components: &Components) -> anyhow::Result<&SummaryScheduler> {
    components
        .scheduler
        .as_ref()
        .context("Summarization is disabled; set summarization_enabled = true")
}

fn print_outcome(outcome: SummaryOutcome) {
    match outcome {
        SummaryOutcome::Generated { artifact, title } => {
            println!("{}", format_summary(&artifact, &title))
        }
        SummaryOutcome::Skipped {
            message_count,
            threshold,
        } => println!(
            "Not enough messages to summarize ({} < {})",
            message_count, threshold
        ),
        SummaryOutcome::InProgress => println!("A summary for this day is already being generated"),
    }
}

async fn serve(components: Components) -> anyhow::Result<()> {
    if let Some(scheduler) = &components.scheduler {
        scheduler.start();
        scheduler.start_async().await;
    }

    let port = components.config.server_port;
    let scheduler = components.scheduler.clone();
    let rate_limiter = RateLimiter::new(components.config.manual_rate_limit_per_minute)
        .with_trusted_proxy(components.config.trust_forwarded_for);
    let cleanup = rate_limiter.spawn_cleanup(RATE_LIMIT_CLEANUP_INTERVAL);
    let state = routes::AppState {
        config: components.config,
        store: components.store,
        retriever: components.retriever,
        archive: components.archive,
        clock: components.clock,
        scheduler: components.scheduler,
        rate_limiter,
    };
    let app = routes::create_router(state);

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    tracing::info!("🚀 Server listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    cleanup.abort();
    if let Some(scheduler) = scheduler {
        scheduler.stop_and_wait().await;
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
