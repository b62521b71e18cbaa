use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tokio::sync::mpsc;

use matchday_sync::chat::discord::DiscordClient;
use matchday_sync::chat::memory::InMemoryChat;
use matchday_sync::chat::ChatPlatform;
use matchday_sync::commands::{self, CommandContext};
use matchday_sync::config::{AppConfig, ChatMode, Secrets, DEFAULT_CONFIG_PATH};
use matchday_sync::db::store::Store;
use matchday_sync::football::api::FootballClient;
use matchday_sync::football::leagues::ChoiceKind;
use matchday_sync::monitoring::health::{self, HealthState};
use matchday_sync::monitoring::logger::{self, LogFormat};
use matchday_sync::pipeline::enricher::EnrichSettings;
use matchday_sync::pipeline::orchestrator::WeeklyFetchOrchestrator;
use matchday_sync::render::Locale;
use matchday_sync::scheduler::triggers::{self, Trigger, TriggerSchedule};
use matchday_sync::service::Service;
use matchday_sync::sync::engine::{SyncEngine, SyncSettings};

/// Football fixture notifications kept in sync with live scores.
#[derive(Parser)]
#[command(name = "matchday-sync", version, about, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the scheduler until interrupted (default).
    Run,
    /// Prime today's matches, publish the current week once, then exit.
    SyncOnce,
    /// Set the notification channel and language for a subscriber.
    Configure {
        #[arg(long)]
        subscriber: String,
        #[arg(long)]
        channel: String,
        #[arg(long, default_value = "en")]
        language: Locale,
    },
    /// Follow a league and publish its current week.
    AddLeague {
        #[arg(long)]
        subscriber: String,
        #[arg(long)]
        league: String,
    },
    /// Stop following a league and delete its notifications.
    RemoveLeague {
        #[arg(long)]
        subscriber: String,
        #[arg(long)]
        league: String,
    },
    /// List leagues that can be added or removed.
    Leagues {
        #[arg(long)]
        subscriber: String,
        #[arg(long, value_enum, default_value_t = ChoiceArg::Add)]
        kind: ChoiceArg,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ChoiceArg {
    Add,
    Remove,
}

impl From<ChoiceArg> for ChoiceKind {
    fn from(arg: ChoiceArg) -> Self {
        match arg {
            ChoiceArg::Add => ChoiceKind::Add,
            ChoiceArg::Remove => ChoiceKind::Remove,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let (config, secrets) = AppConfig::load(&cli.config)?;
    let command = cli.command.unwrap_or(Command::Run);

    let format = match command {
        Command::Run => LogFormat::Json,
        _ => LogFormat::Compact,
    };
    logger::init_logging(&config.monitoring, format)?;

    let store = Arc::new(Store::new(&config.database.path).await?);
    let health = HealthState::new();
    let mut service = build_service(&config, secrets, store.clone(), health.clone())?;

    match command {
        Command::Run => run(config, service, store, health).await,
        Command::SyncOnce => {
            let today = service.today();
            service.prime(today).await?;
            let report = service.publish_week(today).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Command::Configure {
            subscriber,
            channel,
            language,
        } => {
            let ctx = CommandContext::new(subscriber, language);
            let outcome = commands::configure(&service, &ctx, &channel, language).await?;
            println!("{}", outcome.reply(ctx.language));
            Ok(())
        }
        Command::AddLeague { subscriber, league } => {
            let ctx = context(&store, subscriber).await?;
            let outcome = commands::add_league(&service, &ctx, &league).await?;
            println!("{}", outcome.reply(ctx.language));
            Ok(())
        }
        Command::RemoveLeague { subscriber, league } => {
            let ctx = context(&store, subscriber).await?;
            let outcome = commands::remove_league(&service, &ctx, &league).await?;
            println!("{}", outcome.reply(ctx.language));
            Ok(())
        }
        Command::Leagues { subscriber, kind } => {
            let ctx = context(&store, subscriber).await?;
            for league in commands::league_choices(&service, &ctx, kind.into()).await? {
                println!("{}\t{}", league.id, league.display_name);
            }
            Ok(())
        }
    }
}

/// Build the command context from the stored subscriber language.
async fn context(store: &Store, subscriber_id: String) -> Result<CommandContext> {
    let language = store
        .find_subscriber(&subscriber_id)
        .await?
        .map(|s| s.language)
        .unwrap_or_default();
    Ok(CommandContext::new(subscriber_id, language))
}

fn build_service(
    config: &AppConfig,
    secrets: Secrets,
    store: Arc<Store>,
    health: HealthState,
) -> Result<Service> {
    let api_key = secrets
        .football_api_key
        .context("FOOTBALL_API_KEY must be set")?;
    let provider = Arc::new(FootballClient::new(&config.provider, &config.rate_limit, api_key)?);

    let chat: Arc<dyn ChatPlatform> = match config.chat.mode {
        ChatMode::DryRun => Arc::new(InMemoryChat::new()),
        ChatMode::Discord => {
            let token = secrets
                .discord_token
                .context("DISCORD_TOKEN must be set when chat.mode = \"discord\"")?;
            Arc::new(DiscordClient::new(&config.chat.api_base_url, token)?)
        }
    };

    let orchestrator = WeeklyFetchOrchestrator::new(
        provider,
        EnrichSettings {
            batch_size: config.rate_limit.event_batch_size,
            inter_batch_delay: Duration::from_millis(config.rate_limit.event_batch_delay_ms),
        },
        config.provider.season,
    );
    let engine = SyncEngine::new(
        chat,
        store,
        SyncSettings {
            chunk_size: config.sync.chunk_size,
            reconcile_drift: config.sync.reconcile_drift,
        },
    );
    let schedule = TriggerSchedule::from_config(&config.scheduler)?;

    Ok(Service::new(
        orchestrator,
        engine,
        health,
        config.scheduler.live_window_seconds,
        schedule.timezone(),
    ))
}

async fn run(config: AppConfig, mut service: Service, store: Arc<Store>, health: HealthState) -> Result<()> {
    tracing::info!(
        chat_mode = ?config.chat.mode,
        poll_interval_s = config.scheduler.poll_interval_seconds,
        "Matchday sync starting"
    );

    let health_handle = config
        .monitoring
        .health_enabled
        .then(|| health::spawn_health_server(health, store, &config.monitoring.health_bind));

    // Prime once on startup so the first tick has something to check.
    if let Err(e) = service.handle(Trigger::DailyPrime).await {
        tracing::warn!(error = %e, "Startup prime failed");
    }

    let (tx, rx) = mpsc::channel(16);
    let schedule = TriggerSchedule::from_config(&config.scheduler)?;
    let timers = triggers::spawn_triggers(&schedule, tx).await?;

    tokio::select! {
        _ = service.run(rx) => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown requested");
        }
    }

    if let Err(e) = timers.shutdown().await {
        tracing::warn!(error = %e, "Trigger shutdown failed");
    }
    if let Some(handle) = health_handle {
        handle.abort();
    }
    Ok(())
}
