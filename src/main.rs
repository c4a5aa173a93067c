use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;

use frontdesk::agent::AgentRuntime;
use frontdesk::booking::{store::BookingStore, Bookings};
use frontdesk::calendar::{CalendarPort, LocalCalendar, RemoteCalendar};
use frontdesk::config::Config;
use frontdesk::convo::gate::ConversationGate;
use frontdesk::convo::ConversationStore;
use frontdesk::gateway::{self, GatewayDeps};
use frontdesk::models::OpenAICompatProvider;
use frontdesk::notify::LogNotifier;
use frontdesk::schedule::slots::SlotParams;
use frontdesk::tools;

#[derive(Parser, Debug)]
#[command(name = "frontdesk", version, about = "Conversational booking assistant")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the daemon (HTTP gateway + agent runtime)
    Start,
    /// Load the configuration, validate it, and exit
    CheckConfig,
    /// Print the open slots for a date (YYYY-MM-DD) and exit
    Slots { date: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    {
        use tracing_subscriber::layer::SubscriberExt;
        use tracing_subscriber::util::SubscriberInitExt;

        let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    let cli = Cli::parse();
    let config = Config::load(&cli.config).await?;

    match cli.command.unwrap_or(Command::Start) {
        Command::CheckConfig => {
            println!("config ok: {}", cli.config.display());
            Ok(())
        }
        Command::Slots { date } => {
            let date = frontdesk::schedule::parse_date(&date)
                .map_err(|e| anyhow::anyhow!("bad date: {e}"))?;
            let bookings = build_bookings(&config)?;
            let slots = bookings.free_slots_on(date).await?;
            if slots.is_empty() {
                println!("no open slots on {date}");
            } else {
                for slot in slots {
                    println!("{}", slot.format("%Y-%m-%d %H:%M"));
                }
            }
            Ok(())
        }
        Command::Start => run_daemon(config).await,
    }
}

fn build_calendar(config: &Config) -> anyhow::Result<Arc<dyn CalendarPort>> {
    let tz = config.tz()?;
    match config.calendar.provider.as_str() {
        "local" => Ok(Arc::new(LocalCalendar::new())),
        "remote" => {
            let base_url = config
                .calendar
                .base_url
                .as_deref()
                .context("calendar.base_url missing")?;
            let calendar_id = config
                .calendar
                .calendar_id
                .as_deref()
                .context("calendar.calendar_id missing")?;
            let api_token = std::env::var(&config.calendar.api_token_env).unwrap_or_default();
            if api_token.is_empty() {
                tracing::warn!(
                    env = %config.calendar.api_token_env,
                    "calendar API token env var unset or empty"
                );
            }
            Ok(Arc::new(RemoteCalendar::new(base_url, calendar_id, api_token, tz)))
        }
        other => anyhow::bail!("unknown calendar provider '{other}'"),
    }
}

fn build_bookings(config: &Config) -> anyhow::Result<Bookings> {
    let tz = config.tz()?;
    let home = frontdesk::frontdesk_home();
    std::fs::create_dir_all(&home)
        .with_context(|| format!("create frontdesk home {}", home.display()))?;

    Ok(Bookings::new(
        build_calendar(config)?,
        BookingStore::open(&home, tz)?,
        Arc::new(LogNotifier::new(config.public_base_url.clone())),
        tz,
        SlotParams {
            slot_minutes: config.booking.slot_minutes,
            granularity_minutes: config.booking.granularity_minutes,
            working_hours: config.booking.working_hours,
        },
        config.booking.revalidate_reschedule,
    ))
}

async fn run_daemon(config: Config) -> anyhow::Result<()> {
    tools::init();

    let api_key = std::env::var(&config.model.api_key_env).unwrap_or_default();
    let provider = OpenAICompatProvider::new(
        config.model.endpoint.clone(),
        api_key,
        config.model.model.clone(),
    )?;
    let runtime = Arc::new(AgentRuntime::new(Arc::new(provider), config.max_iterations));

    let bookings = Arc::new(build_bookings(&config)?);
    let conversations = Arc::new(ConversationStore::new(frontdesk::frontdesk_home()));
    let gate = Arc::new(ConversationGate::new(
        config.concurrency.max_concurrent_turns,
        Duration::from_secs(config.concurrency.turn_timeout_secs),
    ));

    let addr = config
        .listen_addr
        .parse()
        .with_context(|| format!("invalid listen_addr '{}'", config.listen_addr))?;

    let gateway = gateway::start_gateway(
        addr,
        GatewayDeps {
            runtime,
            bookings,
            conversations,
            gate,
            history_limit: config.history_limit,
            min_monthly_budget: config.booking.min_monthly_budget,
        },
    )
    .await?;

    info!(addr = %gateway.addr, "frontdesk running, press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    gateway.handle.abort();
    Ok(())
}
