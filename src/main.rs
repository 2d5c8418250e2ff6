use std::{
    path::PathBuf,
    sync::{Arc, atomic::AtomicBool},
    time::Duration,
};

use anyhow::{Context, Result, bail};
use chrono::Utc;
use clap::{Parser, Subcommand};
use todoist_analytics::analytics::compute_dashboard;
use todoist_analytics::cache::SnapshotCache;
use todoist_analytics::client::TodoistClient;
use todoist_analytics::refresh::{RefreshCoordinator, RefreshEvent, run_cycle};
use todoist_analytics::report::{format_captured_at, render_text};
use todoist_analytics::settings::{AppSettings, SettingsStore, default_data_dir};
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about = "Todoist analytics dashboard", long_about = None)]
struct Cli {
    /// Todoist project to analyse (overrides settings and TODOIST_PROJECT_ID)
    #[arg(long, global = true)]
    project_id: Option<String>,
    /// Todoist API token (overrides settings and TODOIST_API_TOKEN)
    #[arg(long, global = true)]
    token: Option<String>,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
enum Command {
    /// Fetch once and print a summary (default command)
    Report {
        /// Print the cached snapshot instead of fetching
        #[arg(long)]
        cached: bool,
    },
    /// Keep refreshing on the configured interval and print each result
    Watch,
    /// Update the stored settings
    Configure {
        #[arg(long)]
        refresh_seconds: Option<u64>,
        #[arg(long)]
        monthly_goal: Option<u32>,
        #[arg(long, value_name = "PATH")]
        cache_path: Option<PathBuf>,
    },
    /// Delete the cached snapshot
    ClearCache,
}

struct AppContext {
    settings: AppSettings,
    store: SettingsStore,
    cache: SnapshotCache,
}

fn main() -> Result<()> {
    todoist_analytics::init_tracing();
    let cli = Cli::parse();
    let ctx = load_context(&cli)?;
    match cli.command.clone().unwrap_or(Command::Report { cached: false }) {
        Command::Report { cached: true } => run_cached_report(&ctx),
        Command::Report { cached: false } => run_report(&ctx),
        Command::Watch => run_watch(ctx),
        Command::Configure {
            refresh_seconds,
            monthly_goal,
            cache_path,
        } => configure(&cli, ctx, refresh_seconds, monthly_goal, cache_path),
        Command::ClearCache => clear_cache(&ctx),
    }
}

fn load_context(cli: &Cli) -> Result<AppContext> {
    let data_dir = default_data_dir()?;
    let store = SettingsStore::new(&data_dir);
    let mut settings = store.load()?;
    settings.apply_env_overrides();
    apply_cli_overrides(cli, &mut settings);
    settings.sanitize();
    let cache = SnapshotCache::new(settings.resolved_cache_path(&data_dir));
    Ok(AppContext {
        settings,
        store,
        cache,
    })
}

fn apply_cli_overrides(cli: &Cli, settings: &mut AppSettings) {
    if let Some(project_id) = &cli.project_id {
        settings.project_id = project_id.clone();
    }
    if let Some(token) = &cli.token {
        settings.api_token = token.clone();
    }
}

fn run_cached_report(ctx: &AppContext) -> Result<()> {
    let Some(snapshot) = ctx.cache.load() else {
        println!("No cached snapshot at {}.", ctx.cache.path().display());
        return Ok(());
    };
    let dashboard = compute_dashboard(&snapshot, Utc::now(), ctx.settings.top_sections);
    print!("{}", render_text(&dashboard, ctx.settings.monthly_goal));
    Ok(())
}

fn run_report(ctx: &AppContext) -> Result<()> {
    ctx.settings.validate()?;
    let client = TodoistClient::from_settings(&ctx.settings)
        .context("Failed to create Todoist client")?;
    let snapshot = match run_cycle(&client, &ctx.settings.project_id, Utc::now()) {
        Ok(snapshot) => snapshot,
        Err(failure) => bail!("{failure}"),
    };
    ctx.cache.save(&snapshot);
    let dashboard = compute_dashboard(&snapshot, Utc::now(), ctx.settings.top_sections);
    print!("{}", render_text(&dashboard, ctx.settings.monthly_goal));
    Ok(())
}

fn run_watch(ctx: AppContext) -> Result<()> {
    ctx.settings.validate()?;
    let settings = ctx.settings;

    if let Some(cached) = ctx.cache.load_cached() {
        println!("Cached snapshot from {}:", format_captured_at(cached.timestamp));
        let dashboard = compute_dashboard(&cached.data, Utc::now(), settings.top_sections);
        println!("{}", render_text(&dashboard, settings.monthly_goal));
    }

    let client = TodoistClient::from_settings(&settings).context("Failed to create Todoist client")?;
    let (coordinator, events) =
        RefreshCoordinator::new(Arc::new(client), Arc::new(ctx.cache), &settings.project_id);
    let coordinator = Arc::new(coordinator);
    let stop = Arc::new(AtomicBool::new(false));
    let interval = Duration::from_secs(settings.refresh_seconds);
    info!(interval_secs = settings.refresh_seconds, "watching project {}", settings.project_id);

    coordinator.request_cycle();
    let _timer = coordinator.spawn_timer(interval, Arc::clone(&stop));

    for event in events {
        match event {
            RefreshEvent::Succeeded(snapshot) => {
                let dashboard = compute_dashboard(&snapshot, Utc::now(), settings.top_sections);
                println!("{}", render_text(&dashboard, settings.monthly_goal));
            }
            RefreshEvent::Failed(failure) => {
                eprintln!("Refresh failed: {failure}");
            }
        }
    }
    Ok(())
}

fn configure(
    cli: &Cli,
    ctx: AppContext,
    refresh_seconds: Option<u64>,
    monthly_goal: Option<u32>,
    cache_path: Option<PathBuf>,
) -> Result<()> {
    // Env credentials never end up in settings.json.
    let mut settings = ctx.store.load()?;
    apply_cli_overrides(cli, &mut settings);
    if let Some(seconds) = refresh_seconds {
        settings.refresh_seconds = seconds;
    }
    if let Some(goal) = monthly_goal {
        settings.monthly_goal = goal;
    }
    if cache_path.is_some() {
        settings.cache_path = cache_path;
    }
    ctx.store.save(&settings)?;
    println!("Saved settings to {}.", ctx.store.path().display());
    Ok(())
}

fn clear_cache(ctx: &AppContext) -> Result<()> {
    ctx.cache
        .clear()
        .with_context(|| format!("Failed to delete {}", ctx.cache.path().display()))?;
    println!("Cleared snapshot cache.");
    Ok(())
}
