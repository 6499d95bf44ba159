use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, level_filters::LevelFilter, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use pacebeat::background::SimulatedHost;
use pacebeat::cadence::ScriptedCadenceSource;
use pacebeat::catalog::{ProfileService, WebApiClient};
use pacebeat::config::{AppConfig, CliConfig, FileConfig};
use pacebeat::metrics;
use pacebeat::playback::{PlaybackObserver, SimulatedPlaybackEngine};
use pacebeat::reconciler::QueueReconciler;
use pacebeat::session::TrackingSession;

#[derive(Parser, Debug)]
#[clap(version = env!("PACEBEAT_BUILD_ID"))]
struct CliArgs {
    /// Path to a TOML config file. Values in the file override CLI flags.
    #[clap(long)]
    pub config: Option<PathBuf>,

    /// Base URL of the catalog Web API.
    #[clap(long)]
    pub api_base_url: Option<String>,

    /// Bearer token for the catalog Web API.
    #[clap(long)]
    pub access_token: Option<String>,

    /// Timeout in seconds for catalog requests.
    #[clap(long, default_value_t = 30)]
    pub request_timeout_sec: u64,

    /// Match this fixed tempo instead of following cadence.
    #[clap(long)]
    pub manual_tempo: Option<f64>,

    /// Genre seed for recommendations. Can be repeated, at most 5.
    #[clap(long = "genre")]
    pub genres: Vec<String>,

    /// Scripted cadence readings in steps per second. The last one repeats.
    #[clap(long = "steps-per-sec", default_values_t = vec![2.6, 2.7, 2.8])]
    pub steps_per_sec: Vec<f64>,

    /// Delay between two scripted cadence readings.
    #[clap(long, default_value_t = 1000)]
    pub cadence_interval_ms: u64,

    /// How long to run before stopping.
    #[clap(long, default_value_t = 60)]
    pub duration_secs: u64,

    /// Move to the background after this many seconds.
    #[clap(long)]
    pub background_after_secs: Option<u64>,

    /// Extra time the simulated host grants in the background.
    #[clap(long, default_value_t = 30)]
    pub background_allowance_secs: u64,

    /// Length of every track in the simulated player.
    #[clap(long, default_value_t = 20)]
    pub simulated_track_secs: u64,

    /// Print Prometheus metrics on exit.
    #[clap(long)]
    pub dump_metrics: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .context("Failed to initialize logging")?;

    info!("pacebeat {}", env!("PACEBEAT_BUILD_ID"));

    let file_config = cli_args
        .config
        .as_deref()
        .map(FileConfig::load)
        .transpose()?;
    let cli_config = CliConfig {
        api_base_url: cli_args.api_base_url.clone(),
        access_token: cli_args.access_token.clone(),
        request_timeout_sec: cli_args.request_timeout_sec,
        manual_tempo: cli_args.manual_tempo,
        genres: cli_args.genres.clone(),
    };
    let config = AppConfig::resolve(&cli_config, file_config)?;
    info!(
        "Mode {:?}, genres {:?}",
        config.preferences.mode, config.preferences.genre_seeds
    );

    metrics::init_metrics();

    let shutdown = CancellationToken::new();
    // Ctrl-C ends the run; background tasks are shut down only after
    // tracking has been stopped through them.
    let interrupted = CancellationToken::new();
    {
        let interrupted = interrupted.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupted, shutting down");
                interrupted.cancel();
            }
        });
    }

    let client = WebApiClient::new(&config.api_base_url, config.request_timeout_sec)
        .context("Failed to create catalog client")?;
    let client = Arc::new(match config.access_token.clone() {
        Some(token) => client.with_access_token(token),
        None => client,
    });
    if client.has_credential() {
        match client.current_user().await {
            Ok(profile) => info!("Signed in as {}", profile.display_name),
            Err(e) => warn!("Could not load user profile: {}", e),
        }
    } else {
        warn!("No access token configured, recommendations will fail until authorized");
    }

    let engine = Arc::new(SimulatedPlaybackEngine::new(Duration::from_secs(
        cli_args.simulated_track_secs.max(1),
    )));
    let autoplay = engine.spawn_autoplay(shutdown.clone());

    // Settings UI stand-in: the sender stays alive for the whole run.
    let (_preferences_tx, preferences_rx) = watch::channel(config.preferences.clone());
    let (reconciler, reconciler_task) = QueueReconciler::spawn(
        client.clone(),
        engine.clone(),
        preferences_rx,
        config.matching.clone(),
        &config.reconciler,
        shutdown.clone(),
    );

    let observer = PlaybackObserver::spawn(
        engine.clone(),
        client.clone(),
        reconciler.clone(),
        shutdown.clone(),
    );
    {
        let mut alerts = observer.alerts();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    alert = alerts.recv() => match alert {
                        Ok(alert) => warn!("ALERT: {}", alert),
                        Err(_) => break,
                    },
                }
            }
        });
    }

    let source = Arc::new(ScriptedCadenceSource::new(
        cli_args.steps_per_sec.clone(),
        Duration::from_millis(cli_args.cadence_interval_ms.max(1)),
    ));
    let host = Arc::new(SimulatedHost::new(Duration::from_secs(
        cli_args.background_allowance_secs,
    )));
    let session = TrackingSession::new(
        source,
        reconciler.clone(),
        host,
        config.reconciler.clone(),
        config.background.clone(),
    );
    info!("Session {}", session.id());

    session.start_tracking().await?;

    let deadline = Instant::now() + Duration::from_secs(cli_args.duration_secs);
    let timeline = async {
        if let Some(after) = cli_args.background_after_secs {
            tokio::time::sleep(Duration::from_secs(after)).await;
            info!("Moving to background");
            session.enter_background().await?;
        }
        tokio::time::sleep_until(deadline).await;
        Ok::<_, anyhow::Error>(())
    };
    let outcome = tokio::select! {
        _ = interrupted.cancelled() => Ok(()),
        result = timeline => result,
    };

    if let Err(e) = session.stop_tracking().await {
        warn!("Failed to stop tracking: {}", e);
    }
    match reconciler.snapshot().await {
        Ok(snapshot) => info!(
            "Done: {} queued, {} retired, {} fetches ({} empty, {} failed), {} gate denials",
            snapshot.stats.appended,
            snapshot.stats.retired,
            snapshot.stats.attempts,
            snapshot.stats.empty_results,
            snapshot.stats.failures,
            snapshot.stats.gate_denied
        ),
        Err(e) => warn!("Could not read final reconciler state: {}", e),
    }

    shutdown.cancel();
    observer.join().await;
    if let Err(e) = reconciler_task.await {
        warn!("Reconciler task failed: {}", e);
    }
    if let Err(e) = autoplay.await {
        warn!("Autoplay task failed: {}", e);
    }

    if cli_args.dump_metrics {
        println!("{}", metrics::gather_text());
    }

    outcome
}
