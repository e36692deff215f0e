use std::time::Duration;

use clap::Parser;
use plugin_telemetry::{PipelineBuilder, read_config_file};
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, level_filters::LevelFilter, trace, warn};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Config file
    #[arg(short)]
    file: String,

    /// Seconds between status lines (0 disables them)
    #[arg(long, default_value_t = 60)]
    status_interval: u64,
}

fn init() {
    let filter = filter::Targets::new().with_targets(vec![
        ("plugin_telemetry", LevelFilter::TRACE),
        ("telemetry_hub", LevelFilter::TRACE),
    ]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init();
    let args = Args::parse();
    trace!("started with args: {args:?}");

    let config = read_config_file(&args.file)?;
    let pipeline = PipelineBuilder::new(config).build().await?;
    pipeline.start()?;

    pipeline.log_backend_stats().await;

    let shutdown = wait_for_shutdown();
    tokio::pin!(shutdown);

    if args.status_interval == 0 {
        shutdown.await;
    } else {
        let period = Duration::from_secs(args.status_interval);
        let mut ticker = time::interval_at(time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => {
                    let ingest = pipeline.ingest_stats();
                    let rules = pipeline.rule_stats();
                    info!(
                        accepted = ingest.accepted,
                        rejected = ingest.rejected,
                        alerts = rules.alerts_created,
                        suppressed = rules.suppressed,
                        active = pipeline.query().active_alerts().len(),
                        "status"
                    );
                }
            }
        }
    }

    info!("shutting down");
    pipeline.stop().await;
    debug!("bye");
    Ok(())
}

async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
                return;
            }
            Err(e) => warn!("could not install SIGTERM handler: {e}"),
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("could not listen for ctrl-c: {e}");
    }
}
