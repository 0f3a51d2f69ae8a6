use anyhow::Result;
use clap::Parser;
use kioskclock::clock::MonotonicClock;
use kioskclock::config::KioskConfig;
use kioskclock::driver::Driver;
use kioskclock::present::TerminalSink;
use kioskclock::source::{HttpSource, ScheduleSource, SnapshotSource};
use log::{error, info};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Countdown server base URL
    #[arg(short, long, default_value = "http://127.0.0.1:5000")]
    server: String,

    /// Run offline from a local schedule file instead of a server
    #[arg(long)]
    schedule: Option<PathBuf>,

    /// JSON config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Write a JSON status snapshot here every status interval
    #[arg(long)]
    status_file: Option<PathBuf>,

    /// Poll only, never open the push stream
    #[arg(long, default_value_t = false)]
    no_push: bool,

    #[arg(short, long, default_value_t = false)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::builder()
        .format_timestamp(None)
        .filter_level(if args.verbose { log::LevelFilter::Debug } else { log::LevelFilter::Info })
        .init();

    let mut config = match &args.config {
        Some(path) => match KioskConfig::load(path) {
            Ok(c) => c,
            Err(e) => {
                error!("{}", e);
                return Err(e);
            }
        },
        None => KioskConfig::default().sanitized(),
    };
    if args.no_push {
        config.transport.push_enabled = false;
    }

    let source = match &args.schedule {
        Some(path) => {
            info!("Offline mode, schedule {}", path.display());
            SnapshotSource::Schedule(ScheduleSource::new(path.clone(), &config))
        }
        None => SnapshotSource::Http(HttpSource::new(&args.server, &config)?),
    };

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();

    ctrlc::set_handler(move || {
        info!("Ctrl+C received. Shutting down...");
        r.store(false, Ordering::SeqCst);
    })?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    info!("Starting render loop ({}ms cadence)...", config.render.cadence_ms);
    let driver = Driver::new(MonotonicClock::new(), &config, source, TerminalSink::stdout(), running)
        .with_status_file(args.status_file);
    let status = runtime.block_on(driver.run());

    // Leave the prompt below the countdown line
    println!();
    info!("Exiting ({} frames, {} fetch failures).", status.frames, status.fetch_failures);
    Ok(())
}
