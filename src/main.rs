//! # flux-sniffer
//!
//! Linux / macOS WiFi telemetry sensor.
//!
//! Listens on a monitor-mode interface for 802.11 management frames, turns
//! beacons, probe requests and (re)association / teardown frames into events,
//! and POSTs them to the Flux ingestion API.  The radio is hopped across the
//! 2.4 GHz channels at a cadence the API controls
//! (`GET /config/channel-hopping`).
//!
//! ## Requirements
//!
//! | Platform | Prerequisites |
//! |----------|---------------|
//! | Linux    | Run as **root**.  Interface already in monitor mode (`iw dev wlan0 set type monitor`) or pass `--rfmon`.  Channel changes use `iw`. |
//! | macOS    | Run as **root** (`sudo`).  Pass `--rfmon`; channel changes use `ifconfig`. |
//!
//! ## Examples
//!
//! ```text
//! sudo flux-sniffer wlan1mon
//! sudo flux-sniffer wlan0 --api-url http://10.0.0.5:8080 --queue-depth 256
//! RUST_LOG=debug sudo flux-sniffer wlan0 --track-data
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use flux_sniffer::capture::{self, CaptureConfig, TrafficConfig};

#[derive(Parser)]
#[command(name = "flux-sniffer")]
#[command(version, about = "802.11 probe/beacon sniffer that forwards sightings to an ingestion API")]
struct Cli {
    /// Monitor-mode interface to capture on.
    #[arg(default_value = "wlan0")]
    interface: String,

    /// Base URL of the ingestion API (also serves the channel-hopping policy).
    #[arg(long, env = "FLUX_API_URL", default_value = "http://127.0.0.1:8080")]
    api_url: String,

    /// Ask libpcap to enable monitor mode (rfmon) when opening the interface.
    #[arg(long)]
    rfmon: bool,

    /// Send events from a dedicated thread through a queue of this depth.
    /// 0 sends inline from the capture loop.  Events are dropped when the
    /// queue is full.
    #[arg(long, default_value_t = 0)]
    queue_depth: usize,

    /// Also count data frames per transmitter and report the volume.
    #[arg(long)]
    track_data: bool,

    /// Seconds of capture time a station's data tally covers before it is
    /// reported.
    #[arg(long, default_value_t = 30)]
    data_flush_secs: u64,

    /// Maximum number of stations tallied at once.
    #[arg(long, default_value_t = 1024)]
    data_max_stations: usize,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_secs()
        .init();

    let cli = Cli::parse();

    // ── Ctrl-C handler ──────────────────────────────────────────────────
    let running = Arc::new(AtomicBool::new(true));
    {
        let running = Arc::clone(&running);
        if let Err(e) = ctrlc::set_handler(move || {
            log::info!("Interrupt received — shutting down …");
            running.store(false, Ordering::Relaxed);
        }) {
            log::error!("Failed to set Ctrl-C handler: {e}");
            std::process::exit(1);
        }
    }

    // ── Capture loop ────────────────────────────────────────────────────
    let capture_cfg = CaptureConfig {
        interface: cli.interface,
        api_url: cli.api_url,
        rfmon: cli.rfmon,
        queue_depth: cli.queue_depth,
        traffic: cli.track_data.then(|| TrafficConfig {
            flush_after: Duration::from_secs(cli.data_flush_secs),
            max_stations: cli.data_max_stations,
        }),
    };

    if let Err(e) = capture::run(capture_cfg, Arc::clone(&running)) {
        log::error!("Capture failed: {e}");
        log::error!(
            "Make sure you are running as root and that the interface exists \
             and is in monitor mode."
        );
        std::process::exit(1);
    }

    log::info!("Done.");
}
