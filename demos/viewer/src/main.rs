use std::{thread, time::Duration};

use anyhow::{Context, Result};
use clap::Parser;
use flexi_logger::Logger;

use gravstream::{
    body::{centre_of_mass, Body},
    client::Client,
    config::DEFAULT_PORT,
};

/// Connects to a gravstream server and logs a summary of every received frame.
#[derive(Parser, Debug)]
#[command(version)]
struct Args {
    /// Host running the server.
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Port of the server.
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Wait for pushed frames instead of requesting them.
    #[arg(long)]
    subscribe: bool,

    /// Requests per second when polling.
    #[arg(short = 'f', long, default_value_t = 30.0)]
    rate: f64,

    /// Number of frames to receive before leaving, 0 to never leave.
    #[arg(long, default_value_t = 0)]
    frames: u64,

    /// Largest body array accepted from the server.
    #[arg(long, default_value_t = 1 << 20)]
    max_bodies: u32,
}

fn summarise(frame: u64, bodies: &[Body]) {
    if bodies.is_empty() {
        log::debug!("Frame {frame}: nothing new");
        return;
    }

    let extent = bodies
        .iter()
        .map(|body| body.position.length())
        .fold(0.0, f64::max);

    log::info!(
        "Frame {frame}: {} bodies, centre of mass {}, extent {:.3}",
        bodies.len(),
        centre_of_mass(bodies),
        extent
    );
}

fn main() -> Result<()> {
    let _logger = Logger::try_with_env_or_str("info")?
        .format(flexi_logger::detailed_format)
        .start()?;

    let args = Args::parse();
    anyhow::ensure!(args.rate > 0.0, "the request rate must be positive");

    let mut client = Client::connect((args.host.as_str(), args.port), args.max_bodies)
        .with_context(|| format!("Unable to connect to {}:{}", args.host, args.port))?;
    log::info!("Connected to {}:{}", args.host, args.port);

    let period = Duration::from_secs_f64(1.0 / args.rate);
    let mut frame = 0;

    while args.frames == 0 || frame < args.frames {
        let bodies = if args.subscribe {
            client.next_frame()?
        } else {
            let bodies = client.request_bodies()?;
            thread::sleep(period);
            bodies
        };

        frame += 1;
        summarise(frame, &bodies);
    }

    client.disconnect()?;
    log::info!("Disconnected after {frame} frames");

    Ok(())
}
