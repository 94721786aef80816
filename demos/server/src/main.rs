use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::Parser;
use flexi_logger::Logger;

use gravstream::{
    cluster,
    config::{Backend, Config, Mode},
    server::Server,
    snapshot::SnapshotStore,
};

/// Runs an N-body simulation and serves its state to remote viewers.
#[derive(Parser, Debug)]
#[command(version)]
struct Args {
    /// YAML configuration file, overridden by the other arguments.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Number of bodies.
    #[arg(short = 'n', long)]
    bodies: Option<usize>,

    /// Gravitational constant.
    #[arg(short, long)]
    gravitation: Option<f64>,

    /// Time step of one iteration.
    #[arg(short = 'T', long)]
    timestep: Option<f64>,

    /// Positive constant added to the squared distances.
    #[arg(short, long)]
    damping: Option<f64>,

    /// Frames per second sent in push mode.
    #[arg(short = 'f', long)]
    update_rate: Option<f64>,

    /// Port to serve the viewers on.
    #[arg(short, long)]
    port: Option<u16>,

    /// Number of workers.
    #[arg(long)]
    ranks: Option<usize>,

    /// Threads per worker for the parallel backend, 0 to let the pool decide.
    #[arg(short, long)]
    threads: Option<usize>,

    /// Number of iterations, 0 to run until interrupted.
    #[arg(short, long)]
    iterations: Option<u64>,

    /// Iterations between two publications of the state.
    #[arg(long)]
    publish_every: Option<u64>,

    /// How the state is served: pull, change-gated or push.
    #[arg(long)]
    mode: Option<Mode>,

    /// Backend computing the steps: sequential, parallel or gpu.
    #[arg(long)]
    backend: Option<Backend>,

    /// Largest body array a viewer may be sent.
    #[arg(long)]
    max_bodies: Option<u32>,

    /// Seed of the initial random bodies.
    #[arg(long)]
    seed: Option<u64>,

    /// Kernel source replacing the built-in one of the gpu backend.
    #[arg(long)]
    kernel: Option<PathBuf>,
}

impl Args {
    fn into_config(self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::from_yaml_file(path)?,
            None => Config::default(),
        };

        macro_rules! overrides {
            ($($field: ident),+ $(,)?) => {
                $(if let Some(value) = self.$field {
                    config.$field = value;
                })+
            };
        }

        overrides!(
            bodies,
            gravitation,
            timestep,
            damping,
            update_rate,
            port,
            ranks,
            threads,
            iterations,
            publish_every,
            mode,
            backend,
            max_bodies,
            seed,
        );

        if self.kernel.is_some() {
            config.kernel = self.kernel;
        }

        config.validate()?;
        Ok(config)
    }
}

fn main() -> Result<()> {
    let _logger = Logger::try_with_env_or_str("info")?
        .format(flexi_logger::detailed_format)
        .start()?;

    let config = Args::parse()
        .into_config()
        .context("Invalid configuration")?;
    log::debug!("{config:?}");

    let store = Arc::new(SnapshotStore::new());
    let server = Server::bind(("0.0.0.0", config.port), store.clone(), config.serve_mode())
        .with_context(|| format!("Unable to listen on port {}", config.port))?
        .spawn()?;
    log::info!("Listening on {}", server.local_addr());

    let summary = cluster::run_config(&config, &store).context("Simulation failed")?;
    log::info!(
        "Finished after {} iterations, {:?} per iteration",
        summary.iterations,
        summary.mean_step()
    );

    Ok(())
}
