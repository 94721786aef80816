//! Runs a simulation over several workers.
//!
//! Each rank runs on its own thread and builds its own [`ComputeMethod`], so backend resources
//! such as a compute device never leave the thread of their rank. Ranks synchronise through a
//! [`LocalCluster`] after every step and rank 0, the coordinator, publishes the state of the
//! bodies into a [`SnapshotStore`].

use std::{
    thread,
    time::{Duration, Instant},
};

use crate::{
    body::Body,
    collective::{Collective, LocalCluster, LocalRank},
    compute_method::{sequential::Sequential, ComputeMethod},
    config::{Backend, Config, Parameters},
    error::{ConfigError, Error, SyncError},
    scenario,
    snapshot::SnapshotStore,
    universe::Universe,
};

/// Rank publishing the state of the simulation.
pub const COORDINATOR: usize = 0;

/// How many workers run a simulation, and for how long.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Schedule {
    /// Number of workers.
    pub ranks: usize,
    /// Number of steps to run, `0` to run forever.
    pub iterations: u64,
    /// Number of steps between two publications.
    pub publish_every: u64,
}

impl Default for Schedule {
    #[inline]
    fn default() -> Self {
        Self {
            ranks: 1,
            iterations: 0,
            publish_every: 1,
        }
    }
}

impl From<&Config> for Schedule {
    #[inline]
    fn from(config: &Config) -> Self {
        Self {
            ranks: config.ranks,
            iterations: config.iterations,
            publish_every: config.publish_every,
        }
    }
}

/// Outcome of a finished run, as seen by the coordinator.
#[derive(Clone, Debug, PartialEq)]
pub struct Summary {
    /// Number of steps taken.
    pub iterations: u64,
    /// Total time spent stepping.
    pub elapsed: Duration,
    /// Final state of the bodies.
    pub bodies: Vec<Body>,
}

impl Summary {
    /// Mean time spent on one step, zero if no step was taken.
    #[inline]
    pub fn mean_step(&self) -> Duration {
        self.elapsed.div_f64(self.iterations.max(1) as f64)
    }
}

/// Builds the [`ComputeMethod`] selected by the configuration.
///
/// Fails if the backend was not compiled in, or if the compute device cannot be set up.
pub fn compute_method(config: &Config) -> Result<Box<dyn ComputeMethod>, Error> {
    match config.backend {
        Backend::Sequential => Ok(Box::new(Sequential)),

        #[cfg(feature = "parallel")]
        Backend::Parallel => Ok(Box::new(
            crate::compute_method::parallel::Parallel::new(config.threads)?,
        )),

        #[cfg(feature = "gpu")]
        Backend::Gpu => {
            use crate::compute_method::gpu::DeviceBackend;

            let device = match &config.kernel {
                Some(path) => DeviceBackend::with_kernel_file(path)?,
                None => DeviceBackend::new()?,
            };
            Ok(Box::new(device))
        }

        #[allow(unreachable_patterns)]
        backend => Err(ConfigError::BackendUnavailable(backend).into()),
    }
}

/// Runs the simulation described by `config`, publishing into `store`.
pub fn run_config(config: &Config, store: &SnapshotStore) -> Result<Summary, Error> {
    config.validate()?;

    let bodies = scenario::from_config(config);
    log::info!(
        "Simulating {} bodies on {} rank(s) with the {} backend",
        bodies.len(),
        config.ranks,
        config.backend
    );

    run(
        &bodies,
        config.parameters(),
        Schedule::from(config),
        store,
        |_| compute_method(config),
    )
}

/// Runs a simulation of `bodies` according to `schedule`, publishing into `store`.
///
/// `make_method` is called on the thread of each rank with its rank. The coordinator publishes
/// the initial state, then the state every `schedule.publish_every` steps and after the last one.
///
/// A failing rank makes the others fail in turn. The error returned is the one that caused the
/// run to stop rather than the resulting loss of peers.
pub fn run<M, F>(
    bodies: &[Body],
    params: Parameters,
    schedule: Schedule,
    store: &SnapshotStore,
    make_method: F,
) -> Result<Summary, Error>
where
    M: ComputeMethod,
    F: Fn(usize) -> Result<M, Error> + Sync,
{
    let ranks = LocalCluster::new(schedule.ranks);
    if ranks.is_empty() {
        return Err(crate::error::PartitionError::NoWorkers.into());
    }
    if schedule.publish_every == 0 {
        let message = "snapshots must be published at least every iteration";
        return Err(ConfigError::Invalid(message.to_owned()).into());
    }

    let results = thread::scope(|scope| {
        let mut handles = Vec::with_capacity(ranks.len());

        for rank in ranks {
            let id = rank.rank();
            let make_method = &make_method;

            let handle = thread::Builder::new()
                .name(format!("gravstream-rank-{id}"))
                .spawn_scoped(scope, move || {
                    drive(bodies, params, schedule, store, make_method(id)?, rank)
                })
                .map_err(|source| Error::Spawn { rank: id, source })?;

            handles.push((id, handle));
        }

        Ok::<_, Error>(handles
            .into_iter()
            .map(|(id, handle)| handle.join().unwrap_or(Err(Error::RankPanicked(id))))
            .collect::<Vec<_>>())
    })?;

    let mut summary = None;
    let mut lost_peer = None;

    for result in results {
        match result {
            Ok(Some(coordinator)) => summary = Some(coordinator),
            Ok(None) => {}
            Err(Error::Sync(e @ SyncError::PeerLost { .. })) => {
                lost_peer.get_or_insert(Error::Sync(e));
            }
            Err(e) => return Err(e),
        }
    }

    match (lost_peer, summary) {
        (Some(e), _) => Err(e),
        (None, Some(summary)) => Ok(summary),
        (None, None) => Err(Error::RankPanicked(COORDINATOR)),
    }
}

// Steps one rank until the end of the schedule. Only the coordinator returns a summary.
fn drive<M: ComputeMethod>(
    bodies: &[Body],
    params: Parameters,
    schedule: Schedule,
    store: &SnapshotStore,
    method: M,
    rank: LocalRank,
) -> Result<Option<Summary>, Error> {
    let mut universe = Universe::new(bodies, params, method, rank)?;
    let coordinator = universe.rank() == COORDINATOR;

    if coordinator {
        store.publish(&universe.bodies());
    }

    let start = Instant::now();
    let mut elapsed = Duration::ZERO;
    let mut published = true;

    while schedule.iterations == 0 || universe.iteration() < schedule.iterations {
        elapsed += universe.step()?;

        published = universe.iteration() % schedule.publish_every == 0;
        if coordinator && published {
            store.publish(&universe.bodies());
        }
    }

    if !coordinator {
        return Ok(None);
    }

    if !published {
        store.publish(&universe.bodies());
    }

    log::info!(
        "Ran {} iterations in {:?} ({:?} stepping)",
        universe.iteration(),
        start.elapsed(),
        elapsed
    );

    Ok(Some(Summary {
        iterations: universe.iteration(),
        elapsed,
        bodies: universe.bodies(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{body::Vec3, scenario::random_cloud};
    use rand::{rngs::StdRng, SeedableRng};

    fn params() -> Parameters {
        Parameters {
            gravitation: 1.0,
            timestep: 0.5,
            softening: 1.0,
        }
    }

    fn schedule(ranks: usize, iterations: u64, publish_every: u64) -> Schedule {
        Schedule {
            ranks,
            iterations,
            publish_every,
        }
    }

    #[test]
    fn publishes_initial_and_final_state() {
        let bodies = random_cloud(&mut StdRng::seed_from_u64(3), 10);
        let store = SnapshotStore::new();

        let summary = run(&bodies, params(), schedule(3, 7, 3), &store, |_| Ok(Sequential)).unwrap();

        assert_eq!(summary.iterations, 7);
        assert_ne!(summary.bodies, bodies);
        // Initial state, after steps 3 and 6, then the final state.
        assert_eq!(store.generation(), 4);
        assert_eq!(store.read_copy(), summary.bodies);
    }

    #[test]
    fn rank_count_does_not_change_results() {
        let bodies = random_cloud(&mut StdRng::seed_from_u64(5), 13);

        let reference = run(
            &bodies,
            params(),
            schedule(1, 4, 1),
            &SnapshotStore::new(),
            |_| Ok(Sequential),
        )
        .unwrap();

        for ranks in [2, 4, 16] {
            let summary = run(
                &bodies,
                params(),
                schedule(ranks, 4, 1),
                &SnapshotStore::new(),
                |_| Ok(Sequential),
            )
            .unwrap();

            assert_eq!(summary.bodies, reference.bodies);
        }
    }

    #[test]
    fn failing_rank_stops_the_run() {
        let bodies = vec![Body::new(Vec3::ONE, 1.0); 4];

        let result = run(
            &bodies,
            params(),
            schedule(3, 0, 1),
            &SnapshotStore::new(),
            |rank| match rank {
                1 => Err(ConfigError::Invalid("rank 1 cannot start".to_owned()).into()),
                _ => Ok(Sequential),
            },
        );

        assert!(matches!(result, Err(Error::Config(ConfigError::Invalid(_)))));
    }

    #[test]
    fn no_ranks() {
        let result = run(&[], params(), schedule(0, 1, 1), &SnapshotStore::new(), |_| {
            Ok(Sequential)
        });

        assert!(matches!(result, Err(Error::Partition(_))));
    }

    #[test]
    fn never_publishing() {
        let bodies = random_cloud(&mut StdRng::seed_from_u64(7), 4);
        let store = SnapshotStore::new();

        let result = run(&bodies, params(), schedule(1, 3, 0), &store, |_| Ok(Sequential));

        assert!(matches!(result, Err(Error::Config(ConfigError::Invalid(_)))));
        assert_eq!(store.generation(), 0);
    }

    #[test]
    fn mean_step_of_long_runs() {
        let summary = |iterations| Summary {
            iterations,
            elapsed: Duration::from_secs(1 << 33),
            bodies: Vec::new(),
        };

        assert_eq!(summary(0).mean_step(), Duration::from_secs(1 << 33));
        assert_eq!(summary(4).mean_step(), Duration::from_secs(1 << 31));
        // More steps than fit in a u32.
        assert_eq!(summary(1 << 33).mean_step(), Duration::from_secs(1));
    }

    #[test]
    fn config_selects_backend() {
        let store = SnapshotStore::new();
        let config = Config {
            bodies: 8,
            iterations: 2,
            ranks: 2,
            ..Config::default()
        };

        let summary = run_config(&config, &store).unwrap();
        assert_eq!(summary.bodies.len(), 8);

        #[cfg(not(feature = "gpu"))]
        assert!(matches!(
            compute_method(&Config {
                backend: Backend::Gpu,
                ..Config::default()
            }),
            Err(Error::Config(ConfigError::BackendUnavailable(Backend::Gpu)))
        ));
    }
}
