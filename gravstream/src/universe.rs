use std::{
    mem,
    ops::Range,
    time::{Duration, Instant},
};

use crate::{
    body::{Body, Vec3},
    collective::Collective,
    compute_method::{acceleration_at, ComputeMethod, Next, State},
    config::Parameters,
    error::{Error, SyncError},
    partition::PartitionTable,
};

#[derive(Clone, Debug, Default)]
struct Kinematics {
    position: Vec<Vec3>,
    velocity: Vec<Vec3>,
    acceleration: Vec<Vec3>,
}

impl Kinematics {
    fn zeroed(len: usize) -> Self {
        Self {
            position: vec![Vec3::ZERO; len],
            velocity: vec![Vec3::ZERO; len],
            acceleration: vec![Vec3::ZERO; len],
        }
    }
}

/// State of the simulation as seen by one worker.
///
/// Every worker holds the full state of the bodies but only advances the ones of its
/// [`Partition`](crate::partition::Partition). After each step the owned ranges are exchanged
/// through the [`Collective`] so that all workers start the next step from the same state.
///
/// Results of a step are written into a second set of buffers which are only swapped with the
/// current ones once the whole owned range has been computed.
pub struct Universe<M, C> {
    table: PartitionTable,
    byte_ranges: Vec<Range<usize>>,
    params: Parameters,
    mass: Vec<f64>,
    current: Kinematics,
    next: Kinematics,
    method: M,
    collective: C,
    iteration: u64,
}

impl<M, C> Universe<M, C>
where
    M: ComputeMethod,
    C: Collective,
{
    /// Creates a new [`Universe`] from the initial state of the bodies.
    ///
    /// This is a collective operation: the initial accelerations are computed by their owners and
    /// gathered, so every worker of the cluster must create its universe with the same bodies.
    pub fn new(bodies: &[Body], params: Parameters, method: M, collective: C) -> Result<Self, Error> {
        let table = PartitionTable::new(bodies.len(), collective.size())?;
        let byte_ranges = table.byte_ranges(mem::size_of::<Vec3>());

        let mut current = Kinematics::zeroed(bodies.len());
        for (i, body) in bodies.iter().enumerate() {
            current.position[i] = body.position;
            current.velocity[i] = body.velocity;
        }

        let mut universe = Self {
            table,
            byte_ranges,
            params,
            mass: bodies.iter().map(|body| body.mass).collect(),
            current,
            next: Kinematics::zeroed(bodies.len()),
            method,
            collective,
            iteration: 0,
        };

        log::info!(
            "Rank {}/{} owns bodies {:?}",
            universe.rank(),
            universe.collective.size(),
            universe.range()
        );

        universe.prime()?;

        Ok(universe)
    }

    // The leapfrog step uses the acceleration of the current step, which has to be known before
    // the first one.
    fn prime(&mut self) -> Result<(), SyncError> {
        for i in self.range() {
            self.current.acceleration[i] =
                acceleration_at(i, &self.mass, &self.current.position, &self.params);
        }

        self.collective.all_gather(
            bytemuck::cast_slice_mut(&mut self.current.acceleration),
            &self.byte_ranges,
        )
    }

    fn synchronize(&mut self) -> Result<(), SyncError> {
        let Kinematics {
            position,
            velocity,
            acceleration,
        } = &mut self.current;

        for field in [position, velocity, acceleration] {
            self.collective
                .all_gather(bytemuck::cast_slice_mut(field), &self.byte_ranges)?;
        }

        Ok(())
    }

    /// Advances the simulation by one step and returns the time it took.
    ///
    /// This is a collective operation that every worker of the cluster must call.
    pub fn step(&mut self) -> Result<Duration, Error> {
        let start = Instant::now();
        let range = self.range();

        let state = State {
            mass: &self.mass,
            position: &self.current.position,
            velocity: &self.current.velocity,
            acceleration: &self.current.acceleration,
        };
        let next = Next {
            position: &mut self.next.position[range.clone()],
            velocity: &mut self.next.velocity[range.clone()],
            acceleration: &mut self.next.acceleration[range.clone()],
        };

        self.method.compute(state, range, &self.params, next)?;

        mem::swap(&mut self.current, &mut self.next);
        self.synchronize()?;
        self.iteration += 1;

        let elapsed = start.elapsed();
        log::debug!(
            "Rank {} finished iteration {} in {:?}",
            self.rank(),
            self.iteration,
            elapsed
        );

        Ok(elapsed)
    }

    /// Returns a copy of the current state of every body.
    pub fn bodies(&self) -> Vec<Body> {
        self.mass
            .iter()
            .zip(&self.current.position)
            .zip(&self.current.velocity)
            .map(|((&mass, &position), &velocity)| Body {
                position,
                velocity,
                mass,
            })
            .collect()
    }

    /// Returns the current acceleration of every body.
    #[inline]
    pub fn accelerations(&self) -> &[Vec3] {
        &self.current.acceleration
    }

    /// Returns the rank of this worker.
    #[inline]
    pub fn rank(&self) -> usize {
        self.collective.rank()
    }

    /// Returns the range of bodies this worker advances.
    #[inline]
    pub fn range(&self) -> Range<usize> {
        self.table.range(self.rank())
    }

    /// Returns the partition of the bodies between the workers.
    #[inline]
    pub fn partition_table(&self) -> &PartitionTable {
        &self.table
    }

    /// Returns the number of steps taken so far.
    #[inline]
    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    /// Returns the number of bodies.
    #[inline]
    pub fn len(&self) -> usize {
        self.mass.len()
    }

    /// Returns `true` if there are no bodies.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.mass.is_empty()
    }

    /// Returns the parameters of the integrator.
    #[inline]
    pub fn parameters(&self) -> &Parameters {
        &self.params
    }
}
