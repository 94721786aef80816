use std::ops::Range;

use crate::{body::Vec3, config::Parameters, error::ComputeError};

/// Compute method that offloads the kernel to a compute device.
#[cfg(feature = "gpu")]
pub mod gpu;

/// Compute method that uses multiple CPU threads.
#[cfg(feature = "parallel")]
pub mod parallel;

/// Compute method that uses one CPU thread.
pub mod sequential;

/// Read-only view of the state of every body at the current step.
#[derive(Clone, Copy, Debug)]
pub struct State<'a> {
    /// Mass of every body.
    pub mass: &'a [f64],
    /// Position of every body.
    pub position: &'a [Vec3],
    /// Velocity of every body.
    pub velocity: &'a [Vec3],
    /// Acceleration of every body.
    pub acceleration: &'a [Vec3],
}

impl State<'_> {
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
}

/// Output buffers of a step, restricted to the bodies owned by the worker.
///
/// Index `k` of each slice holds the result for body `range.start + k`.
#[derive(Debug)]
pub struct Next<'a> {
    /// Next position of the owned bodies.
    pub position: &'a mut [Vec3],
    /// Next velocity of the owned bodies.
    pub velocity: &'a mut [Vec3],
    /// Next acceleration of the owned bodies.
    pub acceleration: &'a mut [Vec3],
}

/// Execution backend of the integrator.
///
/// Implementations compute the next position, velocity and acceleration of the bodies in `range`
/// from the [`State`] of all bodies, and write them into `next`. They must never write anywhere
/// else, which is what makes the computation over the range order-independent.
///
/// # Example
///
/// ```
/// # use std::ops::Range;
/// # use gravstream::prelude::*;
/// # use gravstream::compute_method::{leapfrog, Next, State};
/// struct Verbose;
///
/// impl ComputeMethod for Verbose {
///     fn compute(
///         &mut self,
///         state: State<'_>,
///         range: Range<usize>,
///         params: &Parameters,
///         next: Next<'_>,
///     ) -> Result<(), ComputeError> {
///         for (k, i) in range.enumerate() {
///             let (position, velocity, acceleration) = leapfrog(i, &state, params);
///             println!("body {i} moves to {position}");
///
///             next.position[k] = position;
///             next.velocity[k] = velocity;
///             next.acceleration[k] = acceleration;
///         }
///
///         Ok(())
///     }
/// }
/// ```
pub trait ComputeMethod {
    /// Advances the bodies in `range` by one step, writing the results to `next`.
    fn compute(
        &mut self,
        state: State<'_>,
        range: Range<usize>,
        params: &Parameters,
        next: Next<'_>,
    ) -> Result<(), ComputeError>;
}

impl<C: ComputeMethod + ?Sized> ComputeMethod for Box<C> {
    #[inline]
    fn compute(
        &mut self,
        state: State<'_>,
        range: Range<usize>,
        params: &Parameters,
        next: Next<'_>,
    ) -> Result<(), ComputeError> {
        (**self).compute(state, range, params, next)
    }
}

/// Returns the gravitational acceleration all the bodies of the state exert on body `i`.
///
/// Bodies sharing the exact position of body `i` are skipped, which avoids dividing by zero.
#[inline]
pub fn acceleration_at(i: usize, mass: &[f64], position: &[Vec3], params: &Parameters) -> Vec3 {
    let p1 = position[i];

    let acceleration = mass
        .iter()
        .zip(position)
        .enumerate()
        .filter(|&(j, (_, &p2))| j != i && p2 != p1)
        .fold(Vec3::ZERO, |acceleration, (_, (&m2, &p2))| {
            let dir = p2 - p1;
            let mag_2 = dir.length_squared();
            let scalar = m2 / (mag_2 + params.softening);

            acceleration + dir * (scalar / mag_2.sqrt())
        });

    acceleration * params.gravitation
}

/// Returns the next position, velocity and acceleration of body `i` using a leapfrog
/// (velocity-Verlet) step.
#[inline]
pub fn leapfrog(i: usize, state: &State<'_>, params: &Parameters) -> (Vec3, Vec3, Vec3) {
    let dt = params.timestep;
    let (r, v, a) = (state.position[i], state.velocity[i], state.acceleration[i]);

    let a_next = acceleration_at(i, state.mass, state.position, params);
    let r_next = r + v * dt + a * (dt * dt) / 2.0;
    let v_next = v + (a + a_next) / 2.0 * dt;

    (r_next, v_next, a_next)
}

/// Checks that `range` lies within the bodies of the state and that `next` matches its length.
#[inline]
pub(crate) fn check_range(
    state: &State<'_>,
    range: &Range<usize>,
    next: &Next<'_>,
) -> Result<(), ComputeError> {
    let len = state.len();
    let out_of_bounds = range.start > range.end
        || range.end > len
        || next.position.len() != range.len()
        || next.velocity.len() != range.len()
        || next.acceleration.len() != range.len();

    if out_of_bounds {
        return Err(ComputeError::RangeOutOfBounds {
            start: range.start,
            end: range.end,
            len,
        });
    }

    Ok(())
}
