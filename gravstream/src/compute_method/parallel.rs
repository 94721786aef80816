use std::ops::Range;

use rayon::prelude::*;

use super::{check_range, leapfrog, ComputeMethod, Next, State};
use crate::{config::Parameters, error::ComputeError};

/// A brute-force [`ComputeMethod`] using multiple CPU threads with
/// [rayon](https://github.com/rayon-rs/rayon).
///
/// Every iteration only writes the outputs of its own body, so the owned range is split between
/// the threads of the pool without any synchronisation.
#[derive(Debug)]
pub struct Parallel {
    pool: rayon::ThreadPool,
}

impl Parallel {
    /// Creates a new [`Parallel`] compute method with its own pool of `threads` threads.
    ///
    /// If `threads` is 0, rayon picks the number of threads.
    pub fn new(threads: usize) -> Result<Self, rayon::ThreadPoolBuildError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("gravstream-compute-{i}"))
            .build()?;

        Ok(Self { pool })
    }

    /// Returns the number of threads of the pool.
    #[inline]
    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }
}

impl ComputeMethod for Parallel {
    #[inline]
    fn compute(
        &mut self,
        state: State<'_>,
        range: Range<usize>,
        params: &Parameters,
        next: Next<'_>,
    ) -> Result<(), ComputeError> {
        check_range(&state, &range, &next)?;

        let offset = range.start;
        let Next {
            position,
            velocity,
            acceleration,
        } = next;

        self.pool.install(|| {
            position
                .par_iter_mut()
                .zip(velocity.par_iter_mut())
                .zip(acceleration.par_iter_mut())
                .enumerate()
                .for_each(|(k, ((position, velocity), acceleration))| {
                    (*position, *velocity, *acceleration) = leapfrog(offset + k, &state, params);
                });
        });

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests;
    use super::*;

    #[test]
    fn parallel() {
        tests::step_computation(Parallel::new(3).unwrap(), 1e-12);
    }

    #[test]
    fn default_thread_count() {
        assert!(Parallel::new(0).unwrap().threads() >= 1);
    }
}
