use std::ops::Range;

use super::{check_range, leapfrog, ComputeMethod, Next, State};
use crate::{config::Parameters, error::ComputeError};

/// A brute-force [`ComputeMethod`] looping over the owned bodies on the calling thread.
#[derive(Clone, Copy, Debug, Default)]
pub struct Sequential;

impl ComputeMethod for Sequential {
    #[inline]
    fn compute(
        &mut self,
        state: State<'_>,
        range: Range<usize>,
        params: &Parameters,
        next: Next<'_>,
    ) -> Result<(), ComputeError> {
        check_range(&state, &range, &next)?;

        let outputs = next
            .position
            .iter_mut()
            .zip(next.velocity.iter_mut())
            .zip(next.acceleration.iter_mut());

        for (i, ((position, velocity), acceleration)) in range.zip(outputs) {
            (*position, *velocity, *acceleration) = leapfrog(i, &state, params);
        }

        Ok(())
    }
}
