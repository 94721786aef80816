use rand::prelude::*;

use crate::{
    body::{Body, Vec3},
    config::Config,
};

/// Half-extent of the cube the bodies of [`random_cloud`] are spread in.
pub const CLOUD_EXTENT: f64 = 5e3;

/// Returns two bodies at rest on the x axis, the second one twice as heavy as the first.
///
/// Their centre of mass lies at the origin.
pub fn binary_pair() -> Vec<Body> {
    vec![
        Body::new(Vec3::new(-1.0, 0.0, 0.0), 1e5),
        Body::new(Vec3::new(0.5, 0.0, 0.0), 2e5),
    ]
}

/// Returns `count` bodies at rest with random positions and masses.
///
/// Positions are uniform in `[-CLOUD_EXTENT, CLOUD_EXTENT)` on every axis, masses in `[1e-1, 1e3)`.
pub fn random_cloud(rng: &mut impl Rng, count: usize) -> Vec<Body> {
    (0..count)
        .map(|_| {
            let position = Vec3::new(
                rng.gen_range(-CLOUD_EXTENT..CLOUD_EXTENT),
                rng.gen_range(-CLOUD_EXTENT..CLOUD_EXTENT),
                rng.gen_range(-CLOUD_EXTENT..CLOUD_EXTENT),
            );

            Body::new(position, rng.gen_range(1e-1..1e3))
        })
        .collect()
}

/// Returns the initial bodies of a run.
///
/// Two bodies give the [`binary_pair`], any other count a [`random_cloud`] seeded with the
/// configured seed, so that every worker of a run starts from the same bodies.
pub fn from_config(config: &Config) -> Vec<Body> {
    match config.bodies {
        2 => binary_pair(),
        count => random_cloud(&mut StdRng::seed_from_u64(config.seed), count),
    }
}
