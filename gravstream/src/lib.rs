#![warn(missing_docs)]
//! # Gravstream
//!
//! Gravstream is a crate to run distributed N-body gravitational simulations and stream their
//! state to remote viewers while they run.
//!
//! ## Goals
//!
//! A simulation advances a fixed set of bodies with a leapfrog (velocity Verlet) integrator. The
//! bodies are split between several workers, or ranks, each advancing its own share and
//! exchanging it with the others after every step. Meanwhile, viewers connect over TCP and pull,
//! or get pushed, consistent copies of the state without ever holding up the integration.
//!
//! Gravstream uses [rayon](https://github.com/rayon-rs/rayon) for parallelization within a rank
//! and [wgpu](https://github.com/gfx-rs/wgpu) to offload the kernel to a compute device.
//! Enable the respective `parallel` and `gpu` features to access the relevant backends.
//!
//! ## Using Gravstream
//!
//! ### Stepping a simulation
//!
//! A [`Universe`] holds the state of the bodies for one rank. It is created from the initial
//! bodies, a [`ComputeMethod`] that computes the steps, and a [`Collective`] connecting it to the
//! other ranks. A single worker uses [`Solo`].
//!
//! ```
//! use gravstream::prelude::*;
//!
//! let bodies = [
//!     Body::new(Vec3::new(-5.0, 0.0, 0.0), 1e4),
//!     Body::new(Vec3::new(5.0, 0.0, 0.0), 1e4),
//! ];
//! let params = Parameters {
//!     gravitation: 6.674e-11,
//!     timestep: 1.0,
//!     softening: 1.0,
//! };
//!
//! let mut universe = Universe::new(&bodies, params, Sequential, Solo)?;
//! universe.step()?;
//!
//! let bodies = universe.bodies();
//! assert!(bodies[0].position.x > -5.0);
//! assert!(bodies[1].position.x < 5.0);
//! # Ok::<(), gravstream::error::Error>(())
//! ```
//!
//! Several ranks in the same process are connected by a [`LocalCluster`], each running on its own
//! thread. The [`cluster`] module does this for you and publishes the state into a
//! [`SnapshotStore`] as it goes.
//!
//! ```
//! use gravstream::prelude::*;
//! use gravstream::cluster::{self, Schedule};
//!
//! let bodies: Vec<_> = (0..10)
//!     .map(|i| Body::new(Vec3::new(i as f64, 0.0, 0.0), 1.0))
//!     .collect();
//! let schedule = Schedule {
//!     ranks: 3,
//!     iterations: 5,
//!     publish_every: 1,
//! };
//!
//! let store = SnapshotStore::new();
//! let summary = cluster::run(&bodies, Parameters::default(), schedule, &store, |_| Ok(Sequential))?;
//!
//! assert_eq!(summary.iterations, 5);
//! assert_eq!(store.read_copy(), summary.bodies);
//! # Ok::<(), gravstream::error::Error>(())
//! ```
//!
//! ### Streaming the state
//!
//! A [`Server`] serves the content of a [`SnapshotStore`] with the binary [`protocol`], and a
//! [`Client`] reads it back.
//!
//! ```
//! use std::sync::Arc;
//! use gravstream::prelude::*;
//!
//! let store = Arc::new(SnapshotStore::new());
//! store.publish(&[Body::new(Vec3::ONE, 2.0)]);
//!
//! let server = Server::bind("127.0.0.1:0", store.clone(), ServeMode::ChangeGated)?.spawn()?;
//!
//! let mut client = Client::connect(server.local_addr(), 1024)?;
//! assert_eq!(client.request_bodies()?.len(), 1);
//! // Nothing was published since.
//! assert_eq!(client.request_bodies()?.len(), 0);
//! client.disconnect()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

/// Bodies and vectors.
pub mod body;
/// Viewer side of the distribution protocol.
pub mod client;
pub mod cluster;
/// Synchronisation of the ranks of a simulation.
pub mod collective;
/// Backends computing the steps of a simulation.
pub mod compute_method;
pub mod config;
/// Error types.
pub mod error;
/// Partitioning of the bodies between the ranks.
pub mod partition;
pub mod protocol;
/// Initial states of the bodies.
pub mod scenario;
/// Distribution server.
pub mod server;
/// Latest published state of a simulation.
pub mod snapshot;
/// Integrator state of one rank.
pub mod universe;

/// Most commonly used types.
pub mod prelude {
    #[cfg(feature = "gpu")]
    pub use crate::compute_method::gpu::DeviceBackend;
    #[cfg(feature = "parallel")]
    pub use crate::compute_method::parallel::Parallel;

    pub use crate::{
        body::{Body, Vec3},
        client::Client,
        collective::{Collective, LocalCluster, Solo},
        compute_method::{sequential::Sequential, ComputeMethod},
        config::{Config, Parameters},
        error::ComputeError,
        partition::PartitionTable,
        server::{ServeMode, Server},
        snapshot::SnapshotStore,
        universe::Universe,
    };
}

pub use prelude::*;
