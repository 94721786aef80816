#![allow(missing_docs)]

use std::{io, path::PathBuf};

use thiserror::Error;

use crate::config::Backend;

/// Errors building a [`PartitionTable`](crate::partition::PartitionTable).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PartitionError {
    #[error("no workers configured")]
    NoWorkers,
}

/// Errors raised by the collective synchronisation of the ranks.
///
/// These are never recoverable: the cluster state can no longer be trusted.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("rank {rank} lost its connection to rank {peer}")]
    PeerLost { rank: usize, peer: usize },

    #[error("expected {expected} ranges for the all-gather, got {found}")]
    RangeCount { expected: usize, found: usize },

    #[error("rank {peer} contributed {found} bytes but owns {expected}")]
    ContributionSize {
        peer: usize,
        expected: usize,
        found: usize,
    },

    #[error("range {start}..{end} is out of the {len} byte buffer")]
    OutOfBounds { start: usize, end: usize, len: usize },
}

/// Errors related to the compute device.
#[cfg(feature = "gpu")]
#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("no compatible compute adapter was found")]
    NoAdapter,

    #[error("unable to request the compute device")]
    RequestDevice(#[from] wgpu::RequestDeviceError),

    #[error("unable to read the kernel source at {path:?}")]
    KernelRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("the kernel failed to build: {0}")]
    KernelBuild(String),

    #[error("unable to map the result buffer")]
    BufferMap(#[from] wgpu::BufferAsyncError),

    #[error("the result buffer mapping was dropped before completing")]
    MapCancelled,
}

/// Errors raised by a [`ComputeMethod`](crate::compute_method::ComputeMethod).
#[derive(Error, Debug)]
pub enum ComputeError {
    #[error("owned range {start}..{end} exceeds the {len} bodies of the simulation")]
    RangeOutOfBounds { start: usize, end: usize, len: usize },

    #[cfg(feature = "gpu")]
    #[error("compute device failure")]
    Device(#[from] DeviceError),
}

/// Errors of the wire protocol.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("connection failure")]
    Io(#[from] io::Error),

    #[error("peer announced {count} bodies, more than the limit of {limit}")]
    CountTooLarge { count: u32, limit: u32 },

    #[error("cannot encode {0} bodies in a single frame")]
    TooManyBodies(usize),

    #[error("expected code {expected}, received {found}")]
    UnexpectedCode { expected: u32, found: u32 },
}

impl ProtocolError {
    /// Returns `true` if the error means the peer closed the connection.
    #[inline]
    pub fn is_disconnect(&self) -> bool {
        match self {
            Self::Io(err) => matches!(
                err.kind(),
                io::ErrorKind::UnexpectedEof
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
            ),
            _ => false,
        }
    }
}

/// Errors loading or validating a [`Config`](crate::config::Config).
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("unable to read the configuration file {path:?}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("unable to parse the configuration")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("the {0} backend is not available in this build")]
    BackendUnavailable(Backend),
}

/// Fatal errors of a simulation run.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Partition(#[from] PartitionError),

    #[error(transparent)]
    Compute(#[from] ComputeError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[cfg(feature = "gpu")]
    #[error(transparent)]
    Device(#[from] DeviceError),

    #[cfg(feature = "parallel")]
    #[error("unable to build the compute thread pool")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error("unable to spawn the thread of rank {rank}")]
    Spawn {
        rank: usize,
        #[source]
        source: io::Error,
    },

    #[error("rank {0} panicked")]
    RankPanicked(usize),
}
