//! Startup parameters of a simulation run.
//!
//! A [`Config`] can be deserialised from YAML, every missing field taking its default value:
//!
//! ```yaml
//! bodies: 512
//! gravitation: 6.67408e-11
//! timestep: 1.0
//! damping: 1.0
//! update_rate: 30.0
//! port: 4040
//! ranks: 4
//! threads: 0
//! iterations: 0
//! mode: change-gated
//! backend: parallel
//! ```

use std::{fmt, path::Path, path::PathBuf, str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{error::ConfigError, server::ServeMode};

/// Default port the distribution server listens on.
pub const DEFAULT_PORT: u16 = 4040;

/// Physical and numerical parameters of the integrator.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Parameters {
    /// Gravitational constant.
    pub gravitation: f64,
    /// Time step of one iteration.
    pub timestep: f64,
    /// Positive constant added to the squared distance between two bodies to avoid singularities.
    ///
    /// This is an opaque tunable and not a softening length.
    pub softening: f64,
}

impl Default for Parameters {
    #[inline]
    fn default() -> Self {
        Self {
            gravitation: 6.67408e-11,
            timestep: 1.0,
            softening: 1.0,
        }
    }
}

/// How the distribution server serves the snapshots.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Mode {
    /// Every request is answered with the latest snapshot.
    #[default]
    Pull,
    /// Requests are answered with an empty frame if nothing was published since the last one.
    ChangeGated,
    /// Snapshots are sent to every connected viewer on a fixed timer.
    Push,
}

/// Execution backend of the integrator.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Backend {
    /// Plain loop over the owned bodies.
    #[default]
    Sequential,
    /// Data-parallel loop over the owned bodies.
    Parallel,
    /// Kernel offloaded to a compute device.
    Gpu,
}

macro_rules! impl_kebab_enum {
    ($t: ty, $($variant: ident => $name: literal),+ $(,)?) => {
        impl FromStr for $t {
            type Err = ConfigError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($name => Ok(Self::$variant),)+
                    _ => Err(ConfigError::Invalid(format!(
                        "unknown {} `{s}`, expected one of: {}",
                        stringify!($t).to_lowercase(),
                        [$($name),+].join(", ")
                    ))),
                }
            }
        }

        impl fmt::Display for $t {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(match self {
                    $(Self::$variant => $name,)+
                })
            }
        }
    };
}

impl_kebab_enum!(Mode, Pull => "pull", ChangeGated => "change-gated", Push => "push");
impl_kebab_enum!(Backend, Sequential => "sequential", Parallel => "parallel", Gpu => "gpu");

/// Startup parameters of the compute engine and its distribution server.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Number of bodies to simulate.
    pub bodies: usize,
    /// Gravitational constant.
    pub gravitation: f64,
    /// Time step of one iteration.
    pub timestep: f64,
    /// Softening constant of the force kernel.
    pub damping: f64,
    /// How many times per second connected viewers are updated in push mode.
    pub update_rate: f64,
    /// Port to listen for viewers on.
    pub port: u16,
    /// Number of workers the bodies are partitioned between.
    pub ranks: usize,
    /// Number of threads of the data-parallel backend, 0 lets the backend decide.
    pub threads: usize,
    /// Number of iterations to run, 0 runs forever.
    pub iterations: u64,
    /// Publish a snapshot every this many iterations.
    pub publish_every: u64,
    /// Distribution mode.
    pub mode: Mode,
    /// Execution backend.
    pub backend: Backend,
    /// Largest body count accepted from or sent to a peer.
    pub max_bodies: u32,
    /// Seed of the initial body distribution.
    pub seed: u64,
    /// Kernel source to use instead of the built-in one for the `gpu` backend.
    pub kernel: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        let parameters = Parameters::default();

        Self {
            bodies: 2,
            gravitation: parameters.gravitation,
            timestep: parameters.timestep,
            damping: parameters.softening,
            update_rate: 60.0,
            port: DEFAULT_PORT,
            ranks: 1,
            threads: 0,
            iterations: 0,
            publish_every: 1,
            mode: Mode::default(),
            backend: Backend::default(),
            max_bodies: 1 << 20,
            seed: 0,
            kernel: None,
        }
    }
}

impl Config {
    /// Parses a [`Config`] from a YAML document.
    pub fn from_yaml(source: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(source)?)
    }

    /// Reads and parses a [`Config`] from a YAML file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        Self::from_yaml(&source)
    }

    /// Checks that the values can be used for a run.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |message: &str| Err(ConfigError::Invalid(message.to_owned()));

        if self.ranks == 0 {
            return invalid("no workers configured");
        }
        if !(self.timestep > 0.0) {
            return invalid("the timestep must be positive");
        }
        if !(self.damping > 0.0) {
            return invalid("the damping constant must be positive");
        }
        if self.mode == Mode::Push {
            if !(self.update_rate > 0.0) {
                return invalid("the update rate must be positive in push mode");
            }
            if Duration::try_from_secs_f64(1.0 / self.update_rate).is_err() {
                return invalid("the update rate is too low for push mode");
            }
        }
        if self.publish_every == 0 {
            return invalid("snapshots must be published at least every iteration");
        }
        if self.bodies > self.max_bodies as usize {
            return Err(ConfigError::Invalid(format!(
                "{} bodies exceed the limit of {}",
                self.bodies, self.max_bodies
            )));
        }

        Ok(())
    }

    /// Returns the integrator [`Parameters`].
    #[inline]
    pub fn parameters(&self) -> Parameters {
        Parameters {
            gravitation: self.gravitation,
            timestep: self.timestep,
            softening: self.damping,
        }
    }

    /// Returns the [`ServeMode`] of the distribution server.
    #[inline]
    pub fn serve_mode(&self) -> ServeMode {
        match self.mode {
            Mode::Pull => ServeMode::Pull,
            Mode::ChangeGated => ServeMode::ChangeGated,
            Mode::Push => ServeMode::Push {
                interval: Duration::from_secs_f64(1.0 / self.update_rate),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_use_defaults() {
        let config = Config::from_yaml("bodies: 64\nmode: change-gated\nbackend: parallel\n").unwrap();

        assert_eq!(config.bodies, 64);
        assert_eq!(config.mode, Mode::ChangeGated);
        assert_eq!(config.backend, Backend::Parallel);
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.gravitation, 6.67408e-11);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn unknown_fields_are_rejected() {
        assert!(matches!(
            Config::from_yaml("bodeis: 3\n"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn invalid_values_are_rejected() {
        let configs = [
            Config { ranks: 0, ..Default::default() },
            Config { timestep: 0.0, ..Default::default() },
            Config { damping: -1.0, ..Default::default() },
            Config { damping: f64::NAN, ..Default::default() },
            Config { publish_every: 0, ..Default::default() },
            Config { mode: Mode::Push, update_rate: 0.0, ..Default::default() },
            Config { mode: Mode::Push, update_rate: 1e-300, ..Default::default() },
            Config { bodies: 11, max_bodies: 10, ..Default::default() },
        ];

        for config in configs {
            assert!(config.validate().is_err(), "{config:?} should be invalid");
        }
    }

    #[test]
    fn enums_parse_from_str() {
        assert_eq!("push".parse::<Mode>().unwrap(), Mode::Push);
        assert_eq!("gpu".parse::<Backend>().unwrap(), Backend::Gpu);
        assert_eq!(Mode::ChangeGated.to_string(), "change-gated");
        assert!("fast".parse::<Backend>().is_err());
    }

    #[test]
    fn push_interval_follows_update_rate() {
        let config = Config {
            mode: Mode::Push,
            update_rate: 50.0,
            ..Default::default()
        };

        assert_eq!(
            config.serve_mode(),
            ServeMode::Push {
                interval: Duration::from_millis(20)
            }
        );
    }
}
