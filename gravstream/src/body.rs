use bytemuck::{Pod, Zeroable};

/// Three-dimensional vector used for positions, velocities and accelerations.
///
/// Provides component-wise arithmetic, scalar multiplication and division, equality,
/// [`length`](glam::DVec3::length) and [`normalize`](glam::DVec3::normalize).
pub type Vec3 = glam::DVec3;

/// A simulated point mass.
///
/// The layout of this type is what crosses the wire: three `f64` for the position, three `f64`
/// for the velocity and one `f64` for the mass, contiguous and without padding, in the native
/// byte order of the host.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Body {
    /// Position of the body.
    pub position: Vec3,
    /// Velocity of the body.
    pub velocity: Vec3,
    /// Mass of the body. Expected to be strictly positive.
    pub mass: f64,
}

impl Body {
    /// Size in bytes of one [`Body`] record.
    pub const SIZE: usize = std::mem::size_of::<Self>();

    /// Creates a new [`Body`] at rest at the given position.
    #[inline]
    pub const fn new(position: Vec3, mass: f64) -> Self {
        Self {
            position,
            velocity: Vec3::ZERO,
            mass,
        }
    }

    /// Returns this [`Body`] with the given velocity.
    #[inline]
    pub fn with_velocity(mut self, velocity: Vec3) -> Self {
        self.velocity = velocity;
        self
    }

    /// Returns the momentum of the body.
    #[inline]
    pub fn momentum(&self) -> Vec3 {
        self.velocity * self.mass
    }
}

/// Returns the centre of mass of the given bodies, or [`Vec3::ZERO`] if they have no mass.
pub fn centre_of_mass(bodies: &[Body]) -> Vec3 {
    let (weighted, mass) = bodies
        .iter()
        .fold((Vec3::ZERO, 0.0), |(weighted, mass), body| {
            (weighted + body.position * body.mass, mass + body.mass)
        });

    if mass == 0.0 {
        Vec3::ZERO
    } else {
        weighted / mass
    }
}
