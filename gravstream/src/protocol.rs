//! Binary protocol between the distribution server and the viewers.
//!
//! Every value is sent in the native byte order of the machine, without any normalisation:
//!
//! - a [`Code`] is a `u32`,
//! - a body array is a `u32` count followed by `count` [`Body`] records of [`Body::SIZE`] bytes,
//!   laid out as in memory.
//!
//! A viewer polling the server sends [`Code::RequestBodyData`] and receives a body array. A
//! server pushing frames sends [`Code::SignalTransmitBodyData`] followed by a body array, and a
//! subscribed viewer leaves by sending [`Code::SignalClientDisconnect`].

use std::io::{Read, Write};

use crate::{body::Body, error::ProtocolError};

/// Control codes of the protocol.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Code {
    /// Viewer to server: send the current bodies.
    RequestBodyData = 1,
    /// Server to viewer: a body array follows.
    SignalTransmitBodyData = 2,
    /// Viewer to server: the viewer is leaving.
    SignalClientDisconnect = 3,
}

impl TryFrom<u32> for Code {
    type Error = u32;

    #[inline]
    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::RequestBodyData),
            2 => Ok(Self::SignalTransmitBodyData),
            3 => Ok(Self::SignalClientDisconnect),
            other => Err(other),
        }
    }
}

impl From<Code> for u32 {
    #[inline]
    fn from(code: Code) -> Self {
        code as u32
    }
}

#[inline]
fn read_u32(reader: &mut impl Read) -> Result<u32, ProtocolError> {
    let mut bytes = [0; 4];
    reader.read_exact(&mut bytes)?;
    Ok(u32::from_ne_bytes(bytes))
}

/// Writes a control code.
#[inline]
pub fn write_code(writer: &mut impl Write, code: Code) -> Result<(), ProtocolError> {
    writer.write_all(&u32::from(code).to_ne_bytes())?;
    Ok(())
}

/// Reads a raw control code. Use [`Code::try_from`] to interpret it.
#[inline]
pub fn read_code(reader: &mut impl Read) -> Result<u32, ProtocolError> {
    read_u32(reader)
}

/// Writes a body array.
pub fn write_bodies(writer: &mut impl Write, bodies: &[Body]) -> Result<(), ProtocolError> {
    let count =
        u32::try_from(bodies.len()).map_err(|_| ProtocolError::TooManyBodies(bodies.len()))?;

    writer.write_all(&count.to_ne_bytes())?;
    writer.write_all(bytemuck::cast_slice(bodies))?;

    Ok(())
}

/// Reads a body array, refusing arrays of more than `limit` bodies.
///
/// The count is checked before anything is allocated.
pub fn read_bodies(reader: &mut impl Read, limit: u32) -> Result<Vec<Body>, ProtocolError> {
    let count = read_u32(reader)?;
    if count > limit {
        return Err(ProtocolError::CountTooLarge { count, limit });
    }

    let mut bodies = vec![Body::default(); count as usize];
    reader.read_exact(bytemuck::cast_slice_mut(&mut bodies))?;

    Ok(bodies)
}

/// Writes a pushed frame: [`Code::SignalTransmitBodyData`] followed by a body array.
pub fn write_frame(writer: &mut impl Write, bodies: &[Body]) -> Result<(), ProtocolError> {
    write_code(writer, Code::SignalTransmitBodyData)?;
    write_bodies(writer, bodies)?;
    writer.flush()?;

    Ok(())
}

/// Reads a pushed frame written by [`write_frame`].
pub fn read_frame(reader: &mut impl Read, limit: u32) -> Result<Vec<Body>, ProtocolError> {
    let expected = Code::SignalTransmitBodyData as u32;
    let found = read_code(reader)?;
    if found != expected {
        return Err(ProtocolError::UnexpectedCode { expected, found });
    }

    read_bodies(reader, limit)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::body::Vec3;

    fn bodies() -> Vec<Body> {
        vec![
            Body::new(Vec3::new(1.5, -2.25, 1e-300), 3.0)
                .with_velocity(Vec3::new(f64::MAX, 0.0, -0.0)),
            Body::new(Vec3::new(f64::MIN_POSITIVE, 7.0, -8.5), 1e30),
            Body::new(Vec3::ZERO, 0.0).with_velocity(Vec3::new(0.1, 0.2, 0.3)),
        ]
    }

    #[test]
    fn codes() {
        for code in [
            Code::RequestBodyData,
            Code::SignalTransmitBodyData,
            Code::SignalClientDisconnect,
        ] {
            let mut buffer = Vec::new();
            write_code(&mut buffer, code).unwrap();

            assert_eq!(buffer, u32::from(code).to_ne_bytes());
            let raw = read_code(&mut Cursor::new(buffer)).unwrap();
            assert_eq!(Code::try_from(raw), Ok(code));
        }

        assert_eq!(Code::try_from(0), Err(0));
        assert_eq!(Code::try_from(42), Err(42));
    }

    #[test]
    fn body_array_layout() {
        let bodies = bodies();
        let mut buffer = Vec::new();
        write_bodies(&mut buffer, &bodies).unwrap();

        assert_eq!(buffer.len(), 4 + bodies.len() * Body::SIZE);
        assert_eq!(buffer[..4], 3u32.to_ne_bytes());
        assert_eq!(buffer[4..12], 1.5f64.to_ne_bytes());

        let decoded = read_bodies(&mut Cursor::new(&buffer), 3).unwrap();
        assert_eq!(bytemuck::cast_slice::<Body, u8>(&decoded), &buffer[4..]);
    }

    #[test]
    fn empty_array() {
        let mut buffer = Vec::new();
        write_bodies(&mut buffer, &[]).unwrap();

        assert_eq!(buffer, 0u32.to_ne_bytes());
        assert!(read_bodies(&mut Cursor::new(buffer), 0).unwrap().is_empty());
    }

    #[test]
    fn count_over_limit() {
        let mut buffer = Vec::new();
        write_bodies(&mut buffer, &bodies()).unwrap();

        assert!(matches!(
            read_bodies(&mut Cursor::new(&buffer), 2),
            Err(ProtocolError::CountTooLarge { count: 3, limit: 2 })
        ));

        // A huge claimed count is rejected before allocating.
        let claimed = u32::MAX.to_ne_bytes();
        assert!(matches!(
            read_bodies(&mut Cursor::new(claimed), 1 << 20),
            Err(ProtocolError::CountTooLarge { .. })
        ));
    }

    #[test]
    fn truncated_array() {
        let mut buffer = Vec::new();
        write_bodies(&mut buffer, &bodies()).unwrap();
        buffer.truncate(buffer.len() - 1);

        let err = read_bodies(&mut Cursor::new(buffer), 3).unwrap_err();
        assert!(err.is_disconnect());
    }

    #[test]
    fn frames() {
        let mut buffer = Vec::new();
        write_frame(&mut buffer, &bodies()).unwrap();
        write_code(&mut buffer, Code::SignalClientDisconnect).unwrap();

        let mut reader = Cursor::new(buffer);
        assert_eq!(read_frame(&mut reader, 3).unwrap(), bodies());
        assert!(matches!(
            read_frame(&mut reader, 3),
            Err(ProtocolError::UnexpectedCode {
                expected: 2,
                found: 3
            })
        ));
    }
}
