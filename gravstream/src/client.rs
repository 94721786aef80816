use std::{
    io::{self, BufReader, Write},
    net::{Shutdown, TcpStream, ToSocketAddrs},
};

use crate::{
    body::Body,
    error::ProtocolError,
    protocol::{self, Code},
};

/// Connection of a viewer to a [`Server`](crate::server::Server).
///
/// A client of a server in pull or change-gated mode calls
/// [`request_bodies`](Client::request_bodies), while a client of a server in push mode waits for
/// frames with [`next_frame`](Client::next_frame).
#[derive(Debug)]
pub struct Client {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
    limit: u32,
}

impl Client {
    /// Connects to a server, refusing body arrays of more than `limit` bodies.
    pub fn connect(addr: impl ToSocketAddrs, limit: u32) -> io::Result<Self> {
        let writer = TcpStream::connect(addr)?;
        writer.set_nodelay(true)?;

        Ok(Self {
            reader: BufReader::new(writer.try_clone()?),
            writer,
            limit,
        })
    }

    /// Requests the current bodies from a polled server.
    ///
    /// An empty array means the server has nothing new to send.
    pub fn request_bodies(&mut self) -> Result<Vec<Body>, ProtocolError> {
        protocol::write_code(&mut self.writer, Code::RequestBodyData)?;
        protocol::read_bodies(&mut self.reader, self.limit)
    }

    /// Waits for the next frame of a pushing server.
    pub fn next_frame(&mut self) -> Result<Vec<Body>, ProtocolError> {
        protocol::read_frame(&mut self.reader, self.limit)
    }

    /// Tells the server the viewer is leaving and closes the connection.
    pub fn disconnect(mut self) -> Result<(), ProtocolError> {
        protocol::write_code(&mut self.writer, Code::SignalClientDisconnect)?;
        self.writer.flush()?;
        self.writer.shutdown(Shutdown::Write)?;

        Ok(())
    }
}
