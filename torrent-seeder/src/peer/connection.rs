use crate::peer::handshake::HandshakeError;
use crate::peer::session::PeerSession;
use crate::seeder::Seeder;
use crate::util::Sha1;
use std::io;
use std::io::{Read, Write};
use thiserror::Error;

type Result<T> = std::result::Result<T, ConnectionError>;

#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("BitTorrent handshake failed: {0}")]
    InvalidProtocol(#[from] HandshakeError),
    #[error("Unknown info hash {}", hex::encode(.0))]
    UnknownInfoHash(Sha1),
    #[error("Message of length {0} too large")]
    MessageTooLarge(u32),
    #[error("Connection closed by peer")]
    Closed,
    #[error(transparent)]
    IoKind(#[from] io::Error),
}

/// A peer session bound to a non-blocking stream. Both handlers keep going
/// until the stream would block.
pub struct PeerConnection<S> {
    stream: S,
    session: PeerSession,
}

impl<S: Read + Write> PeerConnection<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            session: PeerSession::new(),
        }
    }

    pub fn stream(&self) -> &S {
        &self.stream
    }

    pub fn stream_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    pub fn session(&self) -> &PeerSession {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut PeerSession {
        &mut self.session
    }

    pub fn wants_write(&self) -> bool {
        self.session.has_output()
    }

    pub fn on_readable(&mut self, seeder: &Seeder) -> Result<()> {
        let mut buf = [0; 16 * 1024];
        loop {
            match self.stream.read(&mut buf) {
                Ok(0) => return Err(ConnectionError::Closed),
                Ok(n) => self.session.receive(&buf[..n], seeder)?,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
    }

    pub fn on_writable(&mut self) -> Result<()> {
        while let Some(front) = self.session.front_output() {
            match self.stream.write(front) {
                Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero).into()),
                Ok(n) => self.session.consume_output(n),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}
