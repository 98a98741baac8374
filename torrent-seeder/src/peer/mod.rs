use rand::RngCore;
use std::borrow::Borrow;
use std::fmt;
use std::ops::Deref;

pub mod connection;
pub mod handshake;
pub mod message;
pub mod session;

pub use connection::{ConnectionError, PeerConnection};
pub use session::PeerSession;

/// Client prefix of locally generated peer ids, Azureus style.
const PEER_ID_PREFIX: &[u8; 8] = b"-TS0100-";

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerId([u8; 20]);

impl PeerId {
    pub fn new(peer_id: [u8; 20]) -> Self {
        Self(peer_id)
    }

    pub fn random() -> Self {
        let mut peer_id = [0; 20];
        peer_id[..8].copy_from_slice(PEER_ID_PREFIX);
        rand::thread_rng().fill_bytes(&mut peer_id[8..]);
        Self::new(peer_id)
    }

    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        bytes.try_into().ok().map(Self)
    }
}

impl Borrow<[u8]> for PeerId {
    fn borrow(&self) -> &[u8] {
        self.0.as_slice()
    }
}

impl AsRef<[u8]> for PeerId {
    fn as_ref(&self) -> &[u8] {
        self.0.as_slice()
    }
}

impl Deref for PeerId {
    type Target = [u8; 20];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Default for PeerId {
    fn default() -> Self {
        Self::new([0; 20])
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({})", String::from_utf8_lossy(&self.0).escape_debug())
    }
}

/// A block asked for by a remote peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Request {
    pub piece: u32,
    pub begin: u32,
    pub length: u32,
}

impl Request {
    pub fn new(piece: u32, begin: u32, length: u32) -> Self {
        Self {
            piece,
            begin,
            length,
        }
    }
}
