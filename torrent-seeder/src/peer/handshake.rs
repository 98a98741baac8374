use crate::peer::handshake::HandshakeError::{ProtocolString, ProtocolStringLen};
use crate::peer::PeerId;
use crate::util::Sha1;
use thiserror::Error;

pub static BIT_TORRENT_PROTOCOL_STRING: &[u8; 19] = b"BitTorrent protocol";

/// Length of everything before the peer id.
pub const HEADER_LEN: usize = 48;
pub const HANDSHAKE_LEN: usize = 68;

#[derive(Error, Debug, PartialEq)]
pub enum HandshakeError {
    #[error("Invalid protocol string(pstr) length, expected 19, but got {0}")]
    ProtocolStringLen(u8),
    #[error("Unexpected protocol string, expected \"BitTorrent protocol\", but got {0}")]
    ProtocolString(String),
}

/// The part of a handshake a seeder needs before it answers: the remote's
/// peer id is read separately after our reply has been queued.
#[derive(Debug, PartialEq, Clone)]
pub struct HandshakeHeader {
    pub extension_bytes: [u8; 8],
    pub info_hash: Sha1,
}

impl HandshakeHeader {
    pub fn from_bytes(raw: &[u8; HEADER_LEN]) -> Result<Self, HandshakeError> {
        let pstr_len = raw[0];
        if pstr_len != 19 {
            return Err(ProtocolStringLen(pstr_len));
        }
        let pstr = &raw[1..20];
        if pstr != BIT_TORRENT_PROTOCOL_STRING {
            return Err(ProtocolString(String::from_utf8_lossy(pstr).to_string()));
        }
        let mut extension_bytes = [0; 8];
        extension_bytes.copy_from_slice(&raw[20..28]);
        let mut info_hash = [0; 20];
        info_hash.copy_from_slice(&raw[28..48]);
        Ok(Self {
            extension_bytes,
            info_hash,
        })
    }
}

#[derive(Debug, PartialEq, Clone)]
pub struct HandshakeMessage {
    extension_bytes: [u8; 8],
    info_hash: Sha1,
    peer_id: PeerId,
}

impl HandshakeMessage {
    pub fn new(extension_bytes: [u8; 8], info_hash: Sha1, peer_id: PeerId) -> Self {
        Self {
            extension_bytes,
            info_hash,
            peer_id,
        }
    }

    pub fn to_bytes(&self) -> [u8; HANDSHAKE_LEN] {
        let mut res = [0; HANDSHAKE_LEN];
        res[0] = 19u8;
        res[1..20].copy_from_slice(BIT_TORRENT_PROTOCOL_STRING.as_slice());
        res[20..28].copy_from_slice(self.extension_bytes.as_slice());
        res[28..48].copy_from_slice(self.info_hash.as_slice());
        res[48..68].copy_from_slice(self.peer_id.as_slice());
        res
    }
}
