use std::fs;

pub type Sha1 = [u8; 20];

/// Piece availability as sent in a `bitfield` message: bit 7 of byte 0 is
/// piece 0, spare bits in the last byte stay zero.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct BitField {
    bytes: Vec<u8>,
}

impl BitField {
    /// A bitfield with all `len` pieces present.
    pub fn full(len: usize) -> Self {
        let mut bytes = vec![0xff; len / 8];
        if len % 8 != 0 {
            bytes.push(!(0xffu8 >> (len % 8)));
        }
        BitField { bytes }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// Best-effort host name lookup used to build the default announce URL.
pub fn host_name() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .or_else(|| fs::read_to_string("/etc/hostname").ok())
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}

/// `http://<host>[:port]/announce`, the port omitted when it is 80.
pub fn announce_url(host: &str, port: u16) -> String {
    if port == 80 {
        format!("http://{host}/announce")
    } else {
        format!("http://{host}:{port}/announce")
    }
}
