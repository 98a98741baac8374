use std::collections::{HashMap, VecDeque};
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use log::{debug, info};
use mio::net::TcpListener;
use mio::Token;

use crate::file::MetaInfo;
use crate::peer::{PeerId, PeerSession};
use crate::util::Sha1;

/// Lookup of live peer sessions by reactor token.
pub trait PeerSet {
    fn session_mut(&mut self, token: Token) -> Option<&mut PeerSession>;
}

/// Registry of served torrents and the live peer rotation used for upload
/// scheduling. Only the reactor thread touches it.
#[derive(Debug)]
pub struct Seeder {
    peer_id: PeerId,
    port: u16,
    metainfo: HashMap<Sha1, Arc<MetaInfo>>,
    peers: VecDeque<Token>,
}

impl Seeder {
    pub fn new(peer_id: PeerId, port: u16) -> Self {
        Seeder {
            peer_id,
            port,
            metainfo: HashMap::new(),
            peers: VecDeque::new(),
        }
    }

    pub fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn get_meta_info(&self, info_hash: &Sha1) -> Option<Arc<MetaInfo>> {
        self.metainfo.get(info_hash).cloned()
    }

    pub fn has_meta_info(&self, info_hash: &Sha1) -> bool {
        self.metainfo.contains_key(info_hash)
    }

    pub fn torrents(&self) -> impl Iterator<Item = &Arc<MetaInfo>> {
        self.metainfo.values()
    }

    /// Registers `info`, replacing a torrent with the same infohash.
    pub fn add_torrent(&mut self, info: Arc<MetaInfo>) {
        info!("Serving {} ({})", info.name(), hex::encode(info.info_hash()));
        self.metainfo.insert(*info.info_hash(), info);
    }

    /// Connections already serving the torrent keep their reference.
    pub fn remove_torrent(&mut self, info_hash: &Sha1) -> Option<Arc<MetaInfo>> {
        let removed = self.metainfo.remove(info_hash);
        if let Some(info) = &removed {
            info!("No longer serving {} ({})", info.name(), hex::encode(info_hash));
        }
        removed
    }

    pub fn add_peer(&mut self, token: Token) {
        self.peers.push_back(token);
    }

    pub fn remove_peer(&mut self, token: Token) {
        self.peers.retain(|peer| *peer != token);
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// Serves pending requests round-robin until `target` bytes are queued
    /// or every peer has been visited once. The last request served may
    /// overshoot `target`.
    pub fn queue_upload_data<P: PeerSet>(&mut self, peers: &mut P, target: u64) -> u64 {
        let mut queued = 0;
        let mut remaining = self.peers.len();
        while remaining > 0 && queued < target {
            remaining -= 1;
            let Some(token) = self.peers.pop_front() else {
                break;
            };
            let Some(session) = peers.session_mut(token) else {
                debug!("Dropping stale peer {token:?} from rotation");
                continue;
            };
            while session.has_requests() && queued < target {
                queued += u64::from(session.serve_request());
            }
            self.peers.push_back(token);
        }
        queued
    }
}

/// Binds the first free port in `min..=max` on all interfaces. A zero
/// `min` asks the OS for an ephemeral port.
pub fn bind_listener(min: u16, max: u16) -> io::Result<TcpListener> {
    if min == 0 {
        return TcpListener::bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)));
    }
    let mut last_error = io::Error::new(
        io::ErrorKind::InvalidInput,
        format!("empty port range {min}-{max}"),
    );
    for port in min..=max {
        match TcpListener::bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port))) {
            Ok(listener) => return Ok(listener),
            Err(e) => {
                debug!("Port {port} unavailable: {e}");
                last_error = e;
            }
        }
    }
    Err(last_error)
}
