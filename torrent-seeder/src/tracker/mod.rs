use std::collections::{HashMap, VecDeque};
use std::fmt::{Display, Formatter};
use std::net::Ipv4Addr;
use std::str::FromStr;
use std::time::{Duration, Instant};

use log::{debug, info};
use rand::seq::SliceRandom;

use crate::peer::PeerId;
use crate::seeder::Seeder;
use crate::tracker::events::{EventReceiver, TorrentEvent};
use crate::util::Sha1;

pub mod announce;
pub mod events;
pub mod http;

pub use events::{channel, EventSender};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerEvent {
    Started,
    Stopped,
    Completed,
}

impl Display for TrackerEvent {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let string = match self {
            TrackerEvent::Started => "started",
            TrackerEvent::Stopped => "stopped",
            TrackerEvent::Completed => "completed",
        };
        write!(f, "{string}")
    }
}

impl FromStr for TrackerEvent {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "started" => Ok(TrackerEvent::Started),
            "stopped" => Ok(TrackerEvent::Stopped),
            "completed" => Ok(TrackerEvent::Completed),
            _ => Err(()),
        }
    }
}

/// What the tracker remembers about one peer of one torrent.
#[derive(Debug, Clone, PartialEq)]
pub struct PeerInfo {
    pub info_hash: Sha1,
    pub peer_id: PeerId,
    pub ip: Ipv4Addr,
    pub port: u16,
    pub uploaded: i64,
    pub downloaded: i64,
    pub left: i64,
    pub last_seen: Instant,
}

/// Tunables of the announce protocol.
#[derive(Debug, Clone)]
pub struct TrackerSettings {
    /// Interval clients are told to wait between announces.
    pub update_interval: Duration,
    /// Entries not refreshed for this long are dropped.
    pub purge_interval: Duration,
    pub max_peers_per_torrent: usize,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        TrackerSettings {
            update_interval: Duration::from_secs(90),
            purge_interval: Duration::from_secs(120),
            max_peers_per_torrent: 1000,
        }
    }
}

/// Peer lists per torrent plus the always advertised local seeder.
#[derive(Debug)]
pub struct Tracker {
    torrent_peers: HashMap<Sha1, VecDeque<PeerInfo>>,
    local_peer: PeerInfo,
    settings: TrackerSettings,
}

impl Tracker {
    /// `ip` may be unspecified, in which case the address a request arrived
    /// on is advertised for the local peer.
    pub fn new(peer_id: PeerId, ip: Ipv4Addr, port: u16, settings: TrackerSettings) -> Self {
        Tracker {
            torrent_peers: HashMap::new(),
            local_peer: PeerInfo {
                info_hash: [0; 20],
                peer_id,
                ip,
                port,
                uploaded: 0,
                downloaded: 0,
                left: 0,
                last_seen: Instant::now(),
            },
            settings,
        }
    }

    pub fn settings(&self) -> &TrackerSettings {
        &self.settings
    }

    pub fn local_peer(&self) -> &PeerInfo {
        &self.local_peer
    }

    pub fn has_torrent(&self, info_hash: &Sha1) -> bool {
        self.torrent_peers.contains_key(info_hash)
    }

    pub fn torrents(&self) -> impl Iterator<Item = (&Sha1, &VecDeque<PeerInfo>)> {
        self.torrent_peers.iter()
    }

    pub fn store(&mut self, peer: PeerInfo, stopped: bool) {
        self.store_at(peer, stopped, Instant::now())
    }

    /// Replaces any entry with the same peer id. A stopped peer is only
    /// removed.
    pub fn store_at(&mut self, mut peer: PeerInfo, stopped: bool, now: Instant) {
        let peers = self.torrent_peers.entry(peer.info_hash).or_default();
        if let Some(i) = peers.iter().position(|p| p.peer_id == peer.peer_id) {
            peers.remove(i);
        }
        if stopped {
            return;
        }
        while !peers.is_empty() && peers.len() >= self.settings.max_peers_per_torrent {
            peers.pop_front();
        }
        peer.last_seen = now;
        peers.push_back(peer);
    }

    pub fn list(&mut self, omit: &PeerId, info_hash: &Sha1, count: usize) -> Vec<&PeerInfo> {
        self.list_at(omit, info_hash, count, Instant::now())
    }

    /// Purges stale entries from the front of the list, then returns a
    /// random selection of at most `count` peers including the local one.
    pub fn list_at(
        &mut self,
        omit: &PeerId,
        info_hash: &Sha1,
        count: usize,
        now: Instant,
    ) -> Vec<&PeerInfo> {
        let purge_interval = self.settings.purge_interval;
        let mut result: Vec<&PeerInfo> = Vec::new();
        if let Some(peers) = self.torrent_peers.get_mut(info_hash) {
            while let Some(front) = peers.front() {
                if now.saturating_duration_since(front.last_seen) < purge_interval {
                    break;
                }
                debug!("Purging peer {:?}", front.peer_id);
                peers.pop_front();
            }
        }
        if let Some(peers) = self.torrent_peers.get(info_hash) {
            result.extend(
                peers
                    .iter()
                    .filter(|p| &p.info_hash == info_hash && &p.peer_id != omit),
            );
        }
        result.push(&self.local_peer);
        result.shuffle(&mut rand::thread_rng());
        result.truncate(count);
        result
    }

    /// Applies torrent additions and removals queued by other threads.
    pub fn process_queued_events(&mut self, events: &EventReceiver, seeder: &mut Seeder) {
        for event in events.drain() {
            match event {
                TorrentEvent::Added(info) => {
                    self.torrent_peers.entry(*info.info_hash()).or_default();
                    seeder.add_torrent(info);
                }
                TorrentEvent::Removed(info_hash) => {
                    if let Some(peers) = self.torrent_peers.remove(&info_hash) {
                        info!(
                            "Dropped {} tracked peers of {}",
                            peers.len(),
                            hex::encode(info_hash)
                        );
                    }
                    seeder.remove_torrent(&info_hash);
                }
            }
        }
    }
}
