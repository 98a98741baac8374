use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use log::{debug, info, warn};
use mio::event::Source;
use mio::net::{TcpListener, TcpStream};
use mio::{Interest, Token};
use thiserror::Error;

use crate::peer::{ConnectionError, PeerConnection, PeerId, PeerSession};
use crate::reactor::{Flow, Reactor, Socket};
use crate::seeder::{bind_listener, PeerSet, Seeder};
use crate::tracker::announce::Origin;
use crate::tracker::events::EventReceiver;
use crate::tracker::http::{HttpConnection, HttpError};
use crate::tracker::{Tracker, TrackerSettings};

mod limiter;

pub use limiter::UploadLimiter;

type Result<T> = std::result::Result<T, ServerError>;

const POLL_TIMEOUT: Duration = Duration::from_millis(250);

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("Peer connection error: {0}")]
    Peer(#[from] ConnectionError),
    #[error("HTTP error: {0}")]
    Http(#[from] HttpError),
    #[error("No free seeder port in {0}-{1}")]
    NoSeederPort(u16, u16),
}

/// Runtime settings, built once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Bytes per second handed to peers.
    pub upload_rate: u64,
    pub data_dir: PathBuf,
    pub metadata_dir: PathBuf,
    /// Announce URL written into generated torrents. Derived from the host
    /// name and tracker port when unset.
    pub announce_url: Option<String>,
    pub tracker_port: u16,
    pub directory_cooldown: Duration,
    pub directory_update_interval: Duration,
    pub metadata_suffix: String,
    pub seeder_port_min: u16,
    pub seeder_port_max: u16,
    pub rerequest_interval: Duration,
    pub purge_interval: Duration,
    pub max_peers_per_torrent: usize,
    pub public_ip: Option<Ipv4Addr>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            upload_rate: 256 * 1024,
            data_dir: PathBuf::from("data"),
            metadata_dir: PathBuf::from("metadata"),
            announce_url: None,
            tracker_port: 7000,
            directory_cooldown: Duration::from_secs(60),
            directory_update_interval: Duration::from_secs(300),
            metadata_suffix: ".torrent".to_string(),
            seeder_port_min: 6881,
            seeder_port_max: 6999,
            rerequest_interval: Duration::from_secs(90),
            purge_interval: Duration::from_secs(120),
            max_peers_per_torrent: 1000,
            public_ip: None,
        }
    }
}

impl Config {
    pub fn announce_url(&self) -> String {
        self.announce_url.clone().unwrap_or_else(|| {
            crate::util::announce_url(&crate::util::host_name(), self.tracker_port)
        })
    }

    pub fn tracker_settings(&self) -> TrackerSettings {
        TrackerSettings {
            update_interval: self.rerequest_interval,
            purge_interval: self.purge_interval,
            max_peers_per_torrent: self.max_peers_per_torrent,
        }
    }
}

/// State every socket callback can reach.
pub struct Shared {
    pub seeder: Seeder,
    pub tracker: Tracker,
}

/// Everything registered with the server's reactor.
pub enum Endpoint {
    SeederListener(TcpListener),
    TrackerListener(TcpListener),
    Peer(PeerConnection<TcpStream>),
    Http(HttpConnection<TcpStream>),
}

fn ipv4(ip: IpAddr) -> Ipv4Addr {
    match ip {
        IpAddr::V4(ip) => ip,
        IpAddr::V6(ip) => ip.to_ipv4_mapped().unwrap_or(Ipv4Addr::UNSPECIFIED),
    }
}

fn accept_all(
    listener: &TcpListener,
    spawn: &mut Vec<Endpoint>,
    wrap: fn(TcpStream) -> Endpoint,
) -> Result<Flow> {
    loop {
        match listener.accept() {
            Ok((stream, addr)) => {
                debug!("Accepted {addr}");
                spawn.push(wrap(stream));
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(Flow::Continue),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            // The pending connection is gone; the listener itself is fine.
            Err(e) if e.kind() == io::ErrorKind::ConnectionAborted => {}
            Err(e) => {
                warn!("Accept failed: {e}");
                return Ok(Flow::Continue);
            }
        }
    }
}

impl Socket for Endpoint {
    type Context = Shared;
    type Error = ServerError;

    fn source(&mut self) -> &mut dyn Source {
        match self {
            Endpoint::SeederListener(listener) | Endpoint::TrackerListener(listener) => listener,
            Endpoint::Peer(connection) => connection.stream_mut(),
            Endpoint::Http(connection) => connection.stream_mut(),
        }
    }

    fn interest(&self) -> Interest {
        match self {
            Endpoint::Peer(connection) if connection.wants_write() => {
                Interest::READABLE | Interest::WRITABLE
            }
            Endpoint::Http(connection) if connection.is_writing() => Interest::WRITABLE,
            _ => Interest::READABLE,
        }
    }

    fn on_readable(
        &mut self,
        _token: Token,
        cx: &mut Shared,
        spawn: &mut Vec<Self>,
    ) -> Result<Flow> {
        match self {
            Endpoint::SeederListener(listener) => {
                accept_all(listener, spawn, |stream| Endpoint::Peer(PeerConnection::new(stream)))
            }
            Endpoint::TrackerListener(listener) => {
                accept_all(listener, spawn, |stream| Endpoint::Http(HttpConnection::new(stream)))
            }
            Endpoint::Peer(connection) => {
                connection.on_readable(&cx.seeder)?;
                Ok(Flow::Continue)
            }
            Endpoint::Http(connection) => {
                let stream = connection.stream();
                let origin = Origin {
                    remote: ipv4(stream.peer_addr()?.ip()),
                    local: ipv4(stream.local_addr()?.ip()),
                };
                let Shared { seeder, tracker } = cx;
                let flow = connection
                    .on_readable(|request| tracker.handle_request(request, seeder, origin))?;
                Ok(flow)
            }
        }
    }

    fn on_writable(&mut self, _token: Token, _cx: &mut Shared) -> Result<Flow> {
        match self {
            Endpoint::Peer(connection) => {
                connection.on_writable()?;
                Ok(Flow::Continue)
            }
            Endpoint::Http(connection) => Ok(connection.on_writable()?),
            _ => Ok(Flow::Continue),
        }
    }

    fn on_register(&mut self, token: Token, cx: &mut Shared) {
        if let Endpoint::Peer(_) = self {
            cx.seeder.add_peer(token);
        }
    }

    fn on_close(&mut self, token: Token, cx: &mut Shared) {
        if let Endpoint::Peer(_) = self {
            debug!("Peer {token:?} disconnected");
            cx.seeder.remove_peer(token);
        }
    }
}

impl PeerSet for Reactor<Endpoint> {
    fn session_mut(&mut self, token: Token) -> Option<&mut PeerSession> {
        match self.get_mut(token) {
            Some(Endpoint::Peer(connection)) => Some(connection.session_mut()),
            _ => None,
        }
    }
}

fn unix_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// The seeder and tracker sharing one reactor thread.
pub struct Server {
    reactor: Reactor<Endpoint>,
    shared: Shared,
    events: EventReceiver,
    limiter: UploadLimiter,
    seeder_port: u16,
    tracker_port: u16,
}

impl Server {
    pub fn bind(config: &Config, events: EventReceiver) -> Result<Self> {
        let seeder_listener = bind_listener(config.seeder_port_min, config.seeder_port_max)
            .map_err(|e| {
                warn!("Binding seeder failed: {e}");
                ServerError::NoSeederPort(config.seeder_port_min, config.seeder_port_max)
            })?;
        let seeder_port = seeder_listener.local_addr()?.port();
        let tracker_listener = TcpListener::bind(SocketAddr::from((
            Ipv4Addr::UNSPECIFIED,
            config.tracker_port,
        )))?;
        let tracker_port = tracker_listener.local_addr()?.port();

        let peer_id = PeerId::random();
        let seeder = Seeder::new(peer_id, seeder_port);
        let tracker = Tracker::new(
            peer_id,
            config.public_ip.unwrap_or(Ipv4Addr::UNSPECIFIED),
            seeder_port,
            config.tracker_settings(),
        );
        let mut shared = Shared { seeder, tracker };

        let mut reactor = Reactor::new()?;
        reactor.register(Endpoint::SeederListener(seeder_listener), &mut shared)?;
        reactor.register(Endpoint::TrackerListener(tracker_listener), &mut shared)?;
        info!("Seeder listening on port {seeder_port}, tracker on port {tracker_port}");

        Ok(Server {
            reactor,
            shared,
            events,
            limiter: UploadLimiter::new(config.upload_rate, unix_seconds()),
            seeder_port,
            tracker_port,
        })
    }

    pub fn seeder_port(&self) -> u16 {
        self.seeder_port
    }

    pub fn tracker_port(&self) -> u16 {
        self.tracker_port
    }

    pub fn seeder(&self) -> &Seeder {
        &self.shared.seeder
    }

    /// One reactor pass followed by queued events and upload scheduling.
    pub fn run_once(&mut self) -> Result<()> {
        self.reactor.poll(&mut self.shared, Some(POLL_TIMEOUT))?;
        let Shared { seeder, tracker } = &mut self.shared;
        tracker.process_queued_events(&self.events, seeder);
        let reactor = &mut self.reactor;
        self.limiter
            .tick(unix_seconds(), |budget| seeder.queue_upload_data(&mut *reactor, budget));
        Ok(())
    }

    pub fn run(&mut self) -> Result<()> {
        loop {
            self.run_once()?;
        }
    }
}
