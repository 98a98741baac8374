use std::sync::{mpsc, Arc};

use log::warn;

use crate::file::MetaInfo;
use crate::util::Sha1;

#[derive(Debug, Clone)]
pub enum TorrentEvent {
    Added(Arc<MetaInfo>),
    Removed(Sha1),
}

/// Handle given to threads that discover or retire torrents. Events are
/// applied by the reactor thread on its next pass.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::Sender<TorrentEvent>,
}

pub struct EventReceiver {
    rx: mpsc::Receiver<TorrentEvent>,
}

pub fn channel() -> (EventSender, EventReceiver) {
    let (tx, rx) = mpsc::channel();
    (EventSender { tx }, EventReceiver { rx })
}

impl EventSender {
    pub fn add_torrent(&self, info: Arc<MetaInfo>) {
        self.send(TorrentEvent::Added(info));
    }

    pub fn remove_torrent(&self, info_hash: Sha1) {
        self.send(TorrentEvent::Removed(info_hash));
    }

    fn send(&self, event: TorrentEvent) {
        if let Err(e) = self.tx.send(event) {
            warn!("Torrent event dropped, server is gone: {:?}", e.0);
        }
    }
}

impl EventReceiver {
    /// Everything queued so far, without blocking.
    pub fn drain(&self) -> impl Iterator<Item = TorrentEvent> + '_ {
        self.rx.try_iter()
    }
}
