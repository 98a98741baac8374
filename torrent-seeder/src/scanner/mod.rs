use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant, SystemTime};

use log::{debug, info, warn};

use crate::file::{MetaInfo, TorrentError, DEFAULT_PIECE_LENGTH};
use crate::server::Config;
use crate::tracker::EventSender;
use crate::util::Sha1;

/// Newest modification time of `path` and, for directories, of anything
/// below it.
fn newest_mtime(path: &Path) -> Option<SystemTime> {
    let metadata = fs::metadata(path).ok()?;
    let mut newest = metadata.modified().ok()?;
    if metadata.is_dir() {
        for entry in fs::read_dir(path).ok()?.flatten() {
            if let Some(mtime) = newest_mtime(&entry.path()) {
                newest = newest.max(mtime);
            }
        }
    }
    Some(newest)
}

/// Keeps the metadata directory in step with the data directory and tells
/// the server which torrents to serve.
pub struct TorrentDirectory {
    events: EventSender,
    data_dir: PathBuf,
    metadata_dir: PathBuf,
    announce_url: String,
    metadata_suffix: String,
    piece_length: i64,
    current: HashMap<String, Sha1>,
}

impl TorrentDirectory {
    pub fn new(
        events: EventSender,
        data_dir: impl Into<PathBuf>,
        metadata_dir: impl Into<PathBuf>,
        announce_url: impl Into<String>,
        metadata_suffix: impl Into<String>,
    ) -> Self {
        let data_dir = data_dir.into();
        let metadata_dir = metadata_dir.into();
        TorrentDirectory {
            events,
            data_dir: fs::canonicalize(&data_dir).unwrap_or(data_dir),
            metadata_dir: fs::canonicalize(&metadata_dir).unwrap_or(metadata_dir),
            announce_url: announce_url.into(),
            metadata_suffix: metadata_suffix.into(),
            piece_length: DEFAULT_PIECE_LENGTH,
            current: HashMap::new(),
        }
    }

    pub fn from_config(config: &Config, events: EventSender) -> Self {
        Self::new(
            events,
            &config.data_dir,
            &config.metadata_dir,
            config.announce_url(),
            config.metadata_suffix.as_str(),
        )
    }

    /// Names currently registered with the server.
    pub fn registered(&self) -> impl Iterator<Item = &str> {
        self.current.keys().map(String::as_str)
    }

    fn single_dir(&self) -> bool {
        self.data_dir == self.metadata_dir
    }

    fn metadata_path(&self, name: &str) -> PathBuf {
        self.metadata_dir.join(format!("{name}{}", self.metadata_suffix))
    }

    fn scan_data(&self) -> io::Result<BTreeMap<String, SystemTime>> {
        let mut data = BTreeMap::new();
        for entry in fs::read_dir(&self.data_dir)? {
            let entry = entry?;
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                warn!("Skipping non UTF-8 name {:?}", entry.path());
                continue;
            };
            if name.starts_with('.') {
                continue;
            }
            if self.single_dir() && name.ends_with(&self.metadata_suffix) {
                continue;
            }
            let path = entry.path();
            if !(path.is_file() || path.is_dir()) {
                continue;
            }
            if let Some(mtime) = newest_mtime(&path) {
                data.insert(name, mtime);
            }
        }
        Ok(data)
    }

    fn scan_metadata(&self) -> io::Result<BTreeMap<String, SystemTime>> {
        let mut metadata = BTreeMap::new();
        for entry in fs::read_dir(&self.metadata_dir)? {
            let entry = entry?;
            let Some(file_name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if file_name.starts_with('.') {
                continue;
            }
            let Some(name) = file_name.strip_suffix(self.metadata_suffix.as_str()) else {
                continue;
            };
            if name.is_empty() || !entry.path().is_file() {
                continue;
            }
            if let Some(mtime) = newest_mtime(&entry.path()) {
                metadata.insert(name.to_string(), mtime);
            }
        }
        Ok(metadata)
    }

    fn generate(&self, name: &str) -> Result<MetaInfo, TorrentError> {
        let path = self.metadata_path(name);
        info!("Generating {}", path.display());
        let data = self.data_dir.join(name);
        let info = MetaInfo::generate(data, &self.announce_url, self.piece_length)?;
        if let Err(e) = info.to_path(&path) {
            warn!("Writing {} failed: {e}", path.display());
        }
        Ok(info)
    }

    fn load(&self, name: &str) -> Result<MetaInfo, TorrentError> {
        let path = self.metadata_path(name);
        debug!("Loading {}", path.display());
        let info = MetaInfo::from_path(&path)?;
        if info.name() != name {
            return Err(TorrentError::NameMismatch {
                expected: name.to_string(),
                found: info.name().to_string(),
            });
        }
        Ok(info)
    }

    /// One scan. Data entries modified within `cooldown` are left alone until
    /// a later scan.
    pub fn update(&mut self, cooldown: Duration) -> io::Result<()> {
        let data = self.scan_data()?;
        let metadata = self.scan_metadata()?;
        let now = SystemTime::now();

        for (name, mtime) in &data {
            let cooling = mtime.checked_add(cooldown).map_or(true, |ready| ready >= now);
            if cooling || self.current.contains_key(name) {
                continue;
            }
            let stale = metadata.get(name).map_or(true, |meta| mtime > meta);
            let result = if stale {
                self.generate(name)
            } else {
                self.load(name).or_else(|e| {
                    warn!("Unusable metadata for {name}: {e}");
                    self.generate(name)
                })
            };
            match result {
                Ok(info) => {
                    let info = info.with_data_root(&self.data_dir);
                    self.current.insert(name.clone(), *info.info_hash());
                    self.events.add_torrent(Arc::new(info));
                }
                Err(e) => warn!("Unable to share {name}: {e}"),
            }
        }

        for name in metadata.keys() {
            if data.contains_key(name) {
                continue;
            }
            let path = self.metadata_path(name);
            info!("Removing obsolete {}", path.display());
            if let Err(e) = fs::remove_file(&path) {
                warn!("Removing {} failed: {e}", path.display());
            }
        }

        let gone: Vec<String> = self
            .current
            .keys()
            .filter(|name| !data.contains_key(*name))
            .cloned()
            .collect();
        for name in gone {
            if let Some(info_hash) = self.current.remove(&name) {
                self.events.remove_torrent(info_hash);
            }
        }
        Ok(())
    }

    /// Scans every `interval` forever.
    pub fn run(mut self, interval: Duration, cooldown: Duration) {
        loop {
            let started = Instant::now();
            if let Err(e) = self.update(cooldown) {
                warn!("Directory scan failed: {e}");
            }
            thread::sleep(interval.saturating_sub(started.elapsed()));
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::thread;
    use std::time::Duration;

    use crate::file::MetaInfo;
    use crate::scanner::TorrentDirectory;
    use crate::tracker::events::{channel, EventReceiver, TorrentEvent};

    struct Dirs {
        data: tempfile::TempDir,
        metadata: tempfile::TempDir,
    }

    fn dirs() -> Dirs {
        Dirs {
            data: tempfile::tempdir().unwrap(),
            metadata: tempfile::tempdir().unwrap(),
        }
    }

    fn names(rx: &EventReceiver) -> (Vec<String>, usize) {
        let mut added = Vec::new();
        let mut removed = 0;
        for event in rx.drain() {
            match event {
                TorrentEvent::Added(info) => added.push(info.name().to_string()),
                TorrentEvent::Removed(_) => removed += 1,
            }
        }
        added.sort();
        (added, removed)
    }

    fn settle() {
        thread::sleep(Duration::from_millis(20));
    }

    #[test]
    fn new_data_is_generated_and_registered() {
        let dirs = dirs();
        fs::write(dirs.data.path().join("a.bin"), vec![1u8; 1000]).unwrap();
        fs::create_dir(dirs.data.path().join("album")).unwrap();
        fs::write(dirs.data.path().join("album").join("track"), b"la la").unwrap();
        fs::write(dirs.data.path().join(".hidden"), b"x").unwrap();
        settle();

        let (tx, rx) = channel();
        let mut directory = TorrentDirectory::new(
            tx,
            dirs.data.path(),
            dirs.metadata.path(),
            "http://host:7000/announce",
            ".torrent",
        );
        directory.update(Duration::ZERO).unwrap();
        assert_eq!(names(&rx), (vec!["a.bin".to_string(), "album".to_string()], 0));
        assert!(dirs.metadata.path().join("a.bin.torrent").is_file());
        assert!(dirs.metadata.path().join("album.torrent").is_file());

        let written = MetaInfo::from_path(dirs.metadata.path().join("album.torrent")).unwrap();
        assert_eq!(written.announce().as_str(), "http://host:7000/announce");

        directory.update(Duration::ZERO).unwrap();
        assert_eq!(names(&rx), (vec![], 0));
    }

    #[test]
    fn registered_torrents_serve_from_data_dir() {
        let dirs = dirs();
        fs::write(dirs.data.path().join("a.bin"), vec![7u8; 300]).unwrap();
        settle();
        let (tx, rx) = channel();
        let mut directory = TorrentDirectory::new(
            tx,
            dirs.data.path(),
            dirs.metadata.path(),
            "http://host/announce",
            ".torrent",
        );
        directory.update(Duration::ZERO).unwrap();
        let Some(TorrentEvent::Added(info)) = rx.drain().next() else {
            panic!("nothing registered");
        };
        assert_eq!(info.fetch_piece(0).unwrap(), vec![7u8; 300]);
    }

    #[test]
    fn cooldown_defers_registration() {
        let dirs = dirs();
        fs::write(dirs.data.path().join("fresh"), b"data").unwrap();
        let (tx, rx) = channel();
        let mut directory = TorrentDirectory::new(
            tx,
            dirs.data.path(),
            dirs.metadata.path(),
            "http://host/announce",
            ".torrent",
        );
        directory.update(Duration::from_secs(3600)).unwrap();
        assert_eq!(names(&rx), (vec![], 0));
        assert!(!dirs.metadata.path().join("fresh.torrent").exists());
    }

    #[test]
    fn unbounded_cooldown_never_registers() {
        let dirs = dirs();
        fs::write(dirs.data.path().join("old"), b"data").unwrap();
        settle();
        let (tx, rx) = channel();
        let mut directory = TorrentDirectory::new(
            tx,
            dirs.data.path(),
            dirs.metadata.path(),
            "http://host/announce",
            ".torrent",
        );
        directory.update(Duration::MAX).unwrap();
        assert_eq!(names(&rx), (vec![], 0));
    }

    #[test]
    fn up_to_date_metadata_is_loaded() {
        let dirs = dirs();
        let data = dirs.data.path().join("movie");
        fs::write(&data, vec![3u8; 500]).unwrap();
        settle();
        let existing = MetaInfo::generate(&data, "http://elsewhere/announce", 1 << 18).unwrap();
        existing
            .to_path(dirs.metadata.path().join("movie.torrent"))
            .unwrap();
        settle();

        let (tx, rx) = channel();
        let mut directory = TorrentDirectory::new(
            tx,
            dirs.data.path(),
            dirs.metadata.path(),
            "http://host/announce",
            ".torrent",
        );
        directory.update(Duration::ZERO).unwrap();
        let Some(TorrentEvent::Added(info)) = rx.drain().next() else {
            panic!("nothing registered");
        };
        assert_eq!(info.announce().as_str(), "http://elsewhere/announce");
        assert_eq!(info.info_hash(), existing.info_hash());
    }

    #[test]
    fn removed_data_unregisters_and_deletes_metadata() {
        let dirs = dirs();
        fs::write(dirs.data.path().join("a"), b"aaaa").unwrap();
        fs::write(dirs.data.path().join("b"), b"bbbb").unwrap();
        fs::write(dirs.metadata.path().join("orphan.torrent"), b"junk").unwrap();
        settle();
        let (tx, rx) = channel();
        let mut directory = TorrentDirectory::new(
            tx,
            dirs.data.path(),
            dirs.metadata.path(),
            "http://host/announce",
            ".torrent",
        );
        directory.update(Duration::ZERO).unwrap();
        assert_eq!(names(&rx), (vec!["a".to_string(), "b".to_string()], 0));
        assert!(!dirs.metadata.path().join("orphan.torrent").exists());

        fs::remove_file(dirs.data.path().join("a")).unwrap();
        directory.update(Duration::ZERO).unwrap();
        assert_eq!(names(&rx), (vec![], 1));
        assert!(!dirs.metadata.path().join("a.torrent").exists());
        assert_eq!(directory.registered().collect::<Vec<_>>(), vec!["b"]);
    }

    #[test]
    fn shared_directory_skips_metadata_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("song"), b"tune").unwrap();
        settle();
        let (tx, rx) = channel();
        let mut directory = TorrentDirectory::new(
            tx,
            dir.path(),
            dir.path(),
            "http://host/announce",
            ".torrent",
        );
        directory.update(Duration::ZERO).unwrap();
        assert!(dir.path().join("song.torrent").is_file());
        settle();
        directory.update(Duration::ZERO).unwrap();
        assert_eq!(names(&rx), (vec!["song".to_string()], 0));
        assert!(dir.path().join("song.torrent").is_file());
    }
}
