use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use log::{debug, warn};
use sha1::Digest;
use url::Url;

use bencode::BencodeDict;

use crate::file::{
    check_path_component, check_piece_length, compute_info_hash, FileEntry, Layout, MetaInfo,
    Result, TorrentError,
};
use crate::util::Sha1;

pub const DEFAULT_PIECE_LENGTH: i64 = 1 << 18;

/// Hashes pieces over a stream of files laid end to end.
struct PieceHasher {
    piece_length: usize,
    hasher: sha1::Sha1,
    filled: usize,
    hashes: Vec<Sha1>,
}

impl PieceHasher {
    fn new(piece_length: usize) -> Self {
        PieceHasher {
            piece_length,
            hasher: sha1::Sha1::new(),
            filled: 0,
            hashes: Vec::new(),
        }
    }

    fn update(&mut self, mut data: &[u8]) {
        while !data.is_empty() {
            let take = data.len().min(self.piece_length - self.filled);
            self.hasher.update(&data[..take]);
            self.filled += take;
            data = &data[take..];
            if self.filled == self.piece_length {
                self.hashes.push(self.hasher.finalize_reset().into());
                self.filled = 0;
            }
        }
    }

    fn hash_file(&mut self, path: &Path) -> io::Result<i64> {
        let mut file = File::open(path)?;
        let mut buffer = vec![0; 64 * 1024];
        let mut total = 0i64;
        loop {
            match file.read(&mut buffer) {
                Ok(0) => return Ok(total),
                Ok(n) => {
                    self.update(&buffer[..n]);
                    total += n as i64;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
    }

    fn finish(mut self) -> Vec<Sha1> {
        if self.filled > 0 {
            self.hashes.push(self.hasher.finalize_reset().into());
        }
        self.hashes
    }
}

/// Regular files below `dir`, depth first with entries in name order.
fn collect_files(dir: &Path, prefix: &mut Vec<String>, out: &mut Vec<Vec<String>>) -> Result<()> {
    let mut entries = fs::read_dir(dir)?.collect::<io::Result<Vec<_>>>()?;
    entries.sort_by_key(|entry| entry.file_name());
    for entry in entries {
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            warn!("Skipping non UTF-8 name {:?}", entry.path());
            continue;
        };
        let file_type = entry.file_type()?;
        if file_type.is_symlink() {
            // Follow links to files, never to directories.
            match fs::metadata(entry.path()) {
                Ok(meta) if meta.is_file() => {}
                _ => {
                    debug!("Skipping link {:?}", entry.path());
                    continue;
                }
            }
        } else if file_type.is_dir() {
            prefix.push(name);
            collect_files(&entry.path(), prefix, out)?;
            prefix.pop();
            continue;
        } else if !file_type.is_file() {
            continue;
        }
        let mut components = prefix.clone();
        components.push(name);
        out.push(components);
    }
    Ok(())
}

impl MetaInfo {
    /// Builds a torrent for the file or directory at `path`, reading every
    /// byte once to hash the pieces. The data root is the parent of `path`.
    pub fn generate(path: impl AsRef<Path>, announce: &str, piece_length: i64) -> Result<Self> {
        let path = path.as_ref();
        check_piece_length(piece_length)?;
        let announce = Url::parse(announce)?;
        let name = path
            .file_name()
            .and_then(|name| name.to_str())
            .map(str::to_string)
            .ok_or_else(|| TorrentError::NotShareable(path.to_path_buf()))?;
        check_path_component(&name)?;
        let data_root = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let mut hasher = PieceHasher::new(piece_length as usize);
        let metadata = fs::metadata(path)?;
        let layout = if metadata.is_file() {
            let length = hasher.hash_file(path)?;
            Layout::Single { length }
        } else if metadata.is_dir() {
            let mut paths = Vec::new();
            collect_files(path, &mut Vec::new(), &mut paths)?;
            if paths.is_empty() {
                return Err(TorrentError::NotShareable(path.to_path_buf()));
            }
            let mut files = Vec::with_capacity(paths.len());
            for components in paths {
                let file_path = components.iter().fold(path.to_path_buf(), |p, c| p.join(c));
                let length = hasher.hash_file(&file_path)?;
                files.push(FileEntry { components, length });
            }
            Layout::Multi { files }
        } else {
            return Err(TorrentError::NotShareable(path.to_path_buf()));
        };

        let total_length = match &layout {
            Layout::Single { length } => *length,
            Layout::Multi { files } => files.iter().map(|file| file.length).sum(),
        };
        let piece_hashes = hasher.finish();

        let mut info = MetaInfo {
            announce,
            name,
            piece_length,
            piece_hashes,
            total_length,
            layout,
            info_hash: [0; 20],
            info_extra: BencodeDict::new(),
            data_root,
        };
        info.info_hash = compute_info_hash(&info.info_value());
        debug!(
            "Generated {} with {} pieces, infohash {}",
            info.name,
            info.piece_count(),
            hex::encode(info.info_hash)
        );
        Ok(info)
    }
}
