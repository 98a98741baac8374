use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use sha1::Digest;
use thiserror::Error;
use url::Url;

use bencode::from_bencode::FromBencode;
use bencode::{BencodeDict, BencodeError, BencodeList, BencodeString, Value};

use crate::file::TorrentError::{
    AmbiguousLayout, InvalidFileLength, InvalidFileList, InvalidPieceLength, InvalidPiecesLength,
    MissingField, UnsafePath,
};
use crate::util::Sha1;

mod generate;
mod storage;

pub use generate::DEFAULT_PIECE_LENGTH;

type Result<T> = std::result::Result<T, TorrentError>;

pub const MIN_PIECE_LENGTH: i64 = 2;
pub const MAX_PIECE_LENGTH: i64 = 1 << 30;

#[derive(Error, Debug)]
pub enum TorrentError {
    #[error("Bencode error: {0}")]
    Bencode(#[from] BencodeError),
    #[error("Url error: {0}")]
    Url(#[from] url::ParseError),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("Missing field: {0}")]
    MissingField(String),
    #[error("Piece length {0} out of range")]
    InvalidPieceLength(i64),
    #[error("Invalid pieces length")]
    InvalidPiecesLength,
    #[error("Invalid file length {0}")]
    InvalidFileLength(i64),
    #[error("Invalid file list")]
    InvalidFileList,
    #[error("Exactly one of 'length' and 'files' must be present")]
    AmbiguousLayout,
    #[error("Unsafe path component {0:?}")]
    UnsafePath(String),
    #[error("Nothing to share at {0}")]
    NotShareable(PathBuf),
    #[error("Torrent is named {found:?}, expected {expected:?}")]
    NameMismatch { expected: String, found: String },
}

// Byte sequence as slice :)
macro_rules! bss {
    ($bytes:expr) => {
        $bytes.as_slice()
    };
}

/// One file of a multi-file torrent.
#[derive(Debug, Clone, PartialEq)]
pub struct FileEntry {
    /// Path components below the torrent's directory.
    pub components: Vec<String>,
    pub length: i64,
}

impl FileEntry {
    pub fn path(&self) -> PathBuf {
        self.components.iter().collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Layout {
    Single { length: i64 },
    Multi { files: Vec<FileEntry> },
}

/// Torrent descriptor. Never mutated once built; shared between the seeder
/// registry and every peer connection serving it through an `Arc`.
#[derive(Clone)]
pub struct MetaInfo {
    announce: Url,
    name: String,
    piece_length: i64,
    piece_hashes: Vec<Sha1>,
    total_length: i64,
    layout: Layout,
    info_hash: Sha1,
    /// Unrecognised keys of the `info` dictionary, kept so that re-encoding
    /// reproduces the same infohash.
    info_extra: BencodeDict,
    data_root: PathBuf,
}

impl fmt::Debug for MetaInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetaInfo")
            .field("announce", &self.announce.as_str())
            .field("name", &self.name)
            .field("info_hash", &hex::encode(self.info_hash))
            .field("piece_length", &self.piece_length)
            .field("pieces", &self.piece_hashes.len())
            .field("layout", &self.layout)
            .finish()
    }
}

impl MetaInfo {
    pub fn from_slice(data: &[u8]) -> Result<Self> {
        Self::from_value(bencode::from_slice(data)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let data = fs::read(path)?;
        Self::from_slice(&data)
    }

    /// Sets the directory the torrent's payload lives in. Only meaningful
    /// before the value is shared.
    pub fn with_data_root(mut self, data_root: impl Into<PathBuf>) -> Self {
        self.data_root = data_root.into();
        self
    }

    pub fn announce(&self) -> &Url {
        &self.announce
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn info_hash(&self) -> &Sha1 {
        &self.info_hash
    }

    pub fn piece_length(&self) -> i64 {
        self.piece_length
    }

    pub fn piece_hashes(&self) -> &[Sha1] {
        &self.piece_hashes
    }

    pub fn total_length(&self) -> i64 {
        self.total_length
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn data_root(&self) -> &Path {
        &self.data_root
    }

    /// Where the payload (file or directory) named by the torrent lives.
    pub fn content_path(&self) -> PathBuf {
        self.data_root.join(&self.name)
    }

    pub fn piece_count(&self) -> u32 {
        piece_count(self.total_length, self.piece_length) as u32
    }

    /// Length of `piece`; the last piece may be shorter than the others.
    /// `piece` must be below `piece_count()`.
    pub fn piece_byte_length(&self, piece: u32) -> u32 {
        let remaining = self.total_length - self.piece_length * i64::from(piece);
        remaining.min(self.piece_length) as u32
    }

    pub fn valid_request(&self, piece: u32, begin: u32, length: u32) -> bool {
        if piece >= self.piece_count() {
            return false;
        }
        u64::from(begin) + u64::from(length) <= u64::from(self.piece_byte_length(piece))
    }

    /// The `info` sub-document the infohash is computed over.
    pub fn info_value(&self) -> Value {
        let mut info = self.info_extra.clone();
        info.insert(b"name".to_vec(), self.name.as_str().into());
        info.insert(b"piece length".to_vec(), self.piece_length.into());
        info.insert(b"pieces".to_vec(), self.piece_hashes.concat().into());
        match &self.layout {
            Layout::Single { length } => {
                info.insert(b"length".to_vec(), (*length).into());
            }
            Layout::Multi { files } => {
                let files: BencodeList = files
                    .iter()
                    .map(|file| {
                        let path: BencodeList = file
                            .components
                            .iter()
                            .map(|component| component.as_str().into())
                            .collect();
                        Value::Dict(BencodeDict::from([
                            (b"length".to_vec(), file.length.into()),
                            (b"path".to_vec(), path.into()),
                        ]))
                    })
                    .collect();
                info.insert(b"files".to_vec(), files.into());
            }
        }
        Value::Dict(info)
    }

    pub fn to_bencode(&self) -> Value {
        Value::Dict(BencodeDict::from([
            (b"announce".to_vec(), self.announce.as_str().into()),
            (b"info".to_vec(), self.info_value()),
        ]))
    }

    pub fn to_vec(&self) -> Vec<u8> {
        bencode::into_vec(&self.to_bencode())
    }

    pub fn to_path(&self, path: impl AsRef<Path>) -> Result<()> {
        fs::write(path, self.to_vec())?;
        Ok(())
    }
}

pub(crate) fn compute_info_hash(info: &Value) -> Sha1 {
    sha1::Sha1::digest(bencode::into_vec(info)).into()
}

pub(crate) fn piece_count(total_length: i64, piece_length: i64) -> i64 {
    total_length / piece_length + i64::from(total_length % piece_length != 0)
}

pub(crate) fn check_piece_length(piece_length: i64) -> Result<()> {
    if !(MIN_PIECE_LENGTH..=MAX_PIECE_LENGTH).contains(&piece_length) {
        return Err(InvalidPieceLength(piece_length));
    }
    Ok(())
}

/// Rejects components that could escape the torrent's directory.
pub(crate) fn check_path_component(component: &str) -> Result<()> {
    if component.is_empty()
        || component == "."
        || component == ".."
        || component.contains(['/', '\\'])
    {
        return Err(UnsafePath(component.to_string()));
    }
    Ok(())
}

fn take(dict: &mut BencodeDict, key: &str) -> Result<Value> {
    dict.remove(key.as_bytes())
        .ok_or_else(|| MissingField(key.to_string()))
}

impl MetaInfo {
    pub fn from_value(value: Value) -> Result<Self> {
        let mut dict: BencodeDict = value.try_into()?;
        let announce = Url::parse(&String::from_bencode(take(&mut dict, "announce")?)?)?;
        let info = take(&mut dict, "info")?;
        if !info.is_dict() {
            return Err(TorrentError::Bencode(BencodeError::InvalidType(
                info.name(),
                "Dictionary",
            )));
        }
        let info_hash = compute_info_hash(&info);
        let mut info: BencodeDict = info.try_into()?;

        let name = String::from_bencode(take(&mut info, "name")?)?;
        check_path_component(&name)?;
        let piece_length = i64::from_bencode(take(&mut info, "piece length")?)?;
        check_piece_length(piece_length)?;
        let pieces: BencodeString = take(&mut info, "pieces")?.try_into()?;
        if pieces.len() % 20 != 0 {
            return Err(InvalidPiecesLength);
        }

        let layout = match (info.remove(bss!(b"length")), info.remove(bss!(b"files"))) {
            (Some(length), None) => {
                let length: i64 = length.try_into()?;
                if length < 0 {
                    return Err(InvalidFileLength(length));
                }
                Layout::Single { length }
            }
            (None, Some(files)) => {
                let files: BencodeList = files.try_into()?;
                if files.is_empty() {
                    return Err(InvalidFileList);
                }
                let files = files
                    .into_iter()
                    .map(|file| FileEntry::from_dict(file.try_into()?))
                    .collect::<Result<Vec<_>>>()?;
                Layout::Multi { files }
            }
            _ => return Err(AmbiguousLayout),
        };

        let total_length = match &layout {
            Layout::Single { length } => *length,
            Layout::Multi { files } => files
                .iter()
                .try_fold(0i64, |total, file| total.checked_add(file.length))
                .ok_or(InvalidFileList)?,
        };

        let expected_pieces = piece_count(total_length, piece_length);
        if (pieces.len() / 20) as i64 != expected_pieces {
            return Err(InvalidPiecesLength);
        }
        let piece_hashes = pieces
            .chunks_exact(20)
            .map(|chunk| {
                let mut hash = [0; 20];
                hash.copy_from_slice(chunk);
                hash
            })
            .collect();

        Ok(MetaInfo {
            announce,
            name,
            piece_length,
            piece_hashes,
            total_length,
            layout,
            info_hash,
            info_extra: info,
            data_root: PathBuf::from("."),
        })
    }
}

impl FileEntry {
    fn from_dict(mut dict: BencodeDict) -> Result<Self> {
        let length = i64::from_bencode(take(&mut dict, "length")?)?;
        if length < 0 {
            return Err(InvalidFileLength(length));
        }
        let components = Vec::<String>::from_bencode(take(&mut dict, "path")?)?;
        if components.is_empty() {
            return Err(InvalidFileList);
        }
        for component in &components {
            check_path_component(component)?;
        }
        Ok(FileEntry { components, length })
    }
}
