use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

use crate::file::{Layout, MetaInfo};

fn read_at(path: &Path, offset: u64, buf: &mut [u8]) -> io::Result<()> {
    let mut file = File::open(path)?;
    file.seek(SeekFrom::Start(offset))?;
    file.read_exact(buf)
}

impl MetaInfo {
    /// Reads a whole piece from disk. A file that is shorter than the torrent
    /// says fails with `UnexpectedEof`.
    pub fn fetch_piece(&self, piece: u32) -> io::Result<Vec<u8>> {
        if piece >= self.piece_count() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("piece {piece} out of range"),
            ));
        }
        let mut buf = vec![0; self.piece_byte_length(piece) as usize];
        let offset = self.piece_length as u64 * u64::from(piece);
        let content = self.content_path();

        match &self.layout {
            Layout::Single { .. } => read_at(&content, offset, &mut buf)?,
            Layout::Multi { files } => {
                let mut skip = offset;
                let mut filled = 0;
                for file in files {
                    let length = file.length as u64;
                    if skip >= length {
                        skip -= length;
                        continue;
                    }
                    let take = ((length - skip) as usize).min(buf.len() - filled);
                    read_at(
                        &content.join(file.path()),
                        skip,
                        &mut buf[filled..filled + take],
                    )?;
                    filled += take;
                    skip = 0;
                    if filled == buf.len() {
                        break;
                    }
                }
                if filled != buf.len() {
                    return Err(io::ErrorKind::UnexpectedEof.into());
                }
            }
        }
        Ok(buf)
    }
}
