//! Lazy chunking of readers for streaming execution.

use std::io::{self, ErrorKind, Read};

/// Default chunk size for [`ByteChunks`] (4 MiB).
pub const DEFAULT_CHUNK_SIZE: usize = 4 * 1024 * 1024;

/// Iterator over bounded-size chunks of a reader.
///
/// Only one chunk is held in memory at a time, so arbitrarily large inputs
/// can be fed to [`Pipeline::stream`](super::Pipeline::stream). Every chunk
/// except the last is exactly `chunk_size` bytes.
pub struct ByteChunks<R> {
    reader: R,
    chunk_size: usize,
    done: bool,
}

impl<R: Read> ByteChunks<R> {
    pub fn new(reader: R, chunk_size: usize) -> Self {
        Self {
            reader,
            chunk_size: chunk_size.max(1),
            done: false,
        }
    }

    pub fn with_default_size(reader: R) -> Self {
        Self::new(reader, DEFAULT_CHUNK_SIZE)
    }
}

impl<R: Read> Iterator for ByteChunks<R> {
    type Item = io::Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let mut chunk = vec![0u8; self.chunk_size];
        let mut filled = 0;
        while filled < chunk.len() {
            match self.reader.read(&mut chunk[filled..]) {
                Ok(0) => {
                    self.done = true;
                    break;
                }
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }

        if filled == 0 {
            return None;
        }
        chunk.truncate(filled);
        Some(Ok(chunk))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_chunks_cover_input() {
        let data: Vec<u8> = (0..10).collect();
        let chunks: Vec<Vec<u8>> = ByteChunks::new(Cursor::new(data.clone()), 4)
            .collect::<io::Result<_>>()
            .unwrap();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0], vec![0, 1, 2, 3]);
        assert_eq!(chunks[2], vec![8, 9]);
        assert_eq!(chunks.concat(), data);
    }

    #[test]
    fn test_empty_reader_yields_nothing() {
        assert_eq!(ByteChunks::new(Cursor::new(Vec::new()), 8).count(), 0);
    }

    #[test]
    fn test_exact_multiple_has_no_empty_tail() {
        let chunks = ByteChunks::new(Cursor::new(vec![1u8; 8]), 4).count();
        assert_eq!(chunks, 2);
    }

    #[test]
    fn test_default_size_splits_at_four_mib() {
        let reader = io::repeat(7).take(DEFAULT_CHUNK_SIZE as u64 + 3);
        let sizes: Vec<usize> = ByteChunks::with_default_size(reader).map(|c| c.unwrap().len()).collect();
        assert_eq!(sizes, vec![DEFAULT_CHUNK_SIZE, 3]);
    }
}
