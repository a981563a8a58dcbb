use std::io;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::DEFAULT_CHUNK_SIZE;

/// Upper bound on a single buffer reservation while filling a chunk.
const READ_BLOCK: usize = 64 * 1024;

/// A chunk of stream data for transfer.
#[derive(Debug, Clone)]
pub struct Chunk {
    /// Byte offset within the stream.
    pub offset: u64,
    /// Raw chunk data.
    pub data: Bytes,
    /// `true` when the reader hit end-of-stream while filling this chunk.
    pub last: bool,
}

impl Chunk {
    pub fn len(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Reads an async byte source in fixed-size chunks.
///
/// Every chunk except the last is exactly `chunk_size` bytes, so a short
/// chunk always marks the end of the stream.
pub struct ChunkReader<R> {
    reader: R,
    chunk_size: usize,
    offset: u64,
    done: bool,
}

impl<R: AsyncRead + Unpin> ChunkReader<R> {
    /// Wraps `reader`.
    ///
    /// If `chunk_size` is 0, [`DEFAULT_CHUNK_SIZE`] (4 MiB) is used.
    pub fn new(reader: R, chunk_size: usize) -> Self {
        let chunk_size = if chunk_size == 0 {
            DEFAULT_CHUNK_SIZE
        } else {
            chunk_size
        };
        Self {
            reader,
            chunk_size,
            offset: 0,
            done: false,
        }
    }

    /// Reads the next chunk. Returns `None` at EOF.
    pub async fn next_chunk(&mut self) -> io::Result<Option<Chunk>> {
        if self.done {
            return Ok(None);
        }

        let mut buf = BytesMut::new();
        while buf.len() < self.chunk_size {
            buf.reserve((self.chunk_size - buf.len()).min(READ_BLOCK));
            let n = (&mut self.reader)
                .take((self.chunk_size - buf.len()) as u64)
                .read_buf(&mut buf)
                .await?;
            if n == 0 {
                self.done = true;
                break;
            }
        }

        if buf.is_empty() {
            return Ok(None);
        }

        let chunk = Chunk {
            offset: self.offset,
            data: buf.freeze(),
            last: self.done,
        };
        self.offset += chunk.len();
        Ok(Some(chunk))
    }

    /// Current byte offset.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }
}
