//! Offset-aware, optionally-compressed byte streams.
//!
//! [`PositionedReader`] wraps a plain or gzip-compressed file stream and tracks the number of
//! *decompressed* bytes consumed so far, reporting it as the next readable offset; this is what
//! a receiver persists to a `next` file on partial commit, and what it seeks past on resume.
//! [`PositionedWriter`] is the write-side counterpart a sender uses when appending to its `trans`
//! file, needed so the engine can learn the final size of a transaction for the merge/promote
//! decision without a separate `stat` call racing a concurrent flush.

use std::{
    fs::File,
    io::{self, BufReader, BufWriter, Read, Write},
    sync::{Arc, Mutex},
};

use flate2::{read::MultiGzDecoder, write::GzEncoder, Compression};

/// A sequential reader that tracks how many bytes it has yielded.
///
/// When compression is enabled, this wraps a decompressing stream; callers resuming from a
/// stored offset skip that many *decompressed* bytes before the first read, since the offset is
/// always in terms of the logical (decompressed) record stream, never the on-disk compressed
/// size.
pub struct PositionedReader {
    inner: Box<dyn Read + Send>,
    position: u64,
}

impl PositionedReader {
    /// Opens `path` for sequential reading, transparently gzip-decompressing if `compressed` is
    /// set, and skips forward to `start_position` before returning.
    pub fn open(path: &std::path::Path, compressed: bool, start_position: u64) -> io::Result<Self> {
        let file = File::open(path)?;
        let inner: Box<dyn Read + Send> = if compressed {
            // A merged tail entry is the byte-concatenation of several independently-finished
            // gzip streams (one per merged transaction); `MultiGzDecoder` transparently walks
            // every member in sequence, so merges never have to re-compress the tail.
            Box::new(BufReader::new(MultiGzDecoder::new(file)))
        } else {
            Box::new(BufReader::new(file))
        };

        let mut reader = Self { inner, position: 0 };
        reader.skip(start_position)?;
        Ok(reader)
    }

    /// The next byte offset a subsequent read will start from.
    pub fn position(&self) -> u64 {
        self.position
    }

    fn skip(&mut self, amount: u64) -> io::Result<()> {
        let mut remaining = amount;
        let mut scratch = [0u8; 8192];
        while remaining > 0 {
            let take = remaining.min(scratch.len() as u64) as usize;
            self.inner.read_exact(&mut scratch[..take])?;
            remaining -= take as u64;
        }
        self.position += amount;
        Ok(())
    }
}

/// Computes the logical (decompressed) length of a stored entry by reading it end to end.
///
/// Used both when a sender commits a (possibly gzip-compressed) `trans` file, to size it before
/// promoting or merging, and during recovery, so `QueueEntry::file_size` always means the same
/// thing -- the decompressed record-stream length -- regardless of which path computed it.
/// Keeping the two paths in this one unit is what keeps `next_read_position <= file_size`
/// (Invariant 2) true even though compression can shrink a file's on-disk footprint well below
/// any offset a receiver may resume from.
pub(crate) fn logical_size(path: &std::path::Path, compressed: bool) -> io::Result<u64> {
    let mut reader = PositionedReader::open(path, compressed, 0)?;
    io::copy(&mut reader, &mut io::sink())
}

impl Read for PositionedReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.position += n as u64;
        Ok(n)
    }
}

/// A handle onto a [`PositionedReader`] shared between the codec (which only sees a plain `Read`)
/// and the receiver (which needs to query `position()` after every message, to know how much of
/// the entry a partial commit should record in its `next` file).
///
/// The codec's `MessageSource` trait has no position accessor of its own -- framing is opaque to
/// the engine -- so this is the seam: the receiver keeps one clone of the `Arc<Mutex<_>>` and
/// hands the codec a [`SharedPositionedReader`] wrapping another.
#[derive(Clone)]
pub struct SharedPositionedReader(Arc<Mutex<PositionedReader>>);

impl SharedPositionedReader {
    pub fn new(reader: PositionedReader) -> Self {
        Self(Arc::new(Mutex::new(reader)))
    }

    /// The next byte offset a subsequent read will start from.
    pub fn position(&self) -> u64 {
        self.0.lock().expect("positioned reader mutex poisoned").position()
    }
}

impl Read for SharedPositionedReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.lock().expect("positioned reader mutex poisoned").read(buf)
    }
}

/// A sequential, optionally gzip-compressing writer used by a sender's transaction file.
pub struct PositionedWriter {
    inner: Box<dyn Write + Send>,
    written: u64,
}

impl PositionedWriter {
    /// Opens `path` for appending (creating it if absent), transparently gzip-compressing the
    /// stream written through it if `compressed` is set.
    pub fn create(path: &std::path::Path, compressed: bool) -> io::Result<Self> {
        let file = File::create(path)?;
        let inner: Box<dyn Write + Send> = if compressed {
            Box::new(BufWriter::new(GzEncoder::new(file, Compression::default())))
        } else {
            Box::new(BufWriter::new(file))
        };

        Ok(Self { inner, written: 0 })
    }

    /// Bytes written so far (pre-compression, i.e. the logical record stream size).
    pub fn position(&self) -> u64 {
        self.written
    }

    /// Flushes buffered data and finishes the compression stream, if any, but does not `fsync`.
    pub fn finish(mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl Write for PositionedWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn plain_roundtrip_tracks_position() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data");

        {
            let mut writer = PositionedWriter::create(&path, false).unwrap();
            writer.write_all(b"0123456789").unwrap();
            assert_eq!(writer.position(), 10);
            writer.finish().unwrap();
        }

        let mut reader = PositionedReader::open(&path, false, 3).unwrap();
        assert_eq!(reader.position(), 3);
        let mut rest = Vec::new();
        reader.read_to_end(&mut rest).unwrap();
        assert_eq!(rest, b"3456789");
        assert_eq!(reader.position(), 10);
    }

    #[test]
    fn compressed_roundtrip_tracks_decompressed_position() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.gz");

        {
            let mut writer = PositionedWriter::create(&path, true).unwrap();
            writer.write_all(b"hello compressed world").unwrap();
            writer.finish().unwrap();
        }

        let mut reader = PositionedReader::open(&path, true, 6).unwrap();
        let mut rest = Vec::new();
        reader.read_to_end(&mut rest).unwrap();
        assert_eq!(rest, b"compressed world");
    }
}
