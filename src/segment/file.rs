//! Wrapper around a single segment's append-only file.
//!
//! Does **not** enforce size limits or any higher-level contract; the
//! owning `Segment` is responsible for that. Mirrors the read/append
//! split of the teacher's disk segment wrapper, but tracks its own
//! offset explicitly rather than trusting the OS's append-mode cursor,
//! so the offset returned from `append` is exact even under buffered
//! writers.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use bytes::{Bytes, BytesMut};

use crate::codec;
use crate::error::{Error, Result};

#[derive(Debug)]
pub(crate) struct SegmentFile {
    file: File,
    path: PathBuf,
    size: u64,
}

impl SegmentFile {
    /// Opens an existing segment file, trusting its current length as `size`.
    pub(crate) fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        let size = file.metadata()?.len();
        Ok(Self {
            file,
            path: path.as_ref().to_path_buf(),
            size,
        })
    }

    /// Creates a new, empty segment file. Fails if one already exists at `path`.
    pub(crate) fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)?;
        Ok(Self {
            file,
            path: path.as_ref().to_path_buf(),
            size: 0,
        })
    }

    pub(crate) fn size(&self) -> u64 {
        self.size
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// Appends `bytes` followed by `delimiter`. Returns the offset the caller's
    /// bytes start at (the delimiter is not part of the returned range).
    pub(crate) fn append(&mut self, bytes: &[u8], delimiter: &[u8]) -> Result<u64> {
        let offset = self.size;
        self.file.write_all_at(bytes, offset)?;
        self.file.write_all_at(delimiter, offset + bytes.len() as u64)?;
        self.size += (bytes.len() + delimiter.len()) as u64;
        Ok(offset)
    }

    /// Positioned read of `size` bytes starting at `offset`.
    pub(crate) fn read_at(&self, offset: u64, size: u64) -> Result<Bytes> {
        if offset + size > self.size {
            return Err(Error::ShortRead {
                offset,
                size,
                file_len: self.size,
            });
        }
        let len = size as usize;
        let mut buf = BytesMut::zeroed(len);
        self.file.read_exact_at(&mut buf, offset)?;
        Ok(buf.freeze())
    }

    /// Reads the whole file sequentially, resyncing on each record's own
    /// length prefix (`codec::framed_len`) rather than by searching for the
    /// delimiter — the delimiter's bytes may legitimately occur inside an
    /// opaque key or value, so a byte-search resync would mistake such an
    /// occurrence for a record boundary. After each record, the trailing
    /// delimiter is checked as a sanity marker only: if it isn't where the
    /// length prefix says it should be, the file is corrupt and recovery
    /// must fail loudly rather than silently misframe later records. Used
    /// by the startup recovery scan.
    pub(crate) fn scan(&self, delimiter: &[u8]) -> Result<Vec<(u64, Bytes)>> {
        let mut file = self.file.try_clone()?;
        use std::io::{Read, Seek, SeekFrom};
        file.seek(SeekFrom::Start(0))?;
        let mut contents = Vec::with_capacity(self.size as usize);
        file.read_to_end(&mut contents)?;

        let mut out = Vec::new();
        let mut pos = 0usize;
        while pos < contents.len() {
            let rest = &contents[pos..];
            let record_len = codec::framed_len(rest)?;
            let blob = &rest[..record_len];

            let delim_start = pos + record_len;
            let delim_end = delim_start + delimiter.len();
            if contents.get(delim_start..delim_end) != Some(delimiter) {
                return Err(Error::Decode(format!(
                    "segment scan: missing delimiter after record at offset {pos}"
                )));
            }

            out.push((pos as u64, Bytes::copy_from_slice(blob)));
            pos = delim_end;
        }
        Ok(out)
    }

    /// Flushes buffered writes to disk. The file descriptor itself is
    /// released when the last `Arc<Segment>` holding it is dropped.
    pub(crate) fn sync(&self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }

    pub(crate) fn delete(path: &Path) -> io::Result<()> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    #[test]
    fn create_append_and_read() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("0.seg");
        let mut seg = SegmentFile::create(&path).unwrap();

        let delim = b"\xff\xfe\xff\xfe";
        let off1 = seg.append(b"hello", delim).unwrap();
        let off2 = seg.append(b"world!", delim).unwrap();

        assert_eq!(off1, 0);
        assert_eq!(off2, 5 + delim.len() as u64);

        assert_eq!(seg.read_at(off1, 5).unwrap().as_ref(), b"hello");
        assert_eq!(seg.read_at(off2, 6).unwrap().as_ref(), b"world!");
    }

    #[test]
    fn read_past_eof_is_short_read() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("0.seg");
        let mut seg = SegmentFile::create(&path).unwrap();
        seg.append(b"hi", b"|").unwrap();

        let err = seg.read_at(0, 1000).unwrap_err();
        assert!(matches!(err, Error::ShortRead { .. }));
    }

    #[test]
    fn reopen_preserves_size() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("0.seg");
        {
            let mut seg = SegmentFile::create(&path).unwrap();
            seg.append(b"hello", b"|").unwrap();
        }
        let seg = SegmentFile::open(&path).unwrap();
        assert_eq!(seg.size(), 6);
    }

    #[test]
    fn scan_yields_offsets_and_blobs() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("0.seg");
        let delim = b"|";
        let mut seg = SegmentFile::create(&path).unwrap();
        let first = crate::codec::encode(b"a", b"1");
        let second = crate::codec::encode(b"b", b"22");
        let off1 = seg.append(&first, delim).unwrap();
        let off2 = seg.append(&second, delim).unwrap();

        let entries = seg.scan(delim).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0], (off1, first));
        assert_eq!(entries[1], (off2, second));
    }

    #[test]
    fn scan_tolerates_delimiter_like_bytes_inside_a_value() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("0.seg");
        let delim = b"\xff\xfe\xff\xfe";
        let mut seg = SegmentFile::create(&path).unwrap();
        // the value itself contains the delimiter pattern; a byte-search
        // resync would misframe this, a length-prefix resync must not.
        let tricky = crate::codec::encode(b"k", &[0xff, 0xfe, 0xff, 0xfe, 0x41]);
        let after = crate::codec::encode(b"k2", b"v2");
        let off1 = seg.append(&tricky, delim).unwrap();
        let off2 = seg.append(&after, delim).unwrap();

        let entries = seg.scan(delim).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0], (off1, tricky));
        assert_eq!(entries[1], (off2, after));
    }

    #[test]
    fn scan_fails_loudly_on_missing_delimiter() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("0.seg");
        let delim = b"|";
        let mut seg = SegmentFile::create(&path).unwrap();
        let blob = crate::codec::encode(b"a", b"1");
        seg.append(&blob, delim).unwrap();
        // corrupt the trailing delimiter byte in place.
        seg.file.write_all_at(b"X", blob.len() as u64).unwrap();

        assert!(seg.scan(delim).is_err());
    }
}
