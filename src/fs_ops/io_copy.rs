//! Verified streaming copy.
//!
//! - Content goes to `<dest>.tier_move.part`, created exclusively (never clobbers).
//! - Two BLAKE3 digests run side by side: one over the bytes read from the source,
//!   one over the bytes accepted by the temporary file.
//! - After `sync_all` the digests are compared; on mismatch the temporary file is
//!   removed and nothing appears at the destination.
//! - A matching copy is renamed into place with [`super::atomic`].
//!
//! The source is read once from start to EOF; bytes appended concurrently are not
//! included.

use anyhow::Result;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use tracing::{debug, warn};

use super::helpers::io_error_with_help;
use super::util::temp_path_for;
use crate::errors::TierMoveError;

const BUF_SIZE: usize = 1024 * 1024;

/// Outcome of a verified copy.
#[derive(Debug, Clone)]
pub struct CopyReport {
    pub bytes: u64,
    pub digest: blake3::Hash,
}

/// Writer that hashes exactly the bytes the inner writer accepted.
struct DigestWriter<W> {
    inner: W,
    hasher: blake3::Hasher,
}

impl<W: Write> DigestWriter<W> {
    fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: blake3::Hasher::new(),
        }
    }

    fn into_parts(self) -> (W, blake3::Hash) {
        (self.inner, self.hasher.finalize())
    }
}

impl<W: Write> Write for DigestWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

struct Relayed<W> {
    bytes: u64,
    source_digest: blake3::Hash,
    dest_digest: blake3::Hash,
    writer: W,
}

/// Pump `reader` into `writer`, hashing both sides. `tap` sees each chunk after
/// the source digest has consumed it and before it is written.
fn relay<R: Read, W: Write>(
    mut reader: R,
    writer: W,
    tap: &mut dyn FnMut(&mut [u8]),
) -> io::Result<Relayed<W>> {
    let mut source_hasher = blake3::Hasher::new();
    let mut sink = DigestWriter::new(writer);
    let mut buf = vec![0u8; BUF_SIZE];
    let mut bytes = 0u64;
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        source_hasher.update(&buf[..n]);
        tap(&mut buf[..n]);
        sink.write_all(&buf[..n])?;
        bytes += n as u64;
    }
    sink.flush()?;
    let (writer, dest_digest) = sink.into_parts();
    Ok(Relayed {
        bytes,
        source_digest: source_hasher.finalize(),
        dest_digest,
        writer,
    })
}

/// Copy `src` to `dest` through a verified temporary file.
pub fn copy_verified(src: &Path, dest: &Path) -> Result<CopyReport> {
    copy_verified_with(src, dest, &mut |_| {})
}

pub(crate) fn copy_verified_with(
    src: &Path,
    dest: &Path,
    tap: &mut dyn FnMut(&mut [u8]),
) -> Result<CopyReport> {
    let tmp = temp_path_for(dest);
    let reader = File::open(src).map_err(io_error_with_help("open source", src))?;
    let out = OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(&tmp)
        .map_err(io_error_with_help("create temporary file", &tmp))?;

    let result = write_and_verify(src, dest, &tmp, reader, out, tap);
    if result.is_err() {
        if let Err(e) = fs::remove_file(&tmp) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(path = %tmp.display(), error = %e, "failed to remove temporary file");
            }
        }
    }
    result
}

fn write_and_verify(
    src: &Path,
    dest: &Path,
    tmp: &Path,
    reader: File,
    out: File,
    tap: &mut dyn FnMut(&mut [u8]),
) -> Result<CopyReport> {
    let relayed = relay(reader, out, tap).map_err(io_error_with_help("copy into", tmp))?;
    relayed
        .writer
        .sync_all()
        .map_err(io_error_with_help("fsync", tmp))?;

    if relayed.source_digest != relayed.dest_digest {
        return Err(TierMoveError::DigestMismatch {
            src: src.to_path_buf(),
            source_digest: relayed.source_digest.to_hex().to_string(),
            dest_digest: relayed.dest_digest.to_hex().to_string(),
        }
        .into());
    }

    super::atomic::rename_into_place(tmp, dest)?;
    debug!(
        src = %src.display(),
        dest = %dest.display(),
        bytes = relayed.bytes,
        digest = %relayed.source_digest.to_hex(),
        "verified copy complete"
    );
    Ok(CopyReport {
        bytes: relayed.bytes,
        digest: relayed.source_digest,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn copies_and_reports_digest() {
        let td = tempdir().unwrap();
        let src = td.path().join("src.bin");
        let dest = td.path().join("dest.bin");
        let data: Vec<u8> = (0..(3 * BUF_SIZE + 17)).map(|i| (i % 251) as u8).collect();
        fs::write(&src, &data).unwrap();

        let report = copy_verified(&src, &dest).unwrap();
        assert_eq!(report.bytes, data.len() as u64);
        assert_eq!(report.digest, blake3::hash(&data));
        assert_eq!(fs::read(&dest).unwrap(), data);
        assert!(!temp_path_for(&dest).exists());
    }

    #[test]
    fn empty_file_copies() {
        let td = tempdir().unwrap();
        let src = td.path().join("empty");
        let dest = td.path().join("out");
        fs::write(&src, b"").unwrap();
        let report = copy_verified(&src, &dest).unwrap();
        assert_eq!(report.bytes, 0);
        assert_eq!(fs::read(&dest).unwrap().len(), 0);
    }

    #[test]
    fn corrupted_stream_leaves_nothing_behind() {
        let td = tempdir().unwrap();
        let src = td.path().join("src.bin");
        let dest = td.path().join("dest.bin");
        fs::write(&src, vec![7u8; 4096]).unwrap();

        let mut flip = |chunk: &mut [u8]| chunk[100] ^= 0xff;
        let err = copy_verified_with(&src, &dest, &mut flip).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<TierMoveError>(),
            Some(TierMoveError::DigestMismatch { .. })
        ));
        assert!(!dest.exists());
        assert!(!temp_path_for(&dest).exists());
    }

    #[test]
    fn destination_is_invisible_until_verified() {
        let td = tempdir().unwrap();
        let src = td.path().join("src.bin");
        let dest = td.path().join("dest.bin");
        let data: Vec<u8> = (0..(4 * BUF_SIZE + 3)).map(|i| (i % 239) as u8).collect();
        fs::write(&src, &data).unwrap();

        let tmp = temp_path_for(&dest);
        let mut chunks = 0usize;
        let mut seen_dest = false;
        let mut check = |_: &mut [u8]| {
            chunks += 1;
            seen_dest |= fs::symlink_metadata(&dest).is_ok();
            assert!(tmp.exists(), "writes go to the temporary file");
        };
        copy_verified_with(&src, &dest, &mut check).unwrap();

        assert!(chunks >= 4, "copy ran in several chunks, got {chunks}");
        assert!(!seen_dest, "destination appeared before the copy was verified");
        assert_eq!(fs::metadata(&dest).unwrap().len(), data.len() as u64);
        assert_eq!(fs::read(&dest).unwrap(), data);
        assert!(!tmp.exists());
    }

    #[test]
    fn stale_temp_file_blocks_copy() {
        let td = tempdir().unwrap();
        let src = td.path().join("src");
        let dest = td.path().join("dest");
        fs::write(&src, b"x").unwrap();
        fs::write(temp_path_for(&dest), b"stale").unwrap();
        let err = copy_verified(&src, &dest).unwrap_err();
        assert!(err.to_string().contains("create temporary file"));
        assert!(!dest.exists());
        // The stale file is not ours to delete.
        assert!(temp_path_for(&dest).exists());
    }

    #[test]
    fn existing_destination_is_not_replaced() {
        let td = tempdir().unwrap();
        let src = td.path().join("src");
        let dest = td.path().join("dest");
        fs::write(&src, b"new").unwrap();
        fs::write(&dest, b"old").unwrap();
        let err = copy_verified(&src, &dest).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<TierMoveError>(),
            Some(TierMoveError::DestinationExists(_))
        ));
        assert_eq!(fs::read(&dest).unwrap(), b"old");
        assert!(!temp_path_for(&dest).exists());
    }
}
