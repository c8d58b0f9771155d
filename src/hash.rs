//! Content fingerprints compatible with the Dropbox `content_hash`
//!
//! The input is split into 4 MiB blocks, each block is hashed with SHA-256,
//! the block digests are concatenated and the result is hashed once more.
//! The block size is part of the remote protocol and must not change.

use std::io::Read;
use std::path::Path;
use std::time::Duration;

use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;

use crate::error::{MirrorError, Result};

/// Block size used by the remote store's content hash
pub const BLOCK_SIZE: usize = 4 * 1024 * 1024;

/// Read buffer size for streaming files (independent of `BLOCK_SIZE`)
const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Incremental content hasher.
///
/// Accepts data in chunks of any size; block boundaries are tracked
/// internally so the result only depends on the bytes fed in.
#[derive(Clone)]
pub struct ContentHasher {
    overall: Sha256,
    block: Sha256,
    block_pos: usize,
}

impl Default for ContentHasher {
    fn default() -> Self {
        Self::new()
    }
}

impl ContentHasher {
    pub fn new() -> Self {
        Self {
            overall: Sha256::new(),
            block: Sha256::new(),
            block_pos: 0,
        }
    }

    /// Feed more bytes into the hasher
    pub fn update(&mut self, mut data: &[u8]) {
        while !data.is_empty() {
            if self.block_pos == BLOCK_SIZE {
                self.finish_block();
            }

            let take = (BLOCK_SIZE - self.block_pos).min(data.len());
            self.block.update(&data[..take]);
            self.block_pos += take;
            data = &data[take..];
        }
    }

    /// Consume the hasher and render the fingerprint as lowercase hex
    pub fn finalize(mut self) -> String {
        if self.block_pos > 0 {
            self.finish_block();
        }
        hex::encode(self.overall.finalize())
    }

    fn finish_block(&mut self) {
        let digest = std::mem::take(&mut self.block).finalize();
        self.overall.update(digest);
        self.block_pos = 0;
    }
}

/// Fingerprint an in-memory buffer
pub fn fingerprint_bytes(data: &[u8]) -> String {
    let mut hasher = ContentHasher::new();
    hasher.update(data);
    hasher.finalize()
}

/// Fingerprint any blocking reader, streaming it in small chunks
pub fn fingerprint_reader<R: Read>(mut reader: R) -> std::io::Result<String> {
    let mut hasher = ContentHasher::new();
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize())
}

/// Fingerprint a file without loading it into memory
pub async fn fingerprint_file(path: &Path) -> Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = ContentHasher::new();
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize())
}

/// Fingerprint a file, giving up after `limit`
pub async fn fingerprint_file_with_timeout(path: &Path, limit: Duration) -> Result<String> {
    match tokio::time::timeout(limit, fingerprint_file(path)).await {
        Ok(result) => result,
        Err(_) => Err(MirrorError::Timeout(format!(
            "fingerprinting {} took longer than {:?}",
            path.display(),
            limit
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const EMPTY: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

    fn patterned(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(fingerprint_bytes(b""), EMPTY);
        assert_eq!(ContentHasher::new().finalize(), EMPTY);
    }

    #[test]
    fn test_single_block_is_hash_of_hash() {
        let inner = Sha256::digest(b"abc");
        let expected = hex::encode(Sha256::digest(inner));
        assert_eq!(fingerprint_bytes(b"abc"), expected);
    }

    #[test]
    fn test_block_boundary() {
        let data = patterned(BLOCK_SIZE + 10);
        let mut concat = Vec::new();
        concat.extend_from_slice(&Sha256::digest(&data[..BLOCK_SIZE]));
        concat.extend_from_slice(&Sha256::digest(&data[BLOCK_SIZE..]));
        let expected = hex::encode(Sha256::digest(&concat));

        assert_eq!(fingerprint_bytes(&data), expected);
    }

    #[test]
    fn test_exact_block_has_no_trailing_empty_block() {
        let data = vec![b'a'; BLOCK_SIZE];
        let expected = hex::encode(Sha256::digest(Sha256::digest(&data)));
        assert_eq!(fingerprint_bytes(&data), expected);
    }

    #[test]
    fn test_chunking_does_not_matter() {
        let data = patterned(BLOCK_SIZE * 2 + 12345);
        let whole = fingerprint_bytes(&data);

        for chunk in [1usize, 7, 4096, 1_000_003, BLOCK_SIZE - 1, BLOCK_SIZE + 1] {
            let mut hasher = ContentHasher::new();
            for piece in data.chunks(chunk) {
                hasher.update(piece);
            }
            assert_eq!(hasher.finalize(), whole, "chunk size {}", chunk);
        }
    }

    #[test]
    fn test_single_byte_change() {
        let mut data = patterned(BLOCK_SIZE + 1);
        let before = fingerprint_bytes(&data);
        data[BLOCK_SIZE] ^= 0xff;
        assert_ne!(fingerprint_bytes(&data), before);
    }

    #[test]
    fn test_reader_matches_bytes() {
        let data = patterned(300_000);
        let from_reader = fingerprint_reader(std::io::Cursor::new(&data)).unwrap();
        assert_eq!(from_reader, fingerprint_bytes(&data));
    }

    #[tokio::test]
    async fn test_file_fingerprint_ignores_name() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.bin");
        let b = dir.path().join("b.bin");
        for path in [&a, &b] {
            let mut f = std::fs::File::create(path).unwrap();
            f.write_all(b"same bytes").unwrap();
        }

        let fa = fingerprint_file(&a).await.unwrap();
        let fb = fingerprint_file(&b).await.unwrap();
        assert_eq!(fa, fb);
        assert_eq!(fa, fingerprint_bytes(b"same bytes"));
    }

    #[tokio::test]
    async fn test_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = fingerprint_file(&dir.path().join("nope")).await.unwrap_err();
        assert!(matches!(err, MirrorError::Io(_)));
    }

    #[tokio::test]
    async fn test_timeout_variant_succeeds_for_small_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("small.txt");
        std::fs::write(&path, b"hello world\n").unwrap();

        let fp = fingerprint_file_with_timeout(&path, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(
            fp,
            "f83e4b6bba3efac41f1ff56ee97adf7454680fee778924cb5ba06311d136ad1c"
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_when_read_stalls() {
        let dir = tempfile::tempdir().unwrap();
        let fifo = dir.path().join("stalled");
        let status = std::process::Command::new("mkfifo")
            .arg(&fifo)
            .status()
            .unwrap();
        assert!(status.success());

        // Writer keeps the pipe open without writing until released
        let (release, released) = std::sync::mpsc::channel::<()>();
        let writer_path = fifo.clone();
        let writer = std::thread::spawn(move || {
            let pipe = std::fs::OpenOptions::new()
                .write(true)
                .open(&writer_path)
                .unwrap();
            let _ = released.recv();
            drop(pipe);
        });

        let err = fingerprint_file_with_timeout(&fifo, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, MirrorError::Timeout(_)));

        release.send(()).unwrap();
        writer.join().unwrap();
    }
}
