//! Content Descriptor Builder (C4)
//!
//! Streams a package's files in stable order, hashes them into fixed-size
//! pieces, checkpoints progress as it goes, and emits a BitTorrent-compatible
//! bencoded descriptor. Restart-safe: a job resumes from the highest
//! contiguous checkpointed piece rather than rehashing from scratch.

pub mod bencode;

use std::collections::BTreeMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use sha1::{Digest, Sha1};
use uuid::Uuid;
use walkdir::WalkDir;

use crate::error::{CatalogError, Result};

const MIN_PIECE_LENGTH: u64 = 256 * 1024;
const MAX_PIECE_LENGTH: u64 = 16 * 1024 * 1024;

/// Next power of two >= `ceil(total_size / 1000)`, clamped to
/// `[256 KiB, 16 MiB]`.
pub fn piece_length_for(total_size: u64) -> u64 {
    let target = total_size.div_ceil(1000).max(1);
    let mut candidate = 1u64;
    while candidate < target {
        candidate <<= 1;
    }
    candidate.clamp(MIN_PIECE_LENGTH, MAX_PIECE_LENGTH)
}

/// One file as it will appear in the descriptor's `files` list, in the
/// stable lexicographic order the builder walks them in.
#[derive(Debug, Clone)]
pub struct DescriptorFile {
    pub relative_path: String,
    pub absolute_path: PathBuf,
    pub length: u64,
}

/// Enumerates the files under `package_root` in lexicographic order on the
/// relative path joined with `/`.
pub fn enumerate_files(package_root: &Path) -> Result<Vec<DescriptorFile>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(package_root) {
        let entry = entry.map_err(|e| CatalogError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(package_root)
            .unwrap_or(entry.path())
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/");
        let length = entry
            .metadata()
            .map_err(|e| CatalogError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?
            .len();
        files.push(DescriptorFile {
            relative_path: relative,
            absolute_path: entry.path().to_path_buf(),
            length,
        });
    }
    files.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    Ok(files)
}

/// Progress reported after each checkpointed piece.
#[derive(Debug, Clone, Copy)]
pub struct BuildProgress {
    pub checkpoint_pieces: u32,
    pub total_pieces: u32,
    pub hashing_speed_bps: f64,
    pub progress_percent: f64,
}

/// Where piece checkpoints and progress live. The catalog store implements
/// this against Postgres; tests use an in-memory fake.
#[async_trait]
pub trait CheckpointSink: Send + Sync {
    async fn load_checkpoints(
        &self,
        package_id: Uuid,
        server_id: Uuid,
    ) -> Result<BTreeMap<u32, [u8; 20]>>;

    async fn insert_checkpoint(
        &self,
        package_id: Uuid,
        server_id: Uuid,
        piece_index: u32,
        hash: [u8; 20],
    ) -> Result<()>;

    async fn update_progress(
        &self,
        package_id: Uuid,
        server_id: Uuid,
        progress: BuildProgress,
    ) -> Result<()>;

    async fn clear_checkpoints(&self, package_id: Uuid, server_id: Uuid) -> Result<()>;
}

/// The finished descriptor: the bencoded metainfo bytes plus the derived
/// info_hash and piece geometry.
#[derive(Debug, Clone)]
pub struct Descriptor {
    pub bencoded: Vec<u8>,
    pub info_hash_hex: String,
    pub piece_length: u64,
    pub total_pieces: u32,
    pub piece_hashes: Vec<[u8; 20]>,
    pub resumed_from_piece: Option<u32>,
}

/// Highest contiguous prefix of checkpointed pieces, i.e. the first index
/// that's missing. Resume starts here.
fn resume_index(checkpoints: &BTreeMap<u32, [u8; 20]>) -> u32 {
    let mut next = 0u32;
    while checkpoints.contains_key(&next) {
        next += 1;
    }
    next
}

/// Builds a descriptor for `package_root`, resuming from any existing
/// checkpoints for `(package_id, server_id)`.
///
/// `cancel` is polled between pieces; when set, the build stops and returns
/// `CatalogError::Cancelled` without clearing checkpoints.
pub async fn build(
    package_root: &Path,
    package_name: &str,
    package_id: Uuid,
    server_id: Uuid,
    announce: &str,
    checkpoints: &dyn CheckpointSink,
    cancel: &AtomicBool,
) -> Result<Descriptor> {
    let files = enumerate_files(package_root)?;
    let total_size: u64 = files.iter().map(|f| f.length).sum();
    let piece_length = piece_length_for(total_size);
    let total_pieces = if total_size == 0 {
        0
    } else {
        total_size.div_ceil(piece_length) as u32
    };

    let existing = checkpoints.load_checkpoints(package_id, server_id).await?;
    let resume_from = resume_index(&existing);
    let resumed_from_piece = if resume_from > 0 { Some(resume_from) } else { None };

    let mut piece_hashes: Vec<[u8; 20]> = (0..resume_from)
        .map(|i| *existing.get(&i).expect("contiguous prefix"))
        .collect();

    let mut reader = PackageStreamReader::new(files);
    reader.skip(resume_from as u64 * piece_length)?;

    let mut piece_index = resume_from;
    let start = std::time::Instant::now();
    let mut bytes_hashed_this_run: u64 = 0;

    loop {
        if cancel.load(Ordering::SeqCst) {
            return Err(CatalogError::Cancelled(format!(
                "build cancelled for package {package_id} at piece {piece_index}"
            )));
        }

        let chunk = reader.read_piece(piece_length)?;
        if chunk.is_empty() {
            break;
        }

        let mut hasher = Sha1::new();
        hasher.update(&chunk);
        let digest = hasher.finalize();
        let mut hash = [0u8; 20];
        hash.copy_from_slice(&digest);

        checkpoints
            .insert_checkpoint(package_id, server_id, piece_index, hash)
            .await?;
        piece_hashes.push(hash);
        bytes_hashed_this_run += chunk.len() as u64;

        let elapsed = start.elapsed().as_secs_f64().max(0.001);
        checkpoints
            .update_progress(
                package_id,
                server_id,
                BuildProgress {
                    checkpoint_pieces: piece_index + 1,
                    total_pieces,
                    hashing_speed_bps: bytes_hashed_this_run as f64 / elapsed,
                    progress_percent: if total_pieces == 0 {
                        100.0
                    } else {
                        (piece_index + 1) as f64 / total_pieces as f64 * 100.0
                    },
                },
            )
            .await?;

        piece_index += 1;
        if chunk.len() as u64 != piece_length {
            // Final, short piece — stream is exhausted.
            break;
        }
    }

    let mut pieces_concat = Vec::with_capacity(piece_hashes.len() * 20);
    for h in &piece_hashes {
        pieces_concat.extend_from_slice(h);
    }

    let files_value = bencode::Value::List(
        reader
            .files
            .iter()
            .map(|f| {
                let path_components = f
                    .relative_path
                    .split('/')
                    .map(bencode::Value::str)
                    .collect();
                bencode::DictBuilder::new()
                    .insert("length", bencode::Value::Int(f.length as i64))
                    .insert("path", bencode::Value::List(path_components))
                    .build()
            })
            .collect(),
    );

    let info = bencode::DictBuilder::new()
        .insert("name", bencode::Value::str(package_name))
        .insert("piece length", bencode::Value::Int(piece_length as i64))
        .insert("pieces", bencode::Value::Bytes(pieces_concat))
        .insert("files", files_value)
        .build();

    let info_bytes = info.encode();
    let mut hasher = Sha1::new();
    hasher.update(&info_bytes);
    let info_hash_hex = hex::encode(hasher.finalize());

    let metainfo = bencode::DictBuilder::new()
        .insert("announce", bencode::Value::str(announce))
        .insert("info", info)
        .build();

    Ok(Descriptor {
        bencoded: metainfo.encode(),
        info_hash_hex,
        piece_length,
        total_pieces,
        piece_hashes,
        resumed_from_piece,
    })
}

/// Presents a package's files, in stable order, as one logical byte stream.
struct PackageStreamReader {
    files: Vec<DescriptorFile>,
    file_index: usize,
    current: Option<std::fs::File>,
}

impl PackageStreamReader {
    fn new(files: Vec<DescriptorFile>) -> Self {
        Self {
            files,
            file_index: 0,
            current: None,
        }
    }

    fn skip(&mut self, mut bytes: u64) -> Result<()> {
        while bytes > 0 && self.file_index < self.files.len() {
            let file = &self.files[self.file_index];
            if bytes >= file.length {
                bytes -= file.length;
                self.file_index += 1;
            } else {
                let mut f = std::fs::File::open(&file.absolute_path)?;
                std::io::Seek::seek(&mut f, std::io::SeekFrom::Start(bytes))?;
                self.current = Some(f);
                bytes = 0;
            }
        }
        Ok(())
    }

    fn read_piece(&mut self, piece_length: u64) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(piece_length as usize);
        while (out.len() as u64) < piece_length {
            if self.current.is_none() {
                if self.file_index >= self.files.len() {
                    break;
                }
                let path = &self.files[self.file_index].absolute_path;
                self.current = Some(std::fs::File::open(path)?);
            }
            let remaining = (piece_length - out.len() as u64) as usize;
            let mut buf = vec![0u8; remaining];
            let n = self.current.as_mut().unwrap().read(&mut buf)?;
            if n == 0 {
                self.current = None;
                self.file_index += 1;
                continue;
            }
            out.extend_from_slice(&buf[..n]);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use proptest::prelude::*;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct MemorySink {
        checkpoints: Mutex<HashMap<(Uuid, Uuid), BTreeMap<u32, [u8; 20]>>>,
    }

    #[async_trait]
    impl CheckpointSink for MemorySink {
        async fn load_checkpoints(
            &self,
            package_id: Uuid,
            server_id: Uuid,
        ) -> Result<BTreeMap<u32, [u8; 20]>> {
            Ok(self
                .checkpoints
                .lock()
                .await
                .get(&(package_id, server_id))
                .cloned()
                .unwrap_or_default())
        }

        async fn insert_checkpoint(
            &self,
            package_id: Uuid,
            server_id: Uuid,
            piece_index: u32,
            hash: [u8; 20],
        ) -> Result<()> {
            self.checkpoints
                .lock()
                .await
                .entry((package_id, server_id))
                .or_default()
                .insert(piece_index, hash);
            Ok(())
        }

        async fn update_progress(
            &self,
            _package_id: Uuid,
            _server_id: Uuid,
            _progress: BuildProgress,
        ) -> Result<()> {
            Ok(())
        }

        async fn clear_checkpoints(&self, package_id: Uuid, server_id: Uuid) -> Result<()> {
            self.checkpoints.lock().await.remove(&(package_id, server_id));
            Ok(())
        }
    }

    #[test]
    fn piece_length_clamps_at_the_extremes() {
        assert_eq!(piece_length_for(0), MIN_PIECE_LENGTH);
        assert_eq!(piece_length_for(u64::MAX), MAX_PIECE_LENGTH);
    }

    proptest! {
        /// For every power-of-two piece length the clamp allows, checks the
        /// four boundary cases around it: 0 bytes, 1 byte, the exact size at
        /// which `piece_length_for` should land on that length, and one byte
        /// past it (which should round up to the next power of two).
        #[test]
        fn piece_length_boundaries(exponent in 0u32..6) {
            let piece_len = MIN_PIECE_LENGTH << exponent;
            let boundary = piece_len * 1000;

            prop_assert_eq!(piece_length_for(0), MIN_PIECE_LENGTH);
            prop_assert_eq!(piece_length_for(1), MIN_PIECE_LENGTH);
            prop_assert_eq!(piece_length_for(boundary), piece_len.clamp(MIN_PIECE_LENGTH, MAX_PIECE_LENGTH));
            prop_assert_eq!(
                piece_length_for(boundary + 1),
                (piece_len * 2).clamp(MIN_PIECE_LENGTH, MAX_PIECE_LENGTH)
            );
        }

        /// Whatever size comes in, the result is always a power of two within
        /// the configured clamp.
        #[test]
        fn piece_length_is_always_a_clamped_power_of_two(total_size in any::<u64>()) {
            let len = piece_length_for(total_size);
            prop_assert!(len.is_power_of_two());
            prop_assert!(len >= MIN_PIECE_LENGTH);
            prop_assert!(len <= MAX_PIECE_LENGTH);
        }
    }

    #[tokio::test]
    async fn resumed_build_matches_fresh_build() {
        let dir = tempfile::tempdir().unwrap();
        let pkg = dir.path().join("PKG");
        std::fs::create_dir(&pkg).unwrap();
        // 10 MiB of deterministic content, piece length 1 MiB -> 10 pieces.
        let data: Vec<u8> = (0..10 * 1024 * 1024).map(|i| (i % 251) as u8).collect();
        std::fs::write(pkg.join("reel.mxf"), &data).unwrap();

        let package_id = Uuid::new_v4();
        let server_id = Uuid::new_v4();
        let cancel = AtomicBool::new(false);

        let fresh_sink = MemorySink::default();
        let fresh = build(
            &pkg,
            "PKG",
            package_id,
            server_id,
            "https://tracker.example/announce",
            &fresh_sink,
            &cancel,
        )
        .await
        .unwrap();
        assert_eq!(fresh.total_pieces, 10);
        assert!(fresh.resumed_from_piece.is_none());

        // Simulate a restart after piece 4: seed a fresh sink with
        // checkpoints 0..=4 and resume.
        let partial_sink = MemorySink::default();
        {
            let mut guard = partial_sink.checkpoints.lock().await;
            let mut seeded = BTreeMap::new();
            for i in 0..5u32 {
                seeded.insert(i, derive_piece_hash(&data, i, fresh.piece_length));
            }
            guard.insert((package_id, server_id), seeded);
        }

        let resumed = build(
            &pkg,
            "PKG",
            package_id,
            server_id,
            "https://tracker.example/announce",
            &partial_sink,
            &cancel,
        )
        .await
        .unwrap();

        assert_eq!(resumed.resumed_from_piece, Some(5));
        assert_eq!(resumed.info_hash_hex, fresh.info_hash_hex);
    }

    fn derive_piece_hash(data: &[u8], index: u32, piece_length: u64) -> [u8; 20] {
        let start = index as u64 * piece_length;
        let end = (start + piece_length).min(data.len() as u64);
        let mut hasher = Sha1::new();
        hasher.update(&data[start as usize..end as usize]);
        let digest = hasher.finalize();
        let mut hash = [0u8; 20];
        hash.copy_from_slice(&digest);
        hash
    }

    #[tokio::test]
    async fn cancellation_stops_without_clearing_checkpoints() {
        let dir = tempfile::tempdir().unwrap();
        let pkg = dir.path().join("PKG");
        std::fs::create_dir(&pkg).unwrap();
        std::fs::write(pkg.join("reel.mxf"), vec![7u8; 3 * 1024 * 1024]).unwrap();

        let sink = MemorySink::default();
        let cancel = AtomicBool::new(true);

        let result = build(
            &pkg,
            "PKG",
            Uuid::new_v4(),
            Uuid::new_v4(),
            "https://tracker.example/announce",
            &sink,
            &cancel,
        )
        .await;

        assert!(matches!(result, Err(CatalogError::Cancelled(_))));
    }
}
