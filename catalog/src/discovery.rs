//! Discovery Scanner (C2)
//!
//! Walks a root directory tree looking for DCP package roots — any directory
//! containing a file whose upper-cased name is exactly `ASSETMAP` or
//! `ASSETMAP.XML`. CPL and PKL files are located by filename convention, with
//! an ASSETMAP-driven fallback for non-conforming packages. Size and file
//! count come from a second, package-scoped walk; inaccessible files are
//! skipped rather than failing the whole scan.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::warn;
use walkdir::WalkDir;

use crate::manifest::AssetMap;

/// One discovered package root and the manifest files found within it.
#[derive(Debug, Clone)]
pub struct PackageRoot {
    pub root: PathBuf,
    pub assetmap_path: PathBuf,
    pub pkl_paths: Vec<PathBuf>,
    pub cpl_paths: Vec<PathBuf>,
    pub total_size_bytes: u64,
    pub file_count: u64,
}

fn is_assetmap_name(name: &str) -> bool {
    let upper = name.to_uppercase();
    upper == "ASSETMAP" || upper == "ASSETMAP.XML"
}

fn is_pkl_name(name: &str) -> bool {
    let upper = name.to_uppercase();
    upper == "PKL.XML" || (upper.starts_with("PKL_") && upper.ends_with(".XML"))
}

fn is_cpl_name(name: &str) -> bool {
    let upper = name.to_uppercase();
    upper == "CPL.XML" || (upper.starts_with("CPL_") && upper.ends_with(".XML"))
}

/// Walks `scan_root` and returns every package root found beneath it.
///
/// Directories containing both `ASSETMAP` and `ASSETMAP.XML` are deduped —
/// only counted once, keyed by directory path.
pub fn discover_packages(scan_root: &Path) -> Vec<PackageRoot> {
    let mut assetmap_by_dir: BTreeMap<PathBuf, PathBuf> = BTreeMap::new();
    let mut siblings_by_dir: BTreeMap<PathBuf, Vec<PathBuf>> = BTreeMap::new();

    for entry in WalkDir::new(scan_root).into_iter().filter_map(|e| match e {
        Ok(entry) => Some(entry),
        Err(err) => {
            warn!("discovery: skipping unreadable entry: {err}");
            None
        }
    }) {
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(dir) = entry.path().parent() else {
            continue;
        };
        let Some(name) = entry.file_name().to_str() else {
            continue;
        };

        if is_assetmap_name(name) {
            // First ASSETMAP form wins the slot; both forms in one directory
            // still dedupe to a single package root.
            assetmap_by_dir
                .entry(dir.to_path_buf())
                .or_insert_with(|| entry.path().to_path_buf());
        }
        siblings_by_dir
            .entry(dir.to_path_buf())
            .or_default()
            .push(entry.path().to_path_buf());
    }

    assetmap_by_dir
        .into_iter()
        .map(|(dir, assetmap_path)| {
            let siblings = siblings_by_dir.remove(&dir).unwrap_or_default();
            build_package_root(dir, assetmap_path, siblings)
        })
        .collect()
}

fn build_package_root(root: PathBuf, assetmap_path: PathBuf, siblings: Vec<PathBuf>) -> PackageRoot {
    let mut pkl_paths = Vec::new();
    let mut cpl_paths = Vec::new();

    for path in &siblings {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if is_assetmap_name(name) {
            continue;
        }
        if is_pkl_name(name) {
            pkl_paths.push(path.clone());
        } else if is_cpl_name(name) {
            cpl_paths.push(path.clone());
        }
    }

    // ASSETMAP-driven fallback: entries marked PackingList=true are PKL
    // locations; any other top-level non-ASSETMAP, non-PKL .xml referenced
    // in ASSETMAP is a CPL candidate.
    if let Ok(xml) = std::fs::read_to_string(&assetmap_path) {
        if let Ok(assetmap) = AssetMap::parse(&xml) {
            for entry in assetmap.packing_list_candidates() {
                for chunk in &entry.chunks {
                    let candidate = root.join(&chunk.path);
                    if candidate.is_file() && !pkl_paths.contains(&candidate) {
                        pkl_paths.push(candidate);
                    }
                }
            }
            if cpl_paths.is_empty() {
                for entry in &assetmap.assets {
                    if entry.is_packing_list {
                        continue;
                    }
                    for chunk in &entry.chunks {
                        if !chunk.path.to_uppercase().ends_with(".XML") {
                            continue;
                        }
                        let candidate = root.join(&chunk.path);
                        if !candidate.is_file() || pkl_paths.contains(&candidate) {
                            continue;
                        }
                        let name = candidate
                            .file_name()
                            .and_then(|n| n.to_str())
                            .unwrap_or_default();
                        if is_assetmap_name(name) {
                            continue;
                        }
                        cpl_paths.push(candidate);
                    }
                }
            }
        }
    }

    let (total_size_bytes, file_count) = measure_package(&root);

    PackageRoot {
        root,
        assetmap_path,
        pkl_paths,
        cpl_paths,
        total_size_bytes,
        file_count,
    }
}

/// A second walk computing size and file count. Files that can't be stat'd
/// (permission denied, vanished mid-walk) are skipped silently.
fn measure_package(root: &Path) -> (u64, u64) {
    let mut total_size_bytes = 0u64;
    let mut file_count = 0u64;

    for entry in WalkDir::new(root).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        match entry.metadata() {
            Ok(meta) => {
                total_size_bytes += meta.len();
                file_count += 1;
            }
            Err(err) => {
                warn!("discovery: skipping unreadable file {:?}: {err}", entry.path());
            }
        }
    }

    (total_size_bytes, file_count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn finds_single_package_with_one_mxf() {
        let dir = tempfile::tempdir().unwrap();
        let pkg = dir.path().join("TEST");
        fs::create_dir(&pkg).unwrap();

        let assetmap = r#"<?xml version="1.0"?>
<AssetMap xmlns="http://www.smpte-ra.org/schemas/429-9/2007/AM">
  <AssetList>
    <Asset>
      <Id>urn:uuid:11111111-1111-1111-1111-111111111111</Id>
      <PackingList>true</PackingList>
      <ChunkList><Chunk><Path>PKL_x.xml</Path></Chunk></ChunkList>
    </Asset>
    <Asset>
      <Id>urn:uuid:22222222-2222-2222-2222-222222222222</Id>
      <PackingList>false</PackingList>
      <ChunkList><Chunk><Path>CPL_x.xml</Path></Chunk></ChunkList>
    </Asset>
    <Asset>
      <Id>urn:uuid:33333333-3333-3333-3333-333333333333</Id>
      <PackingList>false</PackingList>
      <ChunkList><Chunk><Path>reel1.mxf</Path></Chunk></ChunkList>
    </Asset>
  </AssetList>
</AssetMap>"#;
        let pkl_body: &[u8] = b"<PackingList/>";
        let cpl_body: &[u8] = b"<CompositionPlaylist/>";
        let mxf_body = vec![0u8; 1_048_576];
        fs::write(pkg.join("ASSETMAP.xml"), assetmap).unwrap();
        fs::write(pkg.join("PKL_x.xml"), pkl_body).unwrap();
        fs::write(pkg.join("CPL_x.xml"), cpl_body).unwrap();
        fs::write(pkg.join("reel1.mxf"), &mxf_body).unwrap();

        let expected_size =
            assetmap.len() as u64 + pkl_body.len() as u64 + cpl_body.len() as u64 + mxf_body.len() as u64;

        let roots = discover_packages(dir.path());
        assert_eq!(roots.len(), 1);
        assert_eq!(roots[0].total_size_bytes, expected_size);
        assert_eq!(roots[0].file_count, 4);
        assert_eq!(roots[0].pkl_paths.len(), 1);
        assert_eq!(roots[0].cpl_paths.len(), 1);
    }

    #[test]
    fn dedupes_assetmap_and_assetmap_xml_forms() {
        let dir = tempfile::tempdir().unwrap();
        let pkg = dir.path().join("TEST2");
        fs::create_dir(&pkg).unwrap();
        fs::write(pkg.join("ASSETMAP"), b"<AssetMap/>").unwrap();
        fs::write(pkg.join("ASSETMAP.XML"), b"<AssetMap/>").unwrap();

        let roots = discover_packages(dir.path());
        assert_eq!(roots.len(), 1);
    }
}
