//! Turns one discovered package root into catalog rows: parse its ASSETMAP,
//! PKL and CPLs, then upsert package/composition/reel/asset records.

use std::path::Path;

use catalog::store::{NewAsset, NewComposition, NewReel};
use catalog::{discovery::PackageRoot, AssetMap, CatalogStore, CompositionPlaylist, PackingList};

#[derive(Debug, Default)]
pub struct IngestOutcome {
    pub added: i64,
    pub updated: i64,
    pub errors: i64,
}

pub async fn ingest_package(store: &CatalogStore, pkg: &PackageRoot) -> IngestOutcome {
    let mut outcome = IngestOutcome::default();
    if let Err(err) = ingest_package_inner(store, pkg).await {
        tracing::warn!(root = %pkg.root.display(), error = %err, "failed to ingest package");
        outcome.errors += 1;
        return outcome;
    }
    outcome.added += 1;
    outcome
}

async fn ingest_package_inner(store: &CatalogStore, pkg: &PackageRoot) -> catalog::Result<()> {
    let assetmap_xml = read_to_string(&pkg.assetmap_path)?;
    let assetmap = AssetMap::parse(&assetmap_xml)?;

    let pkl_path = pkg
        .pkl_paths
        .first()
        .cloned()
        .or_else(|| resolve_chunk_path(pkg, assetmap.packing_list_candidates().next().map(|e| e.uuid.as_str())));

    let pkl = match &pkl_path {
        Some(path) => Some(PackingList::parse(&read_to_string(path)?)?),
        None => None,
    };

    let mut cpls = Vec::new();
    for cpl_path in &pkg.cpl_paths {
        let xml = read_to_string(cpl_path)?;
        cpls.push(CompositionPlaylist::parse(&xml)?);
    }

    let cpl_uuids: Vec<String> = cpls.iter().map(|c| c.uuid.clone()).collect();
    let assetmap_uuid = assetmap
        .packing_list_candidates()
        .next()
        .map(|e| e.uuid.clone())
        .or_else(|| cpl_uuids.first().cloned())
        .unwrap_or_else(|| pkg.root.to_string_lossy().to_string());

    let package_name = pkg
        .root
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| pkg.root.to_string_lossy().to_string());

    let first_cpl = cpls.first();
    let package = store
        .find_or_create_package(
            &assetmap_uuid,
            &cpl_uuids,
            &package_name,
            first_cpl.map(|c| c.content_title_text.as_str()),
            first_cpl.map(|c| c.content_kind.as_str()),
            pkg.total_size_bytes as i64,
            pkg.file_count as i64,
        )
        .await?;

    for cpl in &cpls {
        let composition = NewComposition {
            cpl_uuid: cpl.uuid.clone(),
            reel_count: cpl.reels.len() as i32,
            frame_rate: None,
            resolution: cpl
                .composition_metadata
                .as_ref()
                .and_then(|m| m.resolution.clone()),
            sound_config: cpl
                .composition_metadata
                .as_ref()
                .and_then(|m| m.sound_configuration.clone()),
        };
        let composition_id = store.insert_composition(package.id, &composition).await?;

        for reel in &cpl.reels {
            let new_reel = NewReel {
                reel_uuid: reel.uuid.clone(),
                picture_asset_uuid: reel.assets.main_picture.as_ref().map(|a| a.uuid.clone()),
                sound_asset_uuid: reel.assets.main_sound.as_ref().map(|a| a.uuid.clone()),
                subtitle_asset_uuid: reel.assets.main_subtitle.as_ref().map(|a| a.uuid.clone()),
                duration: reel
                    .assets
                    .main_picture
                    .as_ref()
                    .map(|a| a.intrinsic_duration)
                    .unwrap_or(0),
                picture_hash: reel.assets.main_picture.as_ref().and_then(|a| a.hash_sha1_hex.clone()),
            };
            store.insert_reel(composition_id, &new_reel).await?;
        }
    }

    if let Some(pkl) = &pkl {
        for asset in &pkl.assets {
            let file_path = resolve_chunk_path(pkg, Some(&asset.uuid))
                .map(|p| p.to_string_lossy().to_string())
                .unwrap_or_default();
            let new_asset = NewAsset {
                asset_uuid: asset.uuid.clone(),
                file_path,
                size_bytes: asset.size,
                sha1_hex: asset.sha1_hex.clone(),
            };
            store.insert_asset(package.id, &new_asset).await?;
        }
    }

    Ok(())
}

/// Looks up the chunk path for an ASSETMAP-referenced asset UUID, resolved
/// relative to the package root (ASSETMAP chunk paths are package-relative).
fn resolve_chunk_path(pkg: &PackageRoot, uuid: Option<&str>) -> Option<std::path::PathBuf> {
    let uuid = uuid?;
    let assetmap_xml = read_to_string(&pkg.assetmap_path).ok()?;
    let assetmap = AssetMap::parse(&assetmap_xml).ok()?;
    let entry = assetmap.assets.iter().find(|a| a.uuid == uuid)?;
    let chunk = entry.chunks.first()?;
    Some(pkg.root.join(&chunk.path))
}

fn read_to_string(path: &Path) -> catalog::Result<String> {
    Ok(std::fs::read_to_string(path)?)
}
