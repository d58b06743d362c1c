//! Manifest Parser (C1)
//!
//! Parses the three DCP XML grammars — ASSETMAP, PKL, CPL — into typed
//! records. Tolerant by design: numeric fields that the schema declares as
//! integers sometimes arrive as decimals in the wild; unparseable values
//! degrade to 0 rather than aborting the whole document, and missing
//! optional elements default rather than error.

use serde::Deserialize;

use crate::error::{CatalogError, Result};

/// Strips a `urn:uuid:` prefix, if present, returning the bare UUID text.
pub fn strip_urn_uuid(id: &str) -> &str {
    id.strip_prefix("urn:uuid:").unwrap_or(id)
}

/// Truncates a numeric field that the schema expects as an integer but that
/// may arrive as a decimal (e.g. `IntrinsicDuration = "4.5"`). Unparseable
/// values degrade to 0 rather than failing the whole document.
pub fn parse_truncated_int(raw: &str) -> i64 {
    let raw = raw.trim();
    if let Ok(v) = raw.parse::<i64>() {
        return v;
    }
    match raw.parse::<f64>() {
        Ok(v) => v.trunc() as i64,
        Err(_) => 0,
    }
}

#[derive(Debug, Deserialize)]
struct RawAssetMap {
    #[serde(rename = "AssetList", default)]
    asset_list: RawAssetList,
}

#[derive(Debug, Deserialize, Default)]
struct RawAssetList {
    #[serde(rename = "Asset", default)]
    assets: Vec<RawAssetMapAsset>,
}

#[derive(Debug, Deserialize)]
struct RawAssetMapAsset {
    #[serde(rename = "Id")]
    id: String,
    #[serde(rename = "PackingList", default)]
    packing_list: bool,
    #[serde(rename = "ChunkList", default)]
    chunk_list: RawChunkList,
}

#[derive(Debug, Deserialize, Default)]
struct RawChunkList {
    #[serde(rename = "Chunk", default)]
    chunks: Vec<RawChunk>,
}

#[derive(Debug, Deserialize)]
struct RawChunk {
    #[serde(rename = "Path")]
    path: String,
    #[serde(rename = "VolumeIndex", default)]
    volume_index: Option<String>,
    #[serde(rename = "Offset", default)]
    offset: Option<String>,
    #[serde(rename = "Length", default)]
    length: Option<String>,
}

/// One chunk of an ASSETMAP asset: a file path plus its byte range.
#[derive(Debug, Clone)]
pub struct AssetMapChunk {
    pub path: String,
    pub volume_index: i64,
    pub offset: i64,
    pub length: i64,
}

/// One entry in an ASSETMAP, identified by a bare UUID.
#[derive(Debug, Clone)]
pub struct AssetMapEntry {
    pub uuid: String,
    pub is_packing_list: bool,
    pub chunks: Vec<AssetMapChunk>,
}

/// A fully parsed ASSETMAP.
#[derive(Debug, Clone, Default)]
pub struct AssetMap {
    pub assets: Vec<AssetMapEntry>,
}

impl AssetMap {
    pub fn parse(xml: &str) -> Result<Self> {
        let raw: RawAssetMap = quick_xml::de::from_str(xml).map_err(|e| CatalogError::MalformedManifest {
            path: "ASSETMAP".to_string(),
            reason: e.to_string(),
        })?;

        let assets = raw
            .asset_list
            .assets
            .into_iter()
            .map(|a| AssetMapEntry {
                uuid: strip_urn_uuid(&a.id).to_string(),
                is_packing_list: a.packing_list,
                chunks: a
                    .chunk_list
                    .chunks
                    .into_iter()
                    .map(|c| AssetMapChunk {
                        path: c.path,
                        volume_index: c
                            .volume_index
                            .map(|v| parse_truncated_int(&v))
                            .unwrap_or(1),
                        offset: c.offset.map(|v| parse_truncated_int(&v)).unwrap_or(0),
                        length: c.length.map(|v| parse_truncated_int(&v)).unwrap_or(0),
                    })
                    .collect(),
            })
            .collect();

        Ok(Self { assets })
    }

    /// Every asset marked `PackingList=true` — a fallback PKL location when
    /// filename conventions don't surface one.
    pub fn packing_list_candidates(&self) -> impl Iterator<Item = &AssetMapEntry> {
        self.assets.iter().filter(|a| a.is_packing_list)
    }
}

#[derive(Debug, Deserialize)]
struct RawPkl {
    #[serde(rename = "AnnotationText", default)]
    annotation: Option<String>,
    #[serde(rename = "IssueDate", default)]
    issue_date: Option<String>,
    #[serde(rename = "Issuer", default)]
    issuer: Option<String>,
    #[serde(rename = "Creator", default)]
    creator: Option<String>,
    #[serde(rename = "AssetList", default)]
    asset_list: RawPklAssetList,
}

#[derive(Debug, Deserialize, Default)]
struct RawPklAssetList {
    #[serde(rename = "Asset", default)]
    assets: Vec<RawPklAsset>,
}

#[derive(Debug, Deserialize)]
struct RawPklAsset {
    #[serde(rename = "Id")]
    id: String,
    #[serde(rename = "Hash", default)]
    hash: Option<String>,
    #[serde(rename = "Size", default)]
    size: Option<String>,
    #[serde(rename = "Type", default)]
    kind: Option<String>,
}

/// One entry in a Packing List: a SHA-1 hash (decoded from base64), a size,
/// and a MIME-ish type string.
#[derive(Debug, Clone)]
pub struct PackingListAsset {
    pub uuid: String,
    pub sha1_hex: Option<String>,
    pub size: i64,
    pub kind: String,
}

/// A fully parsed Packing List (PKL).
#[derive(Debug, Clone, Default)]
pub struct PackingList {
    pub annotation: Option<String>,
    pub issue_date: Option<String>,
    pub issuer: Option<String>,
    pub creator: Option<String>,
    pub assets: Vec<PackingListAsset>,
}

impl PackingList {
    pub fn parse(xml: &str) -> Result<Self> {
        let raw: RawPkl = quick_xml::de::from_str(xml).map_err(|e| CatalogError::MalformedManifest {
            path: "PKL".to_string(),
            reason: e.to_string(),
        })?;

        let assets = raw
            .asset_list
            .assets
            .into_iter()
            .map(|a| PackingListAsset {
                uuid: strip_urn_uuid(&a.id).to_string(),
                sha1_hex: a.hash.and_then(|h| {
                    base64::Engine::decode(&base64::engine::general_purpose::STANDARD, h)
                        .ok()
                        .map(hex::encode)
                }),
                size: a.size.map(|v| parse_truncated_int(&v)).unwrap_or(0),
                kind: a.kind.unwrap_or_default(),
            })
            .collect();

        Ok(Self {
            annotation: raw.annotation,
            issue_date: raw.issue_date,
            issuer: raw.issuer,
            creator: raw.creator,
            assets,
        })
    }
}

#[derive(Debug, Deserialize)]
struct RawCpl {
    #[serde(rename = "Id")]
    id: String,
    #[serde(rename = "ContentTitleText", default)]
    content_title_text: Option<String>,
    #[serde(rename = "ContentKind", default)]
    content_kind: Option<String>,
    #[serde(rename = "ReelList", default)]
    reel_list: RawReelList,
}

#[derive(Debug, Deserialize, Default)]
struct RawReelList {
    #[serde(rename = "Reel", default)]
    reels: Vec<RawReel>,
}

#[derive(Debug, Deserialize)]
struct RawReel {
    #[serde(rename = "Id")]
    id: String,
    #[serde(rename = "AssetList", default)]
    asset_list: RawReelAssetList,
}

#[derive(Debug, Deserialize, Default)]
struct RawReelAssetList {
    #[serde(rename = "MainPicture", default)]
    main_picture: Option<RawReelAsset>,
    #[serde(rename = "MainSound", default)]
    main_sound: Option<RawReelAsset>,
    #[serde(rename = "MainSubtitle", default)]
    main_subtitle: Option<RawReelAsset>,
    #[serde(rename = "CompositionMetadataAsset", default)]
    composition_metadata: Option<RawCompositionMetadata>,
}

#[derive(Debug, Deserialize)]
struct RawReelAsset {
    #[serde(rename = "Id")]
    id: String,
    #[serde(rename = "IntrinsicDuration", default)]
    intrinsic_duration: Option<String>,
    #[serde(rename = "Hash", default)]
    hash: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct RawCompositionMetadata {
    #[serde(rename = "FullContentTitleText", default)]
    full_content_title_text: Option<String>,
    #[serde(rename = "ReleaseTerritory", default)]
    release_territory: Option<String>,
    #[serde(rename = "Distributor", default)]
    distributor: Option<String>,
    #[serde(rename = "Facility", default)]
    facility: Option<String>,
    #[serde(rename = "MainPictureStoredMaximumLuminance", default)]
    luminance: Option<String>,
    #[serde(rename = "MainSoundConfiguration", default)]
    sound_configuration: Option<String>,
    #[serde(rename = "MainPictureStoredResolution", default)]
    resolution: Option<String>,
}

/// A reel's referenced assets. Any of the three may be absent.
#[derive(Debug, Clone, Default)]
pub struct ReelAssets {
    pub main_picture: Option<ReelAssetRef>,
    pub main_sound: Option<ReelAssetRef>,
    pub main_subtitle: Option<ReelAssetRef>,
}

#[derive(Debug, Clone)]
pub struct ReelAssetRef {
    pub uuid: String,
    pub intrinsic_duration: i64,
    pub hash_sha1_hex: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CplReel {
    pub uuid: String,
    pub assets: ReelAssets,
}

/// Optional content metadata carried on the first reel's
/// `CompositionMetadataAsset`.
#[derive(Debug, Clone, Default)]
pub struct CompositionMetadata {
    pub full_content_title_text: Option<String>,
    pub release_territory: Option<String>,
    pub distributor: Option<String>,
    pub facility: Option<String>,
    pub luminance: Option<String>,
    pub sound_configuration: Option<String>,
    pub resolution: Option<String>,
}

/// A fully parsed Composition Playlist (CPL).
#[derive(Debug, Clone)]
pub struct CompositionPlaylist {
    pub uuid: String,
    pub content_title_text: String,
    pub content_kind: String,
    pub reels: Vec<CplReel>,
    pub composition_metadata: Option<CompositionMetadata>,
}

impl CompositionPlaylist {
    pub fn parse(xml: &str) -> Result<Self> {
        let raw: RawCpl = quick_xml::de::from_str(xml).map_err(|e| CatalogError::MalformedManifest {
            path: "CPL".to_string(),
            reason: e.to_string(),
        })?;

        let mut composition_metadata = None;
        let reels = raw
            .reel_list
            .reels
            .into_iter()
            .map(|r| {
                if composition_metadata.is_none() {
                    if let Some(cm) = &r.asset_list.composition_metadata {
                        composition_metadata = Some(CompositionMetadata {
                            full_content_title_text: cm.full_content_title_text.clone(),
                            release_territory: cm.release_territory.clone(),
                            distributor: cm.distributor.clone(),
                            facility: cm.facility.clone(),
                            luminance: cm.luminance.clone(),
                            sound_configuration: cm.sound_configuration.clone(),
                            resolution: cm.resolution.clone(),
                        });
                    }
                }

                CplReel {
                    uuid: strip_urn_uuid(&r.id).to_string(),
                    assets: ReelAssets {
                        main_picture: r.asset_list.main_picture.as_ref().map(to_reel_asset_ref),
                        main_sound: r.asset_list.main_sound.as_ref().map(to_reel_asset_ref),
                        main_subtitle: r.asset_list.main_subtitle.as_ref().map(to_reel_asset_ref),
                    },
                }
            })
            .collect();

        Ok(Self {
            uuid: strip_urn_uuid(&raw.id).to_string(),
            content_title_text: raw.content_title_text.unwrap_or_default(),
            content_kind: raw.content_kind.unwrap_or_default(),
            reels,
            composition_metadata,
        })
    }
}

fn to_reel_asset_ref(a: &RawReelAsset) -> ReelAssetRef {
    ReelAssetRef {
        uuid: strip_urn_uuid(&a.id).to_string(),
        intrinsic_duration: a
            .intrinsic_duration
            .as_deref()
            .map(parse_truncated_int)
            .unwrap_or(0),
        hash_sha1_hex: a.hash.as_ref().and_then(|h| {
            base64::Engine::decode(&base64::engine::general_purpose::STANDARD, h)
                .ok()
                .map(hex::encode)
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncates_decimal_duration() {
        assert_eq!(parse_truncated_int("4.5"), 4);
        assert_eq!(parse_truncated_int("4"), 4);
        assert_eq!(parse_truncated_int("not-a-number"), 0);
    }

    #[test]
    fn strips_urn_prefix() {
        assert_eq!(strip_urn_uuid("urn:uuid:abc-123"), "abc-123");
        assert_eq!(strip_urn_uuid("abc-123"), "abc-123");
    }

    #[test]
    fn parses_assetmap() {
        let xml = r#"<?xml version="1.0"?>
<AssetMap xmlns="http://www.smpte-ra.org/schemas/429-9/2007/AM">
  <AssetList>
    <Asset>
      <Id>urn:uuid:11111111-1111-1111-1111-111111111111</Id>
      <PackingList>true</PackingList>
      <ChunkList>
        <Chunk>
          <Path>PKL_x.xml</Path>
          <VolumeIndex>1</VolumeIndex>
          <Offset>0</Offset>
          <Length>1024</Length>
        </Chunk>
      </ChunkList>
    </Asset>
  </AssetList>
</AssetMap>"#;
        let am = AssetMap::parse(xml).unwrap();
        assert_eq!(am.assets.len(), 1);
        assert!(am.assets[0].is_packing_list);
        assert_eq!(am.assets[0].chunks[0].length, 1024);
    }

    #[test]
    fn cpl_truncates_fractional_duration() {
        let xml = r#"<?xml version="1.0"?>
<CompositionPlaylist xmlns="http://www.smpte-ra.org/schemas/429-7/2006/CPL">
  <Id>urn:uuid:22222222-2222-2222-2222-222222222222</Id>
  <ContentTitleText>TEST_FEATURE</ContentTitleText>
  <ContentKind>feature</ContentKind>
  <ReelList>
    <Reel>
      <Id>urn:uuid:33333333-3333-3333-3333-333333333333</Id>
      <AssetList>
        <MainPicture>
          <Id>urn:uuid:44444444-4444-4444-4444-444444444444</Id>
          <IntrinsicDuration>4.5</IntrinsicDuration>
        </MainPicture>
      </AssetList>
    </Reel>
  </ReelList>
</CompositionPlaylist>"#;
        let cpl = CompositionPlaylist::parse(xml).unwrap();
        assert_eq!(cpl.reels[0].assets.main_picture.as_ref().unwrap().intrinsic_duration, 4);
    }
}
