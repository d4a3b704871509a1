//! Asset materialization: fetch, decode, and bundle a completed job's images

use image::imageops::FilterType;
use image::RgbImage;
use imaginarium_core::{ImaginariumError, Result};
use uuid::Uuid;

use crate::api::FetchService;
use crate::job::{JobContext, Stage};

/// Edge length of the decoded primary and depth images
pub const RESULT_SIZE: u32 = 512;

/// Edge length of the derived preview image
pub const PREVIEW_SIZE: u32 = 128;

/// The decoded output of one completed job.
///
/// Owned by the pipeline until handed to persistence and the observer;
/// buffers are released when the bundle is dropped.
#[derive(Debug, Clone)]
pub struct AssetBundle {
    /// Identity used to skip re-persisting an already-stored bundle
    pub id: Uuid,
    pub primary: RgbImage,
    pub depth: RgbImage,
    pub preview: RgbImage,
    pub prompt: String,
}

/// Derive the depth-map URL from the primary image URL.
///
/// Reproduces the upstream convention of swapping the `images/` path
/// segment for `depths/`. A URL without that segment comes back unchanged,
/// so the depth fetch degenerates to re-fetching the primary. Fragile, but
/// kept for compatibility; swap this function out for a stricter transform
/// if the convention changes.
pub fn derive_depth_url(texture_url: &str) -> String {
    texture_url.replace("images/", "depths/")
}

/// Decode bytes into a fixed-size square RGB image.
///
/// Undecodable bytes are a fatal error; a blank placeholder is never
/// produced.
pub fn decode_square(bytes: &[u8], size: u32) -> Result<RgbImage> {
    let image = image::load_from_memory(bytes)
        .map_err(|e| ImaginariumError::DecodeError(format!("Not a decodable image: {}", e)))?;
    Ok(image.resize_exact(size, size, FilterType::Triangle).to_rgb8())
}

/// Fetch and decode the primary and depth images of a completed job.
///
/// Progress reaches `Downloaded` (80) once both full-size images are
/// decoded; the preview is derived afterwards from the same primary bytes.
pub async fn materialize(
    fetch: &dyn FetchService,
    ctx: &JobContext,
    texture_url: &str,
    prompt: &str,
) -> Result<AssetBundle> {
    let primary_bytes = fetch.fetch(texture_url).await?;

    let depth_url = derive_depth_url(texture_url);
    let depth_bytes = fetch.fetch(&depth_url).await?;

    let primary = decode_square(&primary_bytes, RESULT_SIZE)?;
    let depth = decode_square(&depth_bytes, RESULT_SIZE)?;
    ctx.set_stage(Stage::Downloaded);

    let preview = decode_square(&primary_bytes, PREVIEW_SIZE)?;

    tracing::debug!(url = %texture_url, depth_url = %depth_url, "Assets materialized");

    Ok(AssetBundle {
        id: Uuid::new_v4(),
        primary,
        depth,
        preview,
        prompt: prompt.to_string(),
    })
}
