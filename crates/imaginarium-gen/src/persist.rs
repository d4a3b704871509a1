//! Collision-safe persistence of decoded assets
//!
//! Artifacts land in a fixed output folder as loose image files and/or as
//! managed assets (a content-addressed copy plus a TOML sidecar). Both
//! destinations are independently toggleable. Naming derives from the
//! prompt; a check-then-write counter avoids overwriting earlier results
//! (single-writer assumption, the check is not atomic).

use image::{DynamicImage, RgbImage};
use imaginarium_core::{ContentHash, ImaginariumError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use uuid::Uuid;

use crate::pipeline::AssetBundle;

/// Default output folder for generated artifacts
pub const DEFAULT_ASSET_DIR: &str = "Blockade Labs SDK Assets";

/// Default root of the content-addressed store
pub const DEFAULT_STORE_ROOT: &str = ".imaginarium/assets";

/// How many leading prompt characters seed the artifact name
const PROMPT_NAME_LEN: usize = 20;

/// Base name used when the prompt sanitizes to nothing
const FALLBACK_BASE_NAME: &str = "untitled";

/// Output encoding for loose image files
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SaveFormat {
    #[default]
    Jpeg,
    Png,
}

impl SaveFormat {
    pub fn extension(self) -> &'static str {
        match self {
            SaveFormat::Jpeg => "jpg",
            SaveFormat::Png => "png",
        }
    }

    fn image_format(self) -> image::ImageFormat {
        match self {
            SaveFormat::Jpeg => image::ImageFormat::Jpeg,
            SaveFormat::Png => image::ImageFormat::Png,
        }
    }
}

/// Where and how artifacts are persisted. Flags are independent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveConfig {
    /// Register a content-addressed copy plus sidecar metadata
    pub save_as_assets: bool,
    /// Write loose image files into the output folder
    pub save_as_images: bool,
    pub format: SaveFormat,
    pub directory: PathBuf,
    pub store_root: PathBuf,
}

impl Default for SaveConfig {
    fn default() -> Self {
        Self {
            save_as_assets: true,
            save_as_images: true,
            format: SaveFormat::default(),
            directory: PathBuf::from(DEFAULT_ASSET_DIR),
            store_root: PathBuf::from(DEFAULT_STORE_ROOT),
        }
    }
}

/// Derive the artifact base name from a prompt.
///
/// First 20 characters, every character other than ASCII alphanumerics,
/// `-` and `_` replaced by `_`, runs collapsed, edges trimmed. An empty
/// result falls back to a fixed placeholder so naming is total.
pub fn sanitize_prompt_name(prompt: &str) -> String {
    let mut name = String::new();
    let mut last_was_underscore = false;

    for c in prompt.chars().take(PROMPT_NAME_LEN) {
        if c.is_ascii_alphanumeric() || c == '-' {
            name.push(c);
            last_was_underscore = false;
        } else if !last_was_underscore {
            name.push('_');
            last_was_underscore = true;
        }
    }

    let trimmed = name.trim_matches('_');
    if trimmed.is_empty() {
        FALLBACK_BASE_NAME.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Content-addressed file storage at `<root>/<first-2-hex>/<hash>.<ext>`
pub struct ContentStore {
    root: PathBuf,
}

impl ContentStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Store an encoded buffer, returning its hash. Storing bytes that are
    /// already present is a no-op (dedup).
    pub fn store_bytes(&self, bytes: &[u8], extension: &str) -> Result<ContentHash> {
        let hash = ContentHash::from_bytes(bytes);
        let dest = self.path_for(&hash, extension);
        if dest.exists() {
            return Ok(hash);
        }

        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&dest, bytes)?;
        Ok(hash)
    }

    pub fn contains(&self, hash: &ContentHash) -> bool {
        let hex = hash.to_hex();
        let dir = self.root.join(&hex[..2]);
        if !dir.exists() {
            return false;
        }
        std::fs::read_dir(&dir)
            .map(|entries| {
                entries
                    .flatten()
                    .any(|e| e.file_name().to_string_lossy().starts_with(&hex))
            })
            .unwrap_or(false)
    }

    fn path_for(&self, hash: &ContentHash, extension: &str) -> PathBuf {
        let hex = hash.to_hex();
        self.root
            .join(&hex[..2])
            .join(format!("{}.{}", hex, extension))
    }
}

/// Sidecar metadata written next to managed assets
#[derive(Debug, Serialize)]
struct AssetMeta {
    name: String,
    #[serde(rename = "type")]
    asset_type: String,
    hash: String,
    format: String,
    prompt: String,
}

#[derive(Serialize)]
struct Sidecar<'a> {
    asset: &'a AssetMeta,
}

/// Stores decoded asset bundles. Never fails the surrounding job; callers
/// treat errors as a local concern.
pub struct PersistenceSink {
    config: SaveConfig,
    stored: Mutex<HashSet<Uuid>>,
}

impl PersistenceSink {
    pub fn new(config: SaveConfig) -> Self {
        Self {
            config,
            stored: Mutex::new(HashSet::new()),
        }
    }

    pub fn config(&self) -> &SaveConfig {
        &self.config
    }

    /// Persist a bundle under a collision-free name.
    ///
    /// A bundle that was already persisted through this sink is skipped
    /// entirely; distinct bundles with identical content get fresh
    /// `_<n>`-suffixed names instead of overwriting.
    pub fn persist(&self, bundle: &AssetBundle) -> Result<()> {
        if !self.config.save_as_assets && !self.config.save_as_images {
            return Ok(());
        }

        if self.stored.lock().unwrap().contains(&bundle.id) {
            tracing::debug!(bundle_id = %bundle.id, "Bundle already stored, skipping");
            return Ok(());
        }

        let base = format!("{}_texture", sanitize_prompt_name(&bundle.prompt));
        let name = self.free_name(&base);

        let primary_bytes = encode_image(&bundle.primary, self.config.format)?;
        let depth_bytes = encode_image(&bundle.depth, self.config.format)?;

        if self.config.save_as_images {
            self.write_images(&name, &primary_bytes, &depth_bytes)?;
        }
        if self.config.save_as_assets {
            self.write_managed(&name, &bundle.prompt, &primary_bytes, &depth_bytes)?;
        }

        self.stored.lock().unwrap().insert(bundle.id);
        tracing::info!(name = %name, "Assets persisted");
        Ok(())
    }

    /// First `base`, then `base_1`, `base_2`, ... until no destination of
    /// any enabled mode is taken
    fn free_name(&self, base: &str) -> String {
        let mut counter = 0u32;
        loop {
            let candidate = if counter == 0 {
                base.to_string()
            } else {
                format!("{}_{}", base, counter)
            };
            if !self.candidate_taken(&candidate) {
                return candidate;
            }
            counter += 1;
        }
    }

    fn candidate_taken(&self, name: &str) -> bool {
        let ext = self.config.format.extension();
        if self.config.save_as_images {
            let image_path = self.config.directory.join(format!("{}.{}", name, ext));
            let depth_path = self.config.directory.join(format!("{}_depth.{}", name, ext));
            if image_path.exists() || depth_path.exists() {
                return true;
            }
        }
        if self.config.save_as_assets {
            let sidecar = self.config.directory.join(format!("{}.asset.toml", name));
            if sidecar.exists() {
                return true;
            }
        }
        false
    }

    fn write_images(&self, name: &str, primary: &[u8], depth: &[u8]) -> Result<()> {
        let ext = self.config.format.extension();
        std::fs::create_dir_all(&self.config.directory)?;
        std::fs::write(self.config.directory.join(format!("{}.{}", name, ext)), primary)?;
        std::fs::write(
            self.config.directory.join(format!("{}_depth.{}", name, ext)),
            depth,
        )?;
        Ok(())
    }

    fn write_managed(&self, name: &str, prompt: &str, primary: &[u8], depth: &[u8]) -> Result<()> {
        let ext = self.config.format.extension();
        let store = ContentStore::new(&self.config.store_root);
        let primary_hash = store.store_bytes(primary, ext)?;
        let depth_hash = store.store_bytes(depth, ext)?;

        std::fs::create_dir_all(&self.config.directory)?;
        self.write_sidecar(name, "texture", &primary_hash, prompt)?;
        self.write_sidecar(&format!("{}_depth", name), "depth", &depth_hash, prompt)?;
        Ok(())
    }

    fn write_sidecar(
        &self,
        name: &str,
        asset_type: &str,
        hash: &ContentHash,
        prompt: &str,
    ) -> Result<()> {
        let meta = AssetMeta {
            name: name.to_string(),
            asset_type: asset_type.to_string(),
            hash: hash.to_prefixed_hex(),
            format: self.config.format.extension().to_string(),
            prompt: prompt.to_string(),
        };
        let toml_str = toml::to_string_pretty(&Sidecar { asset: &meta })?;
        let path = self.config.directory.join(format!("{}.asset.toml", name));
        std::fs::write(path, toml_str)?;
        Ok(())
    }
}

fn encode_image(image: &RgbImage, format: SaveFormat) -> Result<Vec<u8>> {
    let mut cursor = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(image.clone())
        .write_to(&mut cursor, format.image_format())
        .map_err(|e| ImaginariumError::PersistenceError(format!("Failed to encode image: {}", e)))?;
    Ok(cursor.into_inner())
}
