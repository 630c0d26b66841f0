//! Firmware image sources.
//!
//! The update engine only needs the image bytes for a target before it
//! starts. Where they come from is up to an [`ImageProvider`]: a plain file
//! per target ([`FileImageProvider`]) or a firmware catalog
//! ([`catalog::CatalogImageProvider`]).

pub mod catalog;

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use log::debug;

use crate::error::{Error, Result};
use crate::protocol::{CHUNK_LEN, TargetType, packet_count};

pub use catalog::{Catalog, CatalogImageProvider};

/// Firmware bytes fetched for one target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareImage {
    /// Target the image is built for.
    pub target: TargetType,
    /// Raw image.
    pub bytes: Vec<u8>,
    /// Where the image was loaded from.
    pub source: PathBuf,
}

impl FirmwareImage {
    /// Read an image from `path`. Empty files are rejected.
    pub fn from_file<P: AsRef<Path>>(target: TargetType, path: P) -> Result<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(|e| {
            Error::ImageUnavailable(format!("{}: {e}", path.display()))
        })?;
        if bytes.is_empty() {
            return Err(Error::ImageUnavailable(format!(
                "{} is empty",
                path.display()
            )));
        }
        debug!(
            "Loaded {target} image {} ({} bytes, {} packets of {CHUNK_LEN})",
            path.display(),
            bytes.len(),
            packet_count(bytes.len())
        );

        Ok(Self {
            target,
            bytes,
            source: path.to_path_buf(),
        })
    }

    /// Image length in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the image has no bytes.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Fetches the firmware image for a target.
pub trait ImageProvider {
    /// Return the full image for `target`, or why it is unavailable.
    fn fetch(&mut self, target: TargetType) -> Result<FirmwareImage>;
}

/// One image file per target.
#[derive(Debug, Clone, Default)]
pub struct FileImageProvider {
    paths: HashMap<TargetType, PathBuf>,
}

impl FileImageProvider {
    /// Provider with no images configured.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `path` for `target`.
    #[must_use]
    pub fn with_image(mut self, target: TargetType, path: impl Into<PathBuf>) -> Self {
        self.paths.insert(target, path.into());
        self
    }
}

impl ImageProvider for FileImageProvider {
    fn fetch(&mut self, target: TargetType) -> Result<FirmwareImage> {
        let path = self.paths.get(&target).ok_or_else(|| {
            Error::ImageUnavailable(format!("no image configured for {target}"))
        })?;
        FirmwareImage::from_file(target, path)
    }
}
