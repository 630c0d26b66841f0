//! Firmware catalog.
//!
//! A catalog is a JSON list of manufacturers, each with hardware revisions,
//! each listing one image per controller type:
//!
//! ```json
//! [
//!   {
//!     "name": "megarevo",
//!     "hardware": [
//!       {
//!         "hardware_version": "2.0.0",
//!         "types": [
//!           { "name": "stm32app_inverter", "url": "arm/2.22.0.bin" },
//!           { "name": "tms320app_inverter", "url": "dsp/3.45.0.bin" }
//!         ]
//!       }
//!     ]
//!   }
//! ]
//! ```
//!
//! Resolution picks the inverter manufacturer, then the highest hardware
//! version, then the image for the requested target. Relative image
//! locations are resolved against the catalog's directory.

use std::cmp::Ordering;
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info};
use serde::{Deserialize, Serialize};

use super::{FirmwareImage, ImageProvider};
use crate::error::{Error, Result};
use crate::protocol::TargetType;

/// Manufacturer whose inverters this tool updates.
pub const INVERTER_MANUFACTURER: &str = "megarevo";

/// A catalog image entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageEntry {
    /// Image type, e.g. `stm32app_inverter`.
    pub name: String,
    /// Image location.
    pub url: String,
}

/// One hardware revision and its images.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hardware {
    /// Dotted version string.
    pub hardware_version: String,
    /// Images available for this revision.
    #[serde(default)]
    pub types: Vec<ImageEntry>,
}

/// A manufacturer and its hardware revisions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manufacturer {
    /// Manufacturer name.
    pub name: String,
    /// Known hardware revisions.
    #[serde(default)]
    pub hardware: Vec<Hardware>,
}

/// Parsed firmware catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Catalog {
    manufacturers: Vec<Manufacturer>,
    base_dir: PathBuf,
}

impl Catalog {
    /// Parse a catalog; relative image paths resolve against `base_dir`.
    pub fn from_json(json: &str, base_dir: impl Into<PathBuf>) -> Result<Self> {
        let manufacturers: Vec<Manufacturer> = serde_json::from_str(json)
            .map_err(|e| Error::Catalog(format!("invalid catalog: {e}")))?;
        if manufacturers.is_empty() {
            return Err(Error::Catalog("firmware catalog is empty".into()));
        }
        Ok(Self {
            manufacturers,
            base_dir: base_dir.into(),
        })
    }

    /// Load a catalog file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path)
            .map_err(|e| Error::Catalog(format!("{}: {e}", path.display())))?;
        let base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        Self::from_json(&json, base_dir)
    }

    /// All manufacturers in the catalog.
    pub fn manufacturers(&self) -> &[Manufacturer] {
        &self.manufacturers
    }

    /// Latest hardware revision of the inverter manufacturer.
    pub fn latest_hardware(&self) -> Result<&Hardware> {
        self.manufacturers
            .iter()
            .find(|m| m.name == INVERTER_MANUFACTURER)
            .and_then(|m| {
                m.hardware
                    .iter()
                    .max_by(|a, b| compare_versions(&a.hardware_version, &b.hardware_version))
            })
            .ok_or_else(|| Error::Catalog("no inverter hardware found in catalog".into()))
    }

    /// Location of the image for `target` on the latest hardware.
    pub fn resolve(&self, target: TargetType) -> Result<PathBuf> {
        let hardware = self.latest_hardware()?;
        let entry = hardware
            .types
            .iter()
            .find(|t| t.name == target.catalog_type())
            .ok_or_else(|| {
                Error::Catalog(format!(
                    "no {} image for hardware {}",
                    target.catalog_type(),
                    hardware.hardware_version
                ))
            })?;
        debug!(
            "Catalog: hardware {} -> {}",
            hardware.hardware_version, entry.url
        );

        let location = Path::new(&entry.url);
        Ok(if location.is_absolute() {
            location.to_path_buf()
        } else {
            self.base_dir.join(location)
        })
    }
}

/// Compare dotted numeric versions; missing or non-numeric parts count as 0.
fn compare_versions(a: &str, b: &str) -> Ordering {
    let parse = |v: &str| -> Vec<u64> {
        v.trim_start_matches('v')
            .split(['.', '-', '+'])
            .take(3)
            .map(|part| part.parse().unwrap_or(0))
            .collect()
    };
    let (a, b) = (parse(a), parse(b));
    (0..a.len().max(b.len()))
        .map(|i| {
            let x = a.get(i).copied().unwrap_or(0);
            let y = b.get(i).copied().unwrap_or(0);
            x.cmp(&y)
        })
        .find(|o| o.is_ne())
        .unwrap_or(Ordering::Equal)
}

/// Image provider backed by a catalog.
#[derive(Debug, Clone)]
pub struct CatalogImageProvider {
    catalog: Catalog,
}

impl CatalogImageProvider {
    /// Wrap `catalog`.
    pub fn new(catalog: Catalog) -> Self {
        Self { catalog }
    }
}

impl ImageProvider for CatalogImageProvider {
    fn fetch(&mut self, target: TargetType) -> Result<FirmwareImage> {
        let path = self.catalog.resolve(target)?;
        info!("Using {target} image {}", path.display());
        FirmwareImage::from_file(target, path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CATALOG: &str = r#"[
        {"name": "other", "hardware": [
            {"hardware_version": "9.0.0", "types": [{"name": "stm32app_inverter", "url": "other.bin"}]}
        ]},
        {"name": "megarevo", "hardware": [
            {"hardware_version": "1.10.0", "types": [
                {"name": "stm32app_inverter", "url": "arm-new.bin"},
                {"name": "tms320app_inverter", "url": "/abs/dsp.bin"}
            ]},
            {"hardware_version": "1.9.3", "types": [
                {"name": "stm32app_inverter", "url": "arm-old.bin"}
            ]}
        ]}
    ]"#;

    #[test]
    fn test_version_compare_is_numeric() {
        assert_eq!(compare_versions("1.10.0", "1.9.3"), Ordering::Greater);
        assert_eq!(compare_versions("2.0", "2.0.0"), Ordering::Equal);
        assert_eq!(compare_versions("v3.1.0", "3.0.9"), Ordering::Greater);
        assert_eq!(compare_versions("1.0.0", "1.0.1"), Ordering::Less);
    }

    #[test]
    fn test_resolve_picks_latest_hardware() {
        let catalog = Catalog::from_json(CATALOG, "/srv/fw").unwrap();
        assert_eq!(catalog.latest_hardware().unwrap().hardware_version, "1.10.0");
        assert_eq!(
            catalog.resolve(TargetType::Arm).unwrap(),
            PathBuf::from("/srv/fw/arm-new.bin")
        );
        assert_eq!(
            catalog.resolve(TargetType::Dsp).unwrap(),
            PathBuf::from("/abs/dsp.bin")
        );
    }

    #[test]
    fn test_missing_entries() {
        assert!(matches!(
            Catalog::from_json("[]", "."),
            Err(Error::Catalog(_))
        ));

        let no_inverter = r#"[{"name": "other", "hardware": []}]"#;
        let catalog = Catalog::from_json(no_inverter, ".").unwrap();
        assert!(catalog.resolve(TargetType::Arm).is_err());

        let no_dsp = r#"[{"name": "megarevo", "hardware": [
            {"hardware_version": "1.0.0", "types": [{"name": "stm32app_inverter", "url": "a.bin"}]}
        ]}]"#;
        let catalog = Catalog::from_json(no_dsp, ".").unwrap();
        let err = catalog.resolve(TargetType::Dsp).unwrap_err();
        assert!(err.to_string().contains("tms320app_inverter"));
    }

    #[test]
    fn test_provider_loads_relative_to_catalog_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("arm.bin"), [0x11; 64]).unwrap();
        let catalog_path = dir.path().join("catalog.json");
        fs::write(
            &catalog_path,
            r#"[{"name": "megarevo", "hardware": [
                {"hardware_version": "2.0.0", "types": [{"name": "stm32app_inverter", "url": "arm.bin"}]}
            ]}]"#,
        )
        .unwrap();

        let mut provider = CatalogImageProvider::new(Catalog::from_file(&catalog_path).unwrap());
        let image = provider.fetch(TargetType::Arm).unwrap();
        assert_eq!(image.bytes, vec![0x11; 64]);
        assert!(provider.fetch(TargetType::Dsp).is_err());
    }
}
