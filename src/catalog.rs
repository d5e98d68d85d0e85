//! Bitrate catalog: the fixed set of renditions every engine agrees on

use crate::config::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Frame size of a rendition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// One quality rendition. For ABR decisions the bitrate is its identity,
/// for distribution the label is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BitrateLevel {
    pub bitrate_kbps: u32,
    pub resolution: Resolution,
    pub frame_rate: f64,
    pub label: String,
}

impl BitrateLevel {
    pub fn new(bitrate_kbps: u32, resolution: Resolution, frame_rate: f64, label: impl Into<String>) -> Self {
        Self {
            bitrate_kbps,
            resolution,
            frame_rate,
            label: label.into(),
        }
    }

    /// Bandwidth in bits per second, as advertised in playlists
    pub fn bandwidth_bps(&self) -> u64 {
        self.bitrate_kbps as u64 * 1000
    }
}

impl fmt::Display for BitrateLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({} kbps, {}, {:.0} fps)",
            self.label, self.bitrate_kbps, self.resolution, self.frame_rate
        )
    }
}

/// Renditions ordered ascending by bitrate
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BitrateCatalog {
    levels: Vec<BitrateLevel>,
}

impl Default for BitrateCatalog {
    fn default() -> Self {
        Self::standard()
    }
}

impl BitrateCatalog {
    /// Build a catalog, sorting by bitrate. Bitrates and labels must be unique.
    pub fn new(mut levels: Vec<BitrateLevel>) -> Result<Self, ConfigError> {
        if levels.is_empty() {
            return Err(ConfigError::Invalid("catalog needs at least one level".to_string()));
        }

        let mut bitrates = HashSet::new();
        let mut labels = HashSet::new();
        for level in &levels {
            if level.bitrate_kbps == 0 {
                return Err(ConfigError::Invalid(format!("level {} has zero bitrate", level.label)));
            }
            if level.label.is_empty() {
                return Err(ConfigError::Invalid("level label must not be empty".to_string()));
            }
            if !bitrates.insert(level.bitrate_kbps) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate bitrate {} kbps",
                    level.bitrate_kbps
                )));
            }
            if !labels.insert(level.label.clone()) {
                return Err(ConfigError::Invalid(format!("duplicate label {}", level.label)));
            }
        }

        levels.sort_by_key(|level| level.bitrate_kbps);
        Ok(Self { levels })
    }

    /// 500 / 1000 / 2000 / 4000 kbps at 360p / 480p / 720p / 1080p, 30 fps
    pub fn standard() -> Self {
        Self {
            levels: vec![
                BitrateLevel::new(500, Resolution::new(640, 360), 30.0, "360p"),
                BitrateLevel::new(1000, Resolution::new(854, 480), 30.0, "480p"),
                BitrateLevel::new(2000, Resolution::new(1280, 720), 30.0, "720p"),
                BitrateLevel::new(4000, Resolution::new(1920, 1080), 30.0, "1080p"),
            ],
        }
    }

    pub fn levels(&self) -> &[BitrateLevel] {
        &self.levels
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    pub fn lowest(&self) -> &BitrateLevel {
        &self.levels[0]
    }

    pub fn highest(&self) -> &BitrateLevel {
        &self.levels[self.levels.len() - 1]
    }

    pub fn by_bitrate(&self, bitrate_kbps: u32) -> Option<&BitrateLevel> {
        self.levels.iter().find(|level| level.bitrate_kbps == bitrate_kbps)
    }

    pub fn by_label(&self, label: &str) -> Option<&BitrateLevel> {
        self.levels.iter().find(|level| level.label == label)
    }

    pub fn contains_label(&self, label: &str) -> bool {
        self.by_label(label).is_some()
    }

    /// Index of a label in ascending order
    pub fn position(&self, label: &str) -> Option<usize> {
        self.levels.iter().position(|level| level.label == label)
    }

    /// First level strictly above `bitrate_kbps`
    pub fn next_higher(&self, bitrate_kbps: u32) -> Option<&BitrateLevel> {
        self.levels.iter().find(|level| level.bitrate_kbps > bitrate_kbps)
    }

    /// Last level strictly below `bitrate_kbps`
    pub fn next_lower(&self, bitrate_kbps: u32) -> Option<&BitrateLevel> {
        self.levels.iter().rev().find(|level| level.bitrate_kbps < bitrate_kbps)
    }

    /// Highest level not above `bitrate_kbps`, falling back to the lowest
    pub fn floor(&self, bitrate_kbps: u32) -> &BitrateLevel {
        self.levels
            .iter()
            .rev()
            .find(|level| level.bitrate_kbps <= bitrate_kbps)
            .unwrap_or_else(|| self.lowest())
    }

    /// Level one step above `label`, if any
    pub fn step_up(&self, label: &str) -> Option<&BitrateLevel> {
        self.position(label).and_then(|idx| self.levels.get(idx + 1))
    }

    /// Level one step below `label`, if any
    pub fn step_down(&self, label: &str) -> Option<&BitrateLevel> {
        match self.position(label) {
            Some(idx) if idx > 0 => self.levels.get(idx - 1),
            _ => None,
        }
    }

    pub fn labels(&self) -> Vec<String> {
        self.levels.iter().map(|level| level.label.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_catalog_is_ascending() {
        let catalog = BitrateCatalog::standard();
        let bitrates: Vec<u32> = catalog.levels().iter().map(|l| l.bitrate_kbps).collect();
        assert_eq!(bitrates, vec![500, 1000, 2000, 4000]);
        assert_eq!(catalog.lowest().label, "360p");
        assert_eq!(catalog.highest().label, "1080p");
    }

    #[test]
    fn new_sorts_and_rejects_duplicates() {
        let catalog = BitrateCatalog::new(vec![
            BitrateLevel::new(3000, Resolution::new(1280, 720), 60.0, "720p60"),
            BitrateLevel::new(800, Resolution::new(640, 360), 30.0, "360p"),
        ])
        .unwrap();
        assert_eq!(catalog.lowest().bitrate_kbps, 800);

        let dup = BitrateCatalog::new(vec![
            BitrateLevel::new(800, Resolution::new(640, 360), 30.0, "a"),
            BitrateLevel::new(800, Resolution::new(854, 480), 30.0, "b"),
        ]);
        assert!(dup.is_err());
        assert!(BitrateCatalog::new(Vec::new()).is_err());
    }

    #[test]
    fn neighbours() {
        let catalog = BitrateCatalog::standard();
        assert_eq!(catalog.next_higher(1000).unwrap().bitrate_kbps, 2000);
        assert!(catalog.next_higher(4000).is_none());
        assert_eq!(catalog.next_lower(1000).unwrap().bitrate_kbps, 500);
        assert!(catalog.next_lower(500).is_none());
        assert_eq!(catalog.floor(1500).bitrate_kbps, 1000);
        assert_eq!(catalog.floor(100).bitrate_kbps, 500);
        assert_eq!(catalog.step_up("480p").unwrap().label, "720p");
        assert!(catalog.step_down("360p").is_none());
        assert!(catalog.step_up("unknown").is_none());
    }
}
