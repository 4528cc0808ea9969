//! Search and indexing parameters.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::{IndexError, Result};
use crate::logmath::LogMath;

/// Acoustic scores below this are pruned or unreachable links.
pub const ASCR_FLOOR: i32 = -536_870_912;

/// Tunables shared by the term and position indexes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Longest gap in seconds between the end of one keyword hit and the
    /// start of the next. Default: 0.3.
    pub interval: f64,
    /// Left shift applied to raw acoustic scores. Default: 10.
    pub senscr_shift: u32,
    /// Smallest raw acoustic score accepted when indexing (inclusive).
    pub ascr_floor: i32,
    /// Base of the integer log domain used by all scores. Default: 1.0001.
    pub log_base: f64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            interval: 0.3,
            senscr_shift: 10,
            ascr_floor: ASCR_FLOOR,
            log_base: 1.0001,
        }
    }
}

impl SearchConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }

    pub fn read(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| IndexError::open(path, e))?;
        Self::from_toml_str(&text)
    }

    /// Log-domain arithmetic in the configured base.
    pub fn logmath(&self) -> LogMath {
        LogMath::new(self.log_base)
    }

    /// Whether a raw acoustic score is in the range a valid link can have.
    pub fn accepts_ascr(&self, ascr: i32) -> bool {
        ascr >= self.ascr_floor && ascr <= 0
    }

    /// Shift then scale a raw acoustic score.
    pub fn scaled_ascr(&self, ascr: i32, acoustic_scale: f32) -> i32 {
        let shifted = i64::from(ascr) << self.senscr_shift;
        // float to int casts saturate
        (shifted as f64 * f64::from(acoustic_scale)) as i32
    }
}
