//! Variant levels requested for a session.
//!
//! A session generates one output variation per requested level. The set of
//! levels is fixed; a session may request any non-empty subset of it.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// One independently generated output variation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariantLevel {
    Soft,
    Medium,
    Aggressive,
    Ultra,
}

impl VariantLevel {
    /// Every level, in escalation order.
    pub const ALL: [VariantLevel; 4] = [
        VariantLevel::Soft,
        VariantLevel::Medium,
        VariantLevel::Aggressive,
        VariantLevel::Ultra,
    ];

    /// Return the wire-format string for this variant.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Soft => "soft",
            Self::Medium => "medium",
            Self::Aggressive => "aggressive",
            Self::Ultra => "ultra",
        }
    }

    /// Parse from a wire-format string.
    pub fn parse(s: &str) -> Result<Self, CoreError> {
        match s {
            "soft" => Ok(Self::Soft),
            "medium" => Ok(Self::Medium),
            "aggressive" => Ok(Self::Aggressive),
            "ultra" => Ok(Self::Ultra),
            other => Err(CoreError::Validation(format!(
                "Unknown variant level '{other}'. Must be one of: soft, medium, aggressive, ultra"
            ))),
        }
    }
}

impl fmt::Display for VariantLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validate a requested level list.
///
/// An empty request expands to [`VariantLevel::ALL`]. Duplicates are
/// rejected.
pub fn resolve_levels(requested: &[VariantLevel]) -> Result<Vec<VariantLevel>, CoreError> {
    if requested.is_empty() {
        return Ok(VariantLevel::ALL.to_vec());
    }
    let mut seen = Vec::with_capacity(requested.len());
    for level in requested {
        if seen.contains(level) {
            return Err(CoreError::Validation(format!(
                "Variant level '{level}' requested more than once"
            )));
        }
        seen.push(*level);
    }
    Ok(seen)
}
