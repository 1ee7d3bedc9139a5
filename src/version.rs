//! Dotted numeric versions and the import match predicates that compare them.
//!
//! Plug-in versions here are 1-4 numeric components compared left-aligned,
//! component by component. This intentionally does not reuse `semver`: the
//! match rules below compare a caller-chosen prefix of components (one, two,
//! or all four), which semver's fixed major.minor.patch shape cannot express.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A version with up to four numeric components. Missing trailing
/// components are treated as zero when compared.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Version {
    components: [u32; 4],
}

impl Version {
    pub fn new(components: [u32; 4]) -> Self {
        Version { components }
    }

    /// Compares the first `n` components (1-4), left-aligned.
    pub fn cmp_components(&self, other: &Version, n: usize) -> Ordering {
        let n = n.clamp(1, 4);
        self.components[..n].cmp(&other.components[..n])
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}",
            self.components[0], self.components[1], self.components[2], self.components[3]
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseVersionError;

impl fmt::Display for ParseVersionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("invalid version string: expected 1-4 dot-separated numeric components")
    }
}

impl std::error::Error for ParseVersionError {}

impl FromStr for Version {
    type Err = ParseVersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('.').collect();
        if parts.is_empty() || parts.len() > 4 {
            return Err(ParseVersionError);
        }
        let mut components = [0u32; 4];
        for (i, part) in parts.iter().enumerate() {
            components[i] = part.parse::<u32>().map_err(|_| ParseVersionError)?;
        }
        Ok(Version { components })
    }
}

/// The version-compatibility predicate an import declares against its
/// required version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchRule {
    /// Always satisfied, regardless of the provider's version.
    None,
    /// All four components must match exactly.
    Perfect,
    /// Major and minor must match; patch and build may be greater or equal.
    Equivalent,
    /// Major must match; everything after may be greater or equal.
    Compatible,
    /// The provider's version must be greater than or equal, component-wise.
    GreaterOrEqual,
}

impl MatchRule {
    /// Returns whether `provided` satisfies this rule against `required`.
    /// `required` of `None` always satisfies every rule.
    pub fn satisfied_by(self, required: Option<&Version>, provided: Option<&Version>) -> bool {
        let Some(required) = required else {
            return true;
        };
        let Some(provided) = provided else {
            return matches!(self, MatchRule::None);
        };
        match self {
            MatchRule::None => true,
            MatchRule::Perfect => provided.cmp_components(required, 4) == Ordering::Equal,
            MatchRule::Equivalent => {
                provided.cmp_components(required, 2) == Ordering::Equal
                    && provided.cmp_components(required, 4) != Ordering::Less
            }
            MatchRule::Compatible => {
                provided.cmp_components(required, 1) == Ordering::Equal
                    && provided.cmp_components(required, 4) != Ordering::Less
            }
            MatchRule::GreaterOrEqual => provided.cmp_components(required, 4) != Ordering::Less,
        }
    }
}
