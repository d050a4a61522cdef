//! Proof-of-work variant selection and hashing
//!
//! The variant a share must be hashed with is a pure function of the coin
//! family and the template's block major version. Hashing itself lives
//! behind [`PowHasher`] so validation logic stays independent of the
//! backend, and runs on a bounded blocking pool sized to the machine.

mod hasher;
mod pool;

pub use hasher::{Blake2Hasher, PowHasher, RandomXHasher};
pub use pool::HashPool;

use crate::error::{PowError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// CryptoNote coin family, from the coin template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CoinFamily {
    /// Mainline CryptoNote (2 MiB scratchpad lineage, RandomX today)
    Cryptonote,
    /// Lite variants (1 MiB scratchpad)
    CryptonoteLite,
    /// Heavy variants (4 MiB scratchpad)
    CryptonoteHeavy,
}

impl fmt::Display for CoinFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CoinFamily::Cryptonote => "cryptonote",
            CoinFamily::CryptonoteLite => "cryptonote-lite",
            CoinFamily::CryptonoteHeavy => "cryptonote-heavy",
        };
        write!(f, "{}", name)
    }
}

/// Concrete PoW function a share is hashed with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PowVariant {
    CnV0,
    CnV1,
    CnV2,
    CnR,
    CnLite,
    CnHeavy,
    RandomX,
}

impl PowVariant {
    /// Stable name, used in errors and telemetry.
    pub fn name(&self) -> &'static str {
        match self {
            PowVariant::CnV0 => "cn/0",
            PowVariant::CnV1 => "cn/1",
            PowVariant::CnV2 => "cn/2",
            PowVariant::CnR => "cn/r",
            PowVariant::CnLite => "cn-lite",
            PowVariant::CnHeavy => "cn-heavy",
            PowVariant::RandomX => "rx/0",
        }
    }

    /// Whether the variant keys on a per-epoch seed hash.
    pub fn needs_seed(&self) -> bool {
        matches!(self, PowVariant::RandomX)
    }
}

impl fmt::Display for PowVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Select the PoW variant for a `(family, major_version)` pair.
///
/// The mainline table follows the Monero hard-fork history; lite and
/// heavy chains kept a single function over their fork span.
pub fn variant_for(family: CoinFamily, major_version: u8) -> Result<PowVariant> {
    let variant = match family {
        CoinFamily::Cryptonote => match major_version {
            1..=6 => PowVariant::CnV0,
            7 => PowVariant::CnV1,
            8 | 9 => PowVariant::CnV2,
            10 | 11 => PowVariant::CnR,
            v if v >= 12 => PowVariant::RandomX,
            _ => {
                return Err(PowError::UnknownVersion {
                    family: family.to_string(),
                    major_version,
                }
                .into())
            }
        },
        CoinFamily::CryptonoteLite => match major_version {
            1..=7 => PowVariant::CnLite,
            _ => {
                return Err(PowError::UnknownVersion {
                    family: family.to_string(),
                    major_version,
                }
                .into())
            }
        },
        CoinFamily::CryptonoteHeavy => match major_version {
            1..=7 => PowVariant::CnHeavy,
            _ => {
                return Err(PowError::UnknownVersion {
                    family: family.to_string(),
                    major_version,
                }
                .into())
            }
        },
    };
    Ok(variant)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mainline_fork_table() {
        assert_eq!(
            variant_for(CoinFamily::Cryptonote, 1).unwrap(),
            PowVariant::CnV0
        );
        assert_eq!(
            variant_for(CoinFamily::Cryptonote, 7).unwrap(),
            PowVariant::CnV1
        );
        assert_eq!(
            variant_for(CoinFamily::Cryptonote, 8).unwrap(),
            PowVariant::CnV2
        );
        assert_eq!(
            variant_for(CoinFamily::Cryptonote, 10).unwrap(),
            PowVariant::CnR
        );
        assert_eq!(
            variant_for(CoinFamily::Cryptonote, 12).unwrap(),
            PowVariant::RandomX
        );
        assert_eq!(
            variant_for(CoinFamily::Cryptonote, 16).unwrap(),
            PowVariant::RandomX
        );
    }

    #[test]
    fn test_lite_and_heavy() {
        assert_eq!(
            variant_for(CoinFamily::CryptonoteLite, 3).unwrap(),
            PowVariant::CnLite
        );
        assert_eq!(
            variant_for(CoinFamily::CryptonoteHeavy, 5).unwrap(),
            PowVariant::CnHeavy
        );
    }

    #[test]
    fn test_version_zero_is_unknown() {
        assert!(variant_for(CoinFamily::Cryptonote, 0).is_err());
        assert!(variant_for(CoinFamily::CryptonoteLite, 9).is_err());
    }

    #[test]
    fn test_seed_requirement() {
        assert!(PowVariant::RandomX.needs_seed());
        assert!(!PowVariant::CnV2.needs_seed());
    }
}
