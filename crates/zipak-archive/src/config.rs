//! Operator-tunable knobs, grounded on `PakVars.h`'s console-variable set:
//! the subset of those variables that remain meaningful once turned into
//! explicit construction-time configuration instead of globals.

use serde::{Deserialize, Serialize};

use crate::pak_manager::PakPriority;

/// How strictly an unencrypted archive is tolerated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum EncryptionPolicy {
    /// Unencrypted archives are accepted without complaint.
    #[default]
    Permissive,
    /// Unencrypted archives are accepted but logged as a warning.
    WarnOnUnencrypted,
    /// Unencrypted archives are rejected outright (shipping builds).
    Mandatory,
}

/// Construction-time configuration for a [`crate::pak_manager::PakManager`]
/// and the caches it opens.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PakConfig {
    /// Default priority policy for path resolution.
    pub priority: PakPriority,
    /// Whether archives may decompress in place (aliased source/dest
    /// buffers) rather than always allocating a disjoint destination.
    pub allow_in_place_decompress: bool,
    /// Sector size used by the streaming read fast path, in bytes.
    pub streaming_sector_size: u32,
    /// Fixed in-place arena pool size, in bytes. `0` disables that tier.
    pub arena_pool_size: usize,
    /// How strictly unencrypted archives are tolerated.
    pub encryption_policy: EncryptionPolicy,
}

impl Default for PakConfig {
    fn default() -> Self {
        Self {
            priority: PakPriority::PakFirst,
            allow_in_place_decompress: true,
            streaming_sector_size: 4096,
            arena_pool_size: 2 * 1024 * 1024,
            encryption_policy: EncryptionPolicy::default(),
        }
    }
}

impl serde::Serialize for PakPriority {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let name = match self {
            PakPriority::FileFirst => "file_first",
            PakPriority::PakFirst => "pak_first",
            PakPriority::PakOnly => "pak_only",
            PakPriority::FileFirstModsOnly => "file_first_mods_only",
        };
        serializer.serialize_str(name)
    }
}

impl<'de> serde::Deserialize<'de> for PakPriority {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let name = String::deserialize(deserializer)?;
        match name.as_str() {
            "file_first" => Ok(PakPriority::FileFirst),
            "pak_first" => Ok(PakPriority::PakFirst),
            "pak_only" => Ok(PakPriority::PakOnly),
            "file_first_mods_only" => Ok(PakPriority::FileFirstModsOnly),
            other => Err(serde::de::Error::unknown_variant(
                other,
                &[
                    "file_first",
                    "pak_first",
                    "pak_only",
                    "file_first_mods_only",
                ],
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_compiled_in_defaults() {
        let config = PakConfig::default();
        assert_eq!(config.priority, PakPriority::PakFirst);
        assert!(config.allow_in_place_decompress);
        assert_eq!(config.streaming_sector_size, 4096);
    }

    #[test]
    fn round_trips_through_json() {
        let config = PakConfig {
            priority: PakPriority::FileFirstModsOnly,
            encryption_policy: EncryptionPolicy::Mandatory,
            ..PakConfig::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        let parsed: PakConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.priority, PakPriority::FileFirstModsOnly);
        assert_eq!(parsed.encryption_policy, EncryptionPolicy::Mandatory);
    }
}
