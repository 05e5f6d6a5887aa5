//! Partition-table profiles.
//!
//! The filesystem image must be written at the offset of the filesystem
//! partition of whatever table the firmware was built with. A mismatch is not
//! detected by the flashing tool and silently corrupts the device, so the
//! offset is never configured on its own: it always comes from a named profile.

use crate::error::ConfigError;
use lazy_static::lazy_static;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::fmt;

lazy_static! {
    static ref PROFILES: HashMap<String, PartitionProfile> = {
        let mut profiles = HashMap::new();

        profiles.insert(
            "huge_app".to_string(),
            PartitionProfile::new(
                "huge_app",
                0x291000,
                "3MB app, no OTA, SPIFFS after the app partition",
            ),
        );

        profiles.insert(
            "default".to_string(),
            PartitionProfile::new(
                "default",
                0x290000,
                "Two 1.25MB OTA apps, 1.4MB SPIFFS",
            ),
        );

        profiles.insert(
            "min_spiffs".to_string(),
            PartitionProfile::new(
                "min_spiffs",
                0x3D0000,
                "Two 1.9MB OTA apps, 128KB SPIFFS",
            ),
        );

        profiles.insert(
            "no_ota".to_string(),
            PartitionProfile::new(
                "no_ota",
                0x210000,
                "2MB app, no OTA, 1.9MB SPIFFS",
            ),
        );

        profiles
    };
}

/// A partition table and the flash address of its filesystem partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionProfile {
    pub name: String,
    /// Integer (`0x291000` is valid TOML) or string (`"0x291000"`)
    #[serde(deserialize_with = "deserialize_offset")]
    pub filesystem_offset: u32,
    #[serde(default)]
    pub description: String,
}

impl PartitionProfile {
    pub fn new(name: &str, filesystem_offset: u32, description: &str) -> Self {
        PartitionProfile {
            name: name.to_string(),
            filesystem_offset,
            description: description.to_string(),
        }
    }

    /// Offset as passed to the flashing tool, e.g. `0x291000`.
    pub fn offset_hex(&self) -> String {
        format!("{:#x}", self.filesystem_offset)
    }
}

/// Get a built-in profile by name.
pub fn get_profile(name: &str) -> Option<PartitionProfile> {
    PROFILES.get(name).cloned()
}

/// Names of all built-in profiles, sorted.
pub fn get_available_profiles() -> Vec<String> {
    let mut names: Vec<String> = PROFILES.keys().cloned().collect();
    names.sort();
    names
}

/// Resolve `name` against profiles declared in the config first, then the
/// built-in table.
///
/// A declared profile may reuse a built-in name only if it agrees on the
/// offset; otherwise the two definitions would drift apart silently.
pub fn resolve_profile(
    name: &str,
    declared: &[PartitionProfile],
) -> Result<PartitionProfile, ConfigError> {
    for profile in declared {
        if let Some(builtin) = get_profile(&profile.name) {
            if builtin.filesystem_offset != profile.filesystem_offset {
                return Err(ConfigError::ConflictDetected(format!(
                    "Partition profile '{}' redefines built-in offset {} as {}",
                    profile.name,
                    builtin.offset_hex(),
                    profile.offset_hex()
                )));
            }
        }
    }

    if let Some(profile) = declared.iter().find(|p| p.name == name) {
        return Ok(profile.clone());
    }

    get_profile(name).ok_or_else(|| {
        ConfigError::ValidationFailed(format!(
            "Unknown partition profile '{}'. Available: {}",
            name,
            get_available_profiles().join(", ")
        ))
    })
}

/// Parse a flash offset given as hex (`0x291000`) or decimal.
pub fn parse_offset(value: &str) -> Result<u32, ConfigError> {
    let trimmed = value.trim();
    let parsed = match trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => trimmed.parse::<u32>(),
    };

    parsed.map_err(|e| {
        ConfigError::ValidationFailed(format!("Invalid flash offset '{}': {}", value, e))
    })
}

fn deserialize_offset<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::{self, Visitor};

    struct OffsetVisitor;

    impl<'de> Visitor<'de> for OffsetVisitor {
        type Value = u32;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a flash offset as an integer or a hex/decimal string")
        }

        fn visit_i64<E>(self, value: i64) -> Result<u32, E>
        where
            E: de::Error,
        {
            u32::try_from(value).map_err(|_| E::custom(format!("flash offset out of range: {}", value)))
        }

        fn visit_u64<E>(self, value: u64) -> Result<u32, E>
        where
            E: de::Error,
        {
            u32::try_from(value).map_err(|_| E::custom(format!("flash offset out of range: {}", value)))
        }

        fn visit_str<E>(self, value: &str) -> Result<u32, E>
        where
            E: de::Error,
        {
            parse_offset(value).map_err(E::custom)
        }
    }

    deserializer.deserialize_any(OffsetVisitor)
}
