//! Statistic tags carried by every axis

use serde::{Deserialize, Serialize};

/// One kind of per-bucket activity counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatTag {
    WrittenBytes,
    ReadBytes,
    WrittenKeys,
    ReadKeys,
    /// Derived: `written_bytes + read_bytes`
    Integration,
}

impl StatTag {
    /// Tags reported by the sample source.
    pub const RAW: [StatTag; 4] = [
        StatTag::WrittenBytes,
        StatTag::ReadBytes,
        StatTag::WrittenKeys,
        StatTag::ReadKeys,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WrittenBytes => "written_bytes",
            Self::ReadBytes => "read_bytes",
            Self::WrittenKeys => "written_keys",
            Self::ReadKeys => "read_keys",
            Self::Integration => "integration",
        }
    }

    /// Tags rendered alongside a requested base tag.
    pub fn display_tags(&self) -> Vec<StatTag> {
        match self {
            Self::Integration => vec![
                StatTag::Integration,
                StatTag::WrittenBytes,
                StatTag::ReadBytes,
            ],
            other => vec![*other],
        }
    }
}

impl std::str::FromStr for StatTag {
    type Err = String;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "written_bytes" => Ok(Self::WrittenBytes),
            "read_bytes" => Ok(Self::ReadBytes),
            "written_keys" => Ok(Self::WrittenKeys),
            "read_keys" => Ok(Self::ReadKeys),
            "integration" => Ok(Self::Integration),
            other => Err(format!(
                "unknown stat type '{}'; expected one of written_bytes, read_bytes, written_keys, read_keys, integration",
                other
            )),
        }
    }
}

impl std::fmt::Display for StatTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
