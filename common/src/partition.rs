use anyhow::bail;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Region {
    #[serde(rename = "NA")]
    NorthAmerica,
    #[serde(rename = "EU")]
    Europe,
    #[serde(rename = "AS")]
    Asia,
}

impl Region {
    pub const ALL: [Region; 3] = [Region::NorthAmerica, Region::Europe, Region::Asia];

    pub fn as_str(&self) -> &'static str {
        match self {
            Region::NorthAmerica => "NA",
            Region::Europe => "EU",
            Region::Asia => "AS",
        }
    }
}

impl FromStr for Region {
    type Err = anyhow::Error;

    /// Case-insensitive; canonical form is uppercase.
    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.trim().to_uppercase().as_str() {
            "NA" => Ok(Region::NorthAmerica),
            "EU" => Ok(Region::Europe),
            "AS" => Ok(Region::Asia),
            _ => bail!("Invalid region. Must be one of: NA, EU, AS"),
        }
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameMode {
    Solo,
    Duo,
    Squad,
}

impl GameMode {
    pub const ALL: [GameMode; 3] = [GameMode::Solo, GameMode::Duo, GameMode::Squad];

    pub fn as_str(&self) -> &'static str {
        match self {
            GameMode::Solo => "solo",
            GameMode::Duo => "duo",
            GameMode::Squad => "squad",
        }
    }
}

impl FromStr for GameMode {
    type Err = anyhow::Error;

    /// Case-insensitive; canonical form is lowercase.
    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "solo" => Ok(GameMode::Solo),
            "duo" => Ok(GameMode::Duo),
            "squad" => Ok(GameMode::Squad),
            _ => bail!("Invalid gameMode. Must be one of: solo, duo, squad"),
        }
    }
}

impl fmt::Display for GameMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scope of a leaderboard. Partitions are never created explicitly, they
/// exist as soon as somebody reads or subscribes to them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PartitionKey {
    Global,
    Scoped { region: Region, game_mode: GameMode },
}

impl PartitionKey {
    pub fn scoped(region: Region, game_mode: GameMode) -> Self {
        PartitionKey::Scoped { region, game_mode }
    }

    pub fn region(&self) -> Option<Region> {
        match self {
            PartitionKey::Global => None,
            PartitionKey::Scoped { region, .. } => Some(*region),
        }
    }

    pub fn game_mode(&self) -> Option<GameMode> {
        match self {
            PartitionKey::Global => None,
            PartitionKey::Scoped { game_mode, .. } => Some(*game_mode),
        }
    }

    /// Broadcast group name for this partition, e.g. `leaderboard:NA:solo`.
    pub fn group_id(&self) -> String {
        match self {
            PartitionKey::Global => "leaderboard:global".to_string(),
            PartitionKey::Scoped { region, game_mode } => {
                format!("leaderboard:{}:{}", region, game_mode)
            }
        }
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PartitionKey::Global => f.write_str("global"),
            PartitionKey::Scoped { region, game_mode } => write!(f, "{}:{}", region, game_mode),
        }
    }
}

/// Filter used by top-K queries. Unset fields match everything.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct PartitionFilter {
    pub region: Option<Region>,
    pub game_mode: Option<GameMode>,
}

impl PartitionFilter {
    pub fn matches(&self, region: Region, game_mode: GameMode) -> bool {
        self.region.map_or(true, |r| r == region) && self.game_mode.map_or(true, |m| m == game_mode)
    }
}

impl From<PartitionKey> for PartitionFilter {
    fn from(key: PartitionKey) -> Self {
        PartitionFilter {
            region: key.region(),
            game_mode: key.game_mode(),
        }
    }
}
