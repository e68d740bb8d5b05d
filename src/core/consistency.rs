use crate::core::{MapperError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Replica acknowledgement level requested from the column store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConsistencyLevel {
    Any,
    One,
    Two,
    Three,
    Quorum,
    All,
    LocalOne,
    LocalQuorum,
    EachQuorum,
    Serial,
    LocalSerial,
}

/// Which side of the store a consistency level is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessKind {
    Read,
    Write,
}

impl fmt::Display for AccessKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessKind::Read => write!(f, "read"),
            AccessKind::Write => write!(f, "write"),
        }
    }
}

impl ConsistencyLevel {
    /// Number of replicas that must acknowledge, given a replication factor.
    pub fn required_replicas(&self, replication_factor: usize) -> usize {
        let quorum = replication_factor / 2 + 1;
        match self {
            Self::Any | Self::One | Self::LocalOne => 1,
            Self::Two => 2,
            Self::Three => 3,
            Self::Quorum | Self::LocalQuorum | Self::EachQuorum => quorum,
            Self::Serial | Self::LocalSerial => quorum,
            Self::All => replication_factor.max(1),
        }
    }

    /// `ANY` only makes sense for writes (hinted handoff).
    pub fn is_read_allowed(&self) -> bool {
        !matches!(self, Self::Any)
    }

    /// Serial levels are reserved for reads and for the Paxos phase of
    /// conditional writes.
    pub fn is_write_allowed(&self) -> bool {
        !self.is_serial()
    }

    pub fn is_serial(&self) -> bool {
        matches!(self, Self::Serial | Self::LocalSerial)
    }

    pub fn check_allowed(&self, access: AccessKind) -> Result<()> {
        let allowed = match access {
            AccessKind::Read => self.is_read_allowed(),
            AccessKind::Write => self.is_write_allowed(),
        };
        if allowed {
            Ok(())
        } else {
            Err(MapperError::InvalidConsistency(format!(
                "{} is not supported for {} operations",
                self, access
            )))
        }
    }

    fn strength(&self) -> u8 {
        match self {
            Self::Any => 0,
            Self::One | Self::LocalOne => 1,
            Self::Two => 2,
            Self::Three => 3,
            Self::LocalQuorum | Self::LocalSerial => 4,
            Self::Quorum | Self::Serial => 5,
            Self::EachQuorum => 6,
            Self::All => 7,
        }
    }

    /// Picks the stricter of two levels; ties keep `self`.
    pub fn stronger(self, other: ConsistencyLevel) -> ConsistencyLevel {
        if other.strength() > self.strength() {
            other
        } else {
            self
        }
    }
}

impl fmt::Display for ConsistencyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Any => "ANY",
            Self::One => "ONE",
            Self::Two => "TWO",
            Self::Three => "THREE",
            Self::Quorum => "QUORUM",
            Self::All => "ALL",
            Self::LocalOne => "LOCAL_ONE",
            Self::LocalQuorum => "LOCAL_QUORUM",
            Self::EachQuorum => "EACH_QUORUM",
            Self::Serial => "SERIAL",
            Self::LocalSerial => "LOCAL_SERIAL",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for ConsistencyLevel {
    type Err = MapperError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ANY" => Ok(Self::Any),
            "ONE" => Ok(Self::One),
            "TWO" => Ok(Self::Two),
            "THREE" => Ok(Self::Three),
            "QUORUM" => Ok(Self::Quorum),
            "ALL" => Ok(Self::All),
            "LOCAL_ONE" => Ok(Self::LocalOne),
            "LOCAL_QUORUM" => Ok(Self::LocalQuorum),
            "EACH_QUORUM" => Ok(Self::EachQuorum),
            "SERIAL" => Ok(Self::Serial),
            "LOCAL_SERIAL" => Ok(Self::LocalSerial),
            other => Err(MapperError::InvalidConsistency(format!(
                "unknown consistency level '{}'",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_required_replicas() {
        assert_eq!(ConsistencyLevel::One.required_replicas(3), 1);
        assert_eq!(ConsistencyLevel::Quorum.required_replicas(3), 2);
        assert_eq!(ConsistencyLevel::All.required_replicas(3), 3);
        assert_eq!(ConsistencyLevel::Three.required_replicas(1), 3);
    }

    #[test]
    fn test_read_write_reservation() {
        assert!(ConsistencyLevel::Any.check_allowed(AccessKind::Write).is_ok());
        assert!(ConsistencyLevel::Any.check_allowed(AccessKind::Read).is_err());
        assert!(ConsistencyLevel::Serial.check_allowed(AccessKind::Read).is_ok());
        assert!(ConsistencyLevel::LocalSerial.check_allowed(AccessKind::Write).is_err());
    }

    #[test]
    fn test_parse_round_trip() {
        let level: ConsistencyLevel = "local_quorum".parse().unwrap();
        assert_eq!(level, ConsistencyLevel::LocalQuorum);
        assert_eq!(level.to_string(), "LOCAL_QUORUM");
        assert!("FIVE".parse::<ConsistencyLevel>().is_err());
    }

    #[test]
    fn test_stronger_prefers_stricter_level() {
        let picked = ConsistencyLevel::One.stronger(ConsistencyLevel::Quorum);
        assert_eq!(picked, ConsistencyLevel::Quorum);
        let kept = ConsistencyLevel::All.stronger(ConsistencyLevel::LocalQuorum);
        assert_eq!(kept, ConsistencyLevel::All);
        let tie = ConsistencyLevel::LocalOne.stronger(ConsistencyLevel::One);
        assert_eq!(tie, ConsistencyLevel::LocalOne);
    }
}
