use std::collections::HashSet;

use serde::{Deserialize, Serialize, Serializer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SystemId(pub u32);

impl std::fmt::Display for SystemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CharacterId(pub u64);

impl std::fmt::Display for CharacterId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// A cyno-capable character as seen by one computation pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub character_id: CharacterId,
    pub character_name: String,
    /// Current location; `None` means the location is unknown and the
    /// candidate is unreachable for every target without asking the oracle.
    #[serde(default)]
    pub system_id: Option<SystemId>,
    #[serde(default)]
    pub system_name: String,
    #[serde(default)]
    pub ship_name: String,
    pub cyno_skill_level: u8,
    pub is_auth_valid: bool,
}

impl Candidate {
    pub fn eligible(&self) -> bool {
        self.is_auth_valid && self.cyno_skill_level > 0
    }
}

/// One requested destination. Priority 1 is highest; equal priorities keep
/// their input order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetRequest {
    pub system_id: SystemId,
    #[serde(default)]
    pub system_name: String,
    pub priority: u32,
    #[serde(default)]
    pub locked_character: Option<CharacterId>,
    #[serde(default)]
    pub excluded_characters: HashSet<CharacterId>,
}

/// Jump count for one (candidate, target) pair. Unreachable covers "no route",
/// unknown location, and oracle failures alike; it orders after every finite
/// count and serializes as JSON null.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Jumps {
    Reachable(u32),
    Unreachable,
}

impl Jumps {
    pub fn sort_key(self) -> u64 {
        match self {
            Jumps::Reachable(n) => u64::from(n),
            Jumps::Unreachable => u64::MAX,
        }
    }
}

impl Serialize for Jumps {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Jumps::Reachable(n) => serializer.serialize_some(n),
            Jumps::Unreachable => serializer.serialize_none(),
        }
    }
}

impl<'de> Deserialize<'de> for Jumps {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match Option::<u32>::deserialize(deserializer)? {
            Some(n) => Jumps::Reachable(n),
            None => Jumps::Unreachable,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorCode {
    Green,
    Yellow,
    Red,
    /// Claimed by a different target; shown for operator visibility only.
    Grey,
}

impl ColorCode {
    pub fn for_jumps(jumps: Jumps) -> Self {
        match jumps {
            Jumps::Unreachable => ColorCode::Red,
            Jumps::Reachable(n) if n < 10 => ColorCode::Green,
            Jumps::Reachable(n) if n < 20 => ColorCode::Yellow,
            Jumps::Reachable(_) => ColorCode::Red,
        }
    }
}

/// A ranked, unclaimed result for one target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AvailableCyno {
    pub character_id: CharacterId,
    pub character_name: String,
    pub current_system: String,
    pub ship_name: String,
    pub jumps: Jumps,
    pub color_code: ColorCode,
    pub is_locked: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimedBy {
    pub priority: u32,
    pub system_id: SystemId,
    pub system_name: String,
}

/// A candidate claimed by a different, higher-priority target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignedCyno {
    pub character_id: CharacterId,
    pub character_name: String,
    pub current_system: String,
    pub ship_name: String,
    pub jumps: Jumps,
    pub color_code: ColorCode,
    pub assigned_to: ClaimedBy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetAssignments {
    pub system_id: SystemId,
    pub priority: u32,
    pub available: Vec<AvailableCyno>,
    pub assigned: Vec<AssignedCyno>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn color_code_bands() {
        assert_eq!(ColorCode::for_jumps(Jumps::Reachable(0)), ColorCode::Green);
        assert_eq!(ColorCode::for_jumps(Jumps::Reachable(9)), ColorCode::Green);
        assert_eq!(ColorCode::for_jumps(Jumps::Reachable(10)), ColorCode::Yellow);
        assert_eq!(ColorCode::for_jumps(Jumps::Reachable(19)), ColorCode::Yellow);
        assert_eq!(ColorCode::for_jumps(Jumps::Reachable(20)), ColorCode::Red);
        assert_eq!(ColorCode::for_jumps(Jumps::Unreachable), ColorCode::Red);
    }

    #[test]
    fn jumps_ordering_and_json() {
        assert!(Jumps::Reachable(u32::MAX).sort_key() < Jumps::Unreachable.sort_key());

        assert_eq!(serde_json::to_string(&Jumps::Reachable(7)).unwrap(), "7");
        assert_eq!(serde_json::to_string(&Jumps::Unreachable).unwrap(), "null");
        assert_eq!(
            serde_json::from_str::<Jumps>("null").unwrap(),
            Jumps::Unreachable
        );
    }

    #[test]
    fn eligibility_requires_skill_and_auth() {
        let mut c = Candidate {
            character_id: CharacterId(1),
            character_name: "Test".to_string(),
            system_id: Some(SystemId(30000142)),
            system_name: "Jita".to_string(),
            ship_name: "Venture".to_string(),
            cyno_skill_level: 4,
            is_auth_valid: true,
        };
        assert!(c.eligible());
        c.cyno_skill_level = 0;
        assert!(!c.eligible());
        c.cyno_skill_level = 1;
        c.is_auth_valid = false;
        assert!(!c.eligible());
    }
}
