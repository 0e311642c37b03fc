use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identifier of a weekly module (1-based).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModuleId(u32);

impl ModuleId {
    /// The first module, which is never time-locked.
    pub const FIRST: ModuleId = ModuleId(1);

    /// Creates a new `ModuleId`
    #[must_use]
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the underlying u32 value
    #[must_use]
    pub fn value(&self) -> u32 {
        self.0
    }

    /// The module before this one, if any.
    #[must_use]
    pub fn previous(&self) -> Option<Self> {
        (self.0 > 1).then(|| Self(self.0 - 1))
    }
}

/// Step number within a module (1-based).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepId(u32);

impl StepId {
    /// The first step of every module; always reachable.
    pub const FIRST: StepId = StepId(1);

    /// Creates a new `StepId`
    #[must_use]
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the underlying u32 value
    #[must_use]
    pub fn value(&self) -> u32 {
        self.0
    }

    #[must_use]
    pub fn next(&self) -> Self {
        Self(self.0.saturating_add(1))
    }

    #[must_use]
    pub fn previous(&self) -> Option<Self> {
        (self.0 > 1).then(|| Self(self.0 - 1))
    }
}

/// Stable identifier of an authenticated learner; partitions remote progress.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// Creates a new `UserId`
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ModuleId({})", self.0)
    }
}

impl fmt::Debug for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StepId({})", self.0)
    }
}

impl fmt::Debug for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UserId({})", self.0)
    }
}

// ─── Display Implementations ───────────────────────────────────────────────────

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ─── FromStr Implementations ───────────────────────────────────────────────────

/// Error type for parsing ID from string
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseIdError {
    kind: String,
}

impl fmt::Display for ParseIdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to parse {} from string", self.kind)
    }
}

impl std::error::Error for ParseIdError {}

impl FromStr for ModuleId {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<u32>()
            .ok()
            .filter(|id| *id > 0)
            .map(ModuleId::new)
            .ok_or_else(|| ParseIdError {
                kind: "ModuleId".to_string(),
            })
    }
}

impl FromStr for StepId {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<u32>()
            .ok()
            .filter(|id| *id > 0)
            .map(StepId::new)
            .ok_or_else(|| ParseIdError {
                kind: "StepId".to_string(),
            })
    }
}

impl FromStr for UserId {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(ParseIdError {
                kind: "UserId".to_string(),
            });
        }
        Ok(UserId::new(trimmed))
    }
}

// ─── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn module_id_display() {
        let id = ModuleId::new(3);
        assert_eq!(id.to_string(), "3");
    }

    #[test]
    fn module_id_from_str_rejects_zero() {
        assert!("0".parse::<ModuleId>().is_err());
        assert_eq!("2".parse::<ModuleId>().unwrap(), ModuleId::new(2));
    }

    #[test]
    fn step_id_neighbours() {
        let id = StepId::new(2);
        assert_eq!(id.next(), StepId::new(3));
        assert_eq!(id.previous(), Some(StepId::FIRST));
        assert_eq!(StepId::FIRST.previous(), None);
    }

    #[test]
    fn step_id_from_str_invalid() {
        assert!("not-a-number".parse::<StepId>().is_err());
    }

    #[test]
    fn user_id_trims_and_rejects_blank() {
        let id: UserId = "  learner-7 ".parse().unwrap();
        assert_eq!(id.as_str(), "learner-7");
        assert!("   ".parse::<UserId>().is_err());
    }

    #[test]
    fn ids_serialize_as_plain_values() {
        let json = serde_json::to_string(&(ModuleId::new(4), StepId::new(2))).unwrap();
        assert_eq!(json, "[4,2]");
        let back: UserId = serde_json::from_str("\"abc\"").unwrap();
        assert_eq!(back, UserId::new("abc"));
    }
}
