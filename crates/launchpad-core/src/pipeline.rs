//! Trigger definitions and run metadata.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::Error;

/// A trigger the release configuration accepts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Trigger {
    /// Push to one of the listed branches ("*" matches any).
    Push { branches: Vec<String> },
    /// Manual dispatch.
    Manual,
    /// Scheduled run (cron expression, evaluated by the CI system).
    Schedule { cron: String },
}

impl Trigger {
    /// Whether this trigger definition accepts the given invocation.
    pub fn accepts(&self, info: &TriggerInfo) -> bool {
        match (self, &info.kind) {
            (Trigger::Push { branches }, TriggerKind::Push) => match &info.branch {
                Some(branch) => branches.iter().any(|b| b == "*" || b == branch),
                None => false,
            },
            (Trigger::Manual, TriggerKind::Manual) => true,
            (Trigger::Schedule { .. }, TriggerKind::Scheduled) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerKind {
    Push,
    Manual,
    Scheduled,
}

impl fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TriggerKind::Push => "push",
            TriggerKind::Manual => "manual",
            TriggerKind::Scheduled => "scheduled",
        };
        f.write_str(s)
    }
}

impl FromStr for TriggerKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "push" => Ok(TriggerKind::Push),
            "manual" | "workflow_dispatch" => Ok(TriggerKind::Manual),
            "scheduled" | "schedule" => Ok(TriggerKind::Scheduled),
            other => Err(Error::InvalidInput(format!("unknown trigger kind: {}", other))),
        }
    }
}

/// Information about what invoked a pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerInfo {
    pub kind: TriggerKind,
    /// Source revision (commit SHA).
    pub revision: String,
    /// Target branch, for pushes.
    pub branch: Option<String>,
    pub actor: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push(branch: &str) -> TriggerInfo {
        TriggerInfo {
            kind: TriggerKind::Push,
            revision: "abc".to_string(),
            branch: Some(branch.to_string()),
            actor: None,
        }
    }

    #[test]
    fn test_push_matches_branch() {
        let trigger = Trigger::Push {
            branches: vec!["main".to_string()],
        };
        assert!(trigger.accepts(&push("main")));
        assert!(!trigger.accepts(&push("feature/x")));
    }

    #[test]
    fn test_wildcard_branch() {
        let trigger = Trigger::Push {
            branches: vec!["*".to_string()],
        };
        assert!(trigger.accepts(&push("anything")));
    }

    #[test]
    fn test_kind_must_match() {
        let info = TriggerInfo {
            kind: TriggerKind::Manual,
            revision: "abc".to_string(),
            branch: None,
            actor: None,
        };
        assert!(Trigger::Manual.accepts(&info));
        assert!(
            !Trigger::Schedule {
                cron: "0 3 * * *".to_string()
            }
            .accepts(&info)
        );
    }

    #[test]
    fn test_kind_parsing() {
        assert_eq!(
            "workflow_dispatch".parse::<TriggerKind>().unwrap(),
            TriggerKind::Manual
        );
        assert!("tag".parse::<TriggerKind>().is_err());
    }
}
