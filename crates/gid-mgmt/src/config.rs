//! Management policy configuration.

use serde::{Deserialize, Serialize};

/// What to do with an interface's GID entries when its link goes down.
///
/// `Keep` leaves the entries in place until the interface is fully
/// unregistered; `Remove` deletes them on link-down and repopulates on
/// link-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkDownPolicy {
    #[default]
    Keep,
    Remove,
}

/// Configuration for the GID event manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MgmtConfig {
    /// Link-down handling policy.
    #[serde(default)]
    pub link_down_policy: LinkDownPolicy,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_keeps_entries_on_link_down() {
        assert_eq!(MgmtConfig::default().link_down_policy, LinkDownPolicy::Keep);
    }

    #[test]
    fn test_config_round_trip() {
        let config = MgmtConfig {
            link_down_policy: LinkDownPolicy::Remove,
        };
        let json = serde_json::to_string(&config).unwrap();
        assert_eq!(json, r#"{"link_down_policy":"remove"}"#);
        let parsed: MgmtConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_missing_policy_defaults_to_keep() {
        let parsed: MgmtConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(parsed.link_down_policy, LinkDownPolicy::Keep);
    }
}
