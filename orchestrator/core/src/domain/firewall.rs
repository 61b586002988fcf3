// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Firewall rulesets and the pending-change record that guards them.
//!
//! A ruleset applied by an operator is provisional until confirmed. The
//! [`FirewallPendingChange`] keeps the last-known-good ruleset so it can be
//! restored if the operator never confirms (typically because the new rules
//! locked them out).

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::transaction::TransactionId;

/// Resource identifier every firewall transaction is reserved under
pub const FIREWALL_RESOURCE: &str = "firewall";

/// Longest confirmation window a pending change may be given
pub const MAX_GRACE_PERIOD: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DefaultPolicy {
    #[default]
    Accept,
    Drop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleAction {
    Allow,
    Deny,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Any,
    Tcp,
    Udp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirewallRule {
    pub action: RuleAction,

    #[serde(default)]
    pub protocol: Protocol,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Source address or CIDR; `None` matches any source
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl FirewallRule {
    /// Whether this rule admits TCP traffic to `port` from any source
    pub fn allows_tcp_port(&self, port: u16) -> bool {
        self.action == RuleAction::Allow
            && matches!(self.protocol, Protocol::Tcp | Protocol::Any)
            && self.port.is_none_or(|p| p == port)
            && self.source.is_none()
    }
}

impl fmt::Display for FirewallRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let action = match self.action {
            RuleAction::Allow => "allow",
            RuleAction::Deny => "deny",
        };
        let protocol = match self.protocol {
            Protocol::Any => "any",
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
        };
        write!(f, "{} {}", action, protocol)?;
        if let Some(port) = self.port {
            write!(f, "/{}", port)?;
        }
        write!(f, " from {}", self.source.as_deref().unwrap_or("any"))
    }
}

/// A complete firewall configuration
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FirewallRuleset {
    #[serde(default)]
    pub default_policy: DefaultPolicy,

    #[serde(default)]
    pub rules: Vec<FirewallRule>,
}

impl FirewallRuleset {
    /// Whether the administrative port stays reachable under this ruleset
    pub fn admits_admin_port(&self, port: u16) -> bool {
        match self.default_policy {
            DefaultPolicy::Accept => !self.rules.iter().any(|r| {
                r.action == RuleAction::Deny
                    && matches!(r.protocol, Protocol::Tcp | Protocol::Any)
                    && r.port.is_none_or(|p| p == port)
                    && r.source.is_none()
            }),
            DefaultPolicy::Drop => self.rules.iter().any(|r| r.allows_tcp_port(port)),
        }
    }
}

/// Provisional ruleset awaiting operator confirmation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirewallPendingChange {
    pub transaction_id: TransactionId,
    pub applied_at: DateTime<Utc>,
    pub rollback_at: DateTime<Utc>,
    pub previous_config: FirewallRuleset,
    pub new_config: FirewallRuleset,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FirewallStatus {
    Active,
    PendingConfirm,
}

/// Snapshot of the firewall exposed to the console
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirewallState {
    pub status: FirewallStatus,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub rollback_at: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<TransactionId>,

    pub default_policy: DefaultPolicy,
    pub rules: Vec<FirewallRule>,
}

/// Why a pending change was reverted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollbackReason {
    Manual,
    Timeout,
}

impl fmt::Display for RollbackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RollbackReason::Manual => f.write_str("manual"),
            RollbackReason::Timeout => f.write_str("timeout"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn allow_tcp(port: u16) -> FirewallRule {
        FirewallRule {
            action: RuleAction::Allow,
            protocol: Protocol::Tcp,
            port: Some(port),
            source: None,
            comment: None,
        }
    }

    #[test]
    fn test_drop_policy_requires_explicit_admin_rule() {
        let mut ruleset = FirewallRuleset {
            default_policy: DefaultPolicy::Drop,
            rules: vec![allow_tcp(22)],
        };
        assert!(!ruleset.admits_admin_port(443));

        ruleset.rules.push(allow_tcp(443));
        assert!(ruleset.admits_admin_port(443));
    }

    #[test]
    fn test_accept_policy_blocked_by_blanket_deny() {
        let ruleset = FirewallRuleset {
            default_policy: DefaultPolicy::Accept,
            rules: vec![FirewallRule {
                action: RuleAction::Deny,
                protocol: Protocol::Any,
                port: None,
                source: None,
                comment: None,
            }],
        };
        assert!(!ruleset.admits_admin_port(443));
        assert!(FirewallRuleset::default().admits_admin_port(443));
    }

    #[test]
    fn test_rule_display() {
        let mut rule = allow_tcp(443);
        rule.source = Some("10.0.0.0/8".to_string());
        assert_eq!(rule.to_string(), "allow tcp/443 from 10.0.0.0/8");
    }
}
