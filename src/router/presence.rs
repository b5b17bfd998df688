//! Presence registry
//!
//! Tracks which agent instances are alive and resolves role names to
//! live instances at delivery time. Entries live in a concurrent map so
//! register/heartbeat requests never contend with the router core; the
//! core only consults presence briefly while resolving recipients.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;

/// Liveness states of an agent instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Offline,
}

/// One agent instance's presence record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceEntry {
    pub agent: String,
    pub status: PresenceStatus,
    pub last_seen: u64,
    pub last_change: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

impl PresenceEntry {
    /// Role carried in this entry's meta, if any.
    #[must_use]
    pub fn role(&self) -> Option<&str> {
        self.meta
            .as_ref()
            .and_then(|meta| meta.get("role"))
            .and_then(Value::as_str)
    }
}

/// Registry of agent instances keyed by instance id.
#[derive(Debug)]
pub struct PresenceRegistry {
    interval_ms: u64,
    timeout_ms: u64,
    entries: DashMap<String, PresenceEntry>,
}

impl PresenceRegistry {
    /// Creates a registry; offline transition happens after
    /// `interval_ms * timeout_multiplier` without a heartbeat.
    #[must_use]
    pub fn new(interval_ms: u64, timeout_multiplier: u32) -> Self {
        Self {
            interval_ms,
            timeout_ms: interval_ms * u64::from(timeout_multiplier),
            entries: DashMap::new(),
        }
    }

    /// Expected heartbeat cadence.
    #[must_use]
    pub fn interval_ms(&self) -> u64 {
        self.interval_ms
    }

    /// Effective offline timeout.
    #[must_use]
    pub fn timeout_ms(&self) -> u64 {
        self.timeout_ms
    }

    /// Registers an instance, replacing its meta when one is provided.
    pub fn register(&self, agent: &str, meta: Option<Value>, now: u64) -> PresenceEntry {
        let mut entry = self
            .entries
            .entry(agent.to_string())
            .or_insert_with(|| PresenceEntry {
                agent: agent.to_string(),
                status: PresenceStatus::Online,
                last_seen: now,
                last_change: now,
                meta: None,
            });
        entry.last_seen = now;
        if entry.status != PresenceStatus::Online {
            entry.status = PresenceStatus::Online;
            entry.last_change = now;
        }
        if meta.is_some() {
            entry.meta = meta;
        }
        entry.value().clone()
    }

    /// Records a heartbeat; creates the entry when unknown. Meta is
    /// never touched.
    pub fn heartbeat(&self, agent: &str, now: u64) -> PresenceEntry {
        let mut entry = self
            .entries
            .entry(agent.to_string())
            .or_insert_with(|| PresenceEntry {
                agent: agent.to_string(),
                status: PresenceStatus::Online,
                last_seen: now,
                last_change: now,
                meta: None,
            });
        entry.last_seen = now;
        if entry.status != PresenceStatus::Online {
            entry.status = PresenceStatus::Online;
            entry.last_change = now;
        }
        entry.value().clone()
    }

    /// Marks every stale online entry offline; returns the agents that
    /// flipped.
    pub fn expire(&self, now: u64) -> Vec<String> {
        let mut expired = Vec::new();
        for mut entry in self.entries.iter_mut() {
            if entry.status == PresenceStatus::Online
                && now.saturating_sub(entry.last_seen) > self.timeout_ms
            {
                entry.status = PresenceStatus::Offline;
                entry.last_change = now;
                expired.push(entry.agent.clone());
            }
        }
        expired
    }

    /// Expires stale entries, then returns a copy of the whole registry.
    #[must_use]
    pub fn snapshot(&self, now: u64) -> Vec<PresenceEntry> {
        self.expire(now);
        let mut entries: Vec<PresenceEntry> = self
            .entries
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        entries.sort_by(|a, b| a.agent.cmp(&b.agent));
        entries
    }

    /// Expires stale entries, then returns one agent's record.
    #[must_use]
    pub fn get(&self, agent: &str, now: u64) -> Option<PresenceEntry> {
        self.expire(now);
        self.entries.get(agent).map(|entry| entry.value().clone())
    }

    /// Resolves a message's target list to concrete agent instances.
    ///
    /// A target that names a known instance is kept as-is; otherwise
    /// every online instance whose meta role matches is substituted;
    /// failing both, the target is kept literally. Duplicates collapse
    /// to first occurrence.
    #[must_use]
    pub fn resolve_recipients(&self, targets: &[String], now: u64) -> Vec<String> {
        let snapshot = self.snapshot(now);
        let mut resolved = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        for target in targets {
            let mut push = |agent: &str, out: &mut Vec<String>| {
                if seen.insert(agent.to_string()) {
                    out.push(agent.to_string());
                }
            };
            if snapshot.iter().any(|entry| &entry.agent == target) {
                push(target, &mut resolved);
                continue;
            }
            let mut matched = false;
            for entry in &snapshot {
                if entry.status == PresenceStatus::Online && entry.role() == Some(target.as_str()) {
                    push(&entry.agent, &mut resolved);
                    matched = true;
                }
            }
            if !matched {
                push(target, &mut resolved);
            }
        }
        resolved
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn registry() -> PresenceRegistry {
        PresenceRegistry::new(30_000, 2)
    }

    #[test]
    fn register_sets_online_and_keeps_meta() {
        let presence = registry();
        let entry = presence.register("A-abc", Some(json!({"role": "A"})), 1_000);
        assert_eq!(entry.status, PresenceStatus::Online);
        assert_eq!(entry.role(), Some("A"));

        // Heartbeat must not clobber the registered meta.
        let entry = presence.heartbeat("A-abc", 2_000);
        assert_eq!(entry.role(), Some("A"));
        assert_eq!(entry.last_seen, 2_000);
    }

    #[test]
    fn stale_entries_expire_after_two_intervals() {
        let presence = registry();
        presence.register("A-abc", None, 1_000);
        assert!(presence.expire(61_000).is_empty());
        let flipped = presence.expire(61_002);
        assert_eq!(flipped, vec!["A-abc".to_string()]);
        let entry = presence.get("A-abc", 61_002).unwrap();
        assert_eq!(entry.status, PresenceStatus::Offline);
        assert_eq!(entry.last_change, 61_002);
    }

    #[test]
    fn heartbeat_revives_an_offline_entry() {
        let presence = registry();
        presence.register("A-abc", None, 1_000);
        presence.expire(100_000);
        let entry = presence.heartbeat("A-abc", 100_500);
        assert_eq!(entry.status, PresenceStatus::Online);
        assert_eq!(entry.last_change, 100_500);
    }

    #[test]
    fn roles_resolve_to_online_instances_only() {
        let presence = registry();
        presence.register("A-live", Some(json!({"role": "A"})), 1_000);
        presence.register("A-dead", Some(json!({"role": "A"})), 1_000);
        presence.heartbeat("A-live", 70_000);

        let resolved = presence.resolve_recipients(&["A".to_string()], 70_000);
        assert_eq!(resolved, vec!["A-live".to_string()]);
    }

    #[test]
    fn known_instances_and_literals_pass_through() {
        let presence = registry();
        presence.register("A-abc", Some(json!({"role": "A"})), 1_000);

        let targets = vec!["A-abc".to_string(), "B".to_string(), "A-abc".to_string()];
        let resolved = presence.resolve_recipients(&targets, 1_000);
        assert_eq!(resolved, vec!["A-abc".to_string(), "B".to_string()]);
    }
}
