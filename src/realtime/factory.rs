//! # Subscription Factory
//!
//! Resolves a domain resource kind plus the current identity into the
//! channel key, the wire bindings the transport registers, and the local
//! post-filter. Resolution is pure: identical inputs give identical keys.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::auth::Identity;
use super::errors::{RealtimeError, RealtimeResult};
use super::filter::{FilterPredicate, WireFilter};
use super::transport::ChannelBinding;
use crate::config::TablesConfig;

const KEY_SEPARATOR: char = ':';

/// Stable channel name, `<domain>:<identity>[:<suffix>]`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChannelKey(String);

impl ChannelKey {
    /// Build a key; every component must be non-empty and free of `:`
    pub fn new(domain: &str, identity: &Identity, suffix: Option<&str>) -> RealtimeResult<Self> {
        let mut parts = vec![domain, identity.as_str()];
        parts.extend(suffix);

        for part in &parts {
            if part.is_empty() || part.contains(KEY_SEPARATOR) {
                return Err(RealtimeError::InvalidChannelKey(format!(
                    "component '{}' in {:?}",
                    part, parts
                )));
            }
        }

        Ok(Self(parts.join(":")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Domain segment (first component)
    pub fn domain(&self) -> &str {
        self.0.split(KEY_SEPARATOR).next().unwrap_or_default()
    }
}

impl fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ChannelKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Resource kinds a consumer can subscribe to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Domain {
    Notifications,
    Sessions,
    Reflections,
    CoachNotes,
    SharedCoachNotes,
    /// Arbitrary table with a caller-supplied wire filter.
    ///
    /// The key is `<table>:<identity>:<suffix>` and ignores the filter, so
    /// two generic subscriptions with the same table and suffix share one
    /// channel: a later caller joins the existing channel and receives what
    /// the first caller's filter selects. Encode the filter in the suffix
    /// when callers need distinct filters.
    Generic {
        table: String,
        filter: Option<String>,
        suffix: String,
    },
}

impl Domain {
    pub fn generic(table: impl Into<String>, filter: Option<&str>, suffix: impl Into<String>) -> Self {
        Domain::Generic {
            table: table.into(),
            filter: filter.map(str::to_string),
            suffix: suffix.into(),
        }
    }

    /// Key prefix for this domain
    pub fn name(&self) -> &str {
        match self {
            Domain::Notifications => "notifications",
            Domain::Sessions => "sessions",
            Domain::Reflections => "reflections",
            Domain::CoachNotes => "coach_notes",
            Domain::SharedCoachNotes => "shared_coach_notes",
            Domain::Generic { table, .. } => table,
        }
    }

    /// Parse a fixed domain name (everything except `Generic`)
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "notifications" => Some(Domain::Notifications),
            "sessions" => Some(Domain::Sessions),
            "reflections" => Some(Domain::Reflections),
            "coach_notes" => Some(Domain::CoachNotes),
            "shared_coach_notes" => Some(Domain::SharedCoachNotes),
            _ => None,
        }
    }
}

/// Everything needed to open and serve one channel
#[derive(Debug, Clone)]
pub struct ChannelSpec {
    pub key: ChannelKey,
    pub bindings: Vec<ChannelBinding>,
    pub predicate: FilterPredicate,
}

/// Maps domains to channel specs
#[derive(Debug, Clone)]
pub struct SubscriptionFactory {
    schema: String,
    tables: TablesConfig,
}

impl Default for SubscriptionFactory {
    fn default() -> Self {
        Self::new("public", TablesConfig::default())
    }
}

impl SubscriptionFactory {
    pub fn new(schema: impl Into<String>, tables: TablesConfig) -> Self {
        Self {
            schema: schema.into(),
            tables,
        }
    }

    fn binding(&self, table: &str, filter: Option<WireFilter>) -> ChannelBinding {
        ChannelBinding::new(&self.schema, table, filter)
    }

    /// Resolve a domain for the given identity
    pub fn resolve(&self, domain: &Domain, identity: &Identity) -> RealtimeResult<ChannelSpec> {
        let id = identity.as_str();
        let tables = &self.tables;

        let (suffix, bindings, predicate) = match domain {
            Domain::Notifications => (
                None,
                vec![self.binding(&tables.notifications, Some(WireFilter::eq("recipient", id)))],
                FilterPredicate::accept_all(),
            ),
            // Both role filters feed the same channel. A user who is coach and
            // client on one record receives that change twice.
            Domain::Sessions => (
                None,
                vec![
                    self.binding(&tables.sessions, Some(WireFilter::eq("client", id))),
                    self.binding(&tables.sessions, Some(WireFilter::eq("coach", id))),
                ],
                FilterPredicate::accept_all(),
            ),
            Domain::Reflections => (
                None,
                vec![self.binding(&tables.reflections, Some(WireFilter::eq("owner", id)))],
                FilterPredicate::accept_all(),
            ),
            Domain::CoachNotes => (
                None,
                vec![self.binding(&tables.coach_notes, Some(WireFilter::eq("coach", id)))],
                FilterPredicate::accept_all(),
            ),
            Domain::SharedCoachNotes => (
                None,
                vec![self.binding(&tables.coach_notes, Some(WireFilter::eq("client", id)))],
                FilterPredicate::exclude_private(),
            ),
            Domain::Generic {
                table,
                filter,
                suffix,
            } => {
                let filter = filter.as_deref().map(WireFilter::parse).transpose()?;
                (
                    Some(suffix.as_str()),
                    vec![self.binding(table, filter)],
                    FilterPredicate::accept_all(),
                )
            }
        };

        Ok(ChannelSpec {
            key: ChannelKey::new(domain.name(), identity, suffix)?,
            bindings,
            predicate,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn u1() -> Identity {
        Identity::new("u1")
    }

    fn filters(spec: &ChannelSpec) -> Vec<String> {
        spec.bindings
            .iter()
            .map(|b| b.filter.as_ref().map(|f| f.to_string()).unwrap_or_default())
            .collect()
    }

    #[test]
    fn test_fixed_domain_keys_and_filters() {
        let factory = SubscriptionFactory::default();

        let cases = [
            (Domain::Notifications, "notifications:u1", vec!["recipient=eq.u1"]),
            (Domain::Sessions, "sessions:u1", vec!["client=eq.u1", "coach=eq.u1"]),
            (Domain::Reflections, "reflections:u1", vec!["owner=eq.u1"]),
            (Domain::CoachNotes, "coach_notes:u1", vec!["coach=eq.u1"]),
            (Domain::SharedCoachNotes, "shared_coach_notes:u1", vec!["client=eq.u1"]),
        ];

        for (domain, key, expected) in cases {
            let spec = factory.resolve(&domain, &u1()).unwrap();
            assert_eq!(spec.key.as_str(), key);
            assert_eq!(filters(&spec), expected);
        }
    }

    #[test]
    fn test_shared_coach_notes_reads_coach_notes_table() {
        let factory = SubscriptionFactory::default();
        let spec = factory.resolve(&Domain::SharedCoachNotes, &u1()).unwrap();

        assert_eq!(spec.bindings[0].table, "coach_notes");
        assert_eq!(spec.predicate.name(), "exclude_private");
    }

    #[test]
    fn test_generic_domain() {
        let factory = SubscriptionFactory::default();
        let domain = Domain::generic("goals", Some("client_id=eq.c9"), "c9");
        let spec = factory.resolve(&domain, &u1()).unwrap();

        assert_eq!(spec.key.as_str(), "goals:u1:c9");
        assert_eq!(spec.key.domain(), "goals");
        assert_eq!(filters(&spec), vec!["client_id=eq.c9"]);
    }

    #[test]
    fn test_generic_key_ignores_filter() {
        let factory = SubscriptionFactory::default();
        let first = factory
            .resolve(&Domain::generic("goals", Some("client_id=eq.c9"), "c9"), &u1())
            .unwrap();
        let second = factory
            .resolve(&Domain::generic("goals", Some("client_id=eq.c7"), "c9"), &u1())
            .unwrap();
        let separate = factory
            .resolve(&Domain::generic("goals", Some("client_id=eq.c7"), "c7"), &u1())
            .unwrap();

        assert_eq!(first.key, second.key);
        assert_ne!(filters(&first), filters(&second));
        assert_ne!(first.key, separate.key);
    }

    #[test]
    fn test_generic_domain_bad_filter() {
        let factory = SubscriptionFactory::default();
        let domain = Domain::generic("goals", Some("client_id"), "x");

        assert!(matches!(
            factory.resolve(&domain, &u1()),
            Err(RealtimeError::InvalidFilter(_))
        ));
    }

    #[test]
    fn test_keys_are_deterministic_and_identity_scoped() {
        let factory = SubscriptionFactory::default();

        let a = factory.resolve(&Domain::Sessions, &u1()).unwrap().key;
        let b = factory.resolve(&Domain::Sessions, &u1()).unwrap().key;
        let c = factory.resolve(&Domain::Sessions, &Identity::new("u2")).unwrap().key;

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_key_rejects_separator_in_components() {
        assert!(ChannelKey::new("notifications", &Identity::new("a:b"), None).is_err());
        assert!(ChannelKey::new("goals", &u1(), Some("")).is_err());
    }

    #[test]
    fn test_domain_names_round_trip() {
        for name in ["notifications", "sessions", "reflections", "coach_notes", "shared_coach_notes"] {
            assert_eq!(Domain::from_name(name).unwrap().name(), name);
        }
        assert!(Domain::from_name("goals").is_none());
    }
}
