//! Lifetimes and the rules for clearing them.
//!
//! The storage engines don't know when anything goes away; they only keep a
//! separate map per lifetime. Whoever clears -- the ping assembler after a
//! collection, or one of the reset operations -- asks the `LifetimeManager`
//! which of those maps are affected.

use std::fmt;

/// Retention class of a metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifetime {
    /// Lives until the next collection of each store it was recorded into.
    Ping,
    /// Survives collections, goes away when the application resets (for
    /// instance on a version upgrade).
    Application,
    /// Survives collections and application resets. Only a full user reset
    /// removes it.
    User,
}

impl Lifetime {
    /// Every lifetime, shortest first.
    pub const ALL: [Lifetime; 3] = [Lifetime::Ping, Lifetime::Application, Lifetime::User];

    /// Stable index used by the storage engines.
    pub fn index(self) -> usize {
        match self {
            Lifetime::Ping => 0,
            Lifetime::Application => 1,
            Lifetime::User => 2,
        }
    }

    /// Whether values of this lifetime are written to disk.
    pub fn is_persisted(self) -> bool {
        self != Lifetime::Ping
    }

    /// Lowercase name of the lifetime.
    pub fn as_str(self) -> &'static str {
        match self {
            Lifetime::Ping => "ping",
            Lifetime::Application => "application",
            Lifetime::User => "user",
        }
    }
}

impl fmt::Display for Lifetime {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Things that happen to stored data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearEvent {
    /// A store was snapshotted into a payload.
    PingCollected,
    /// The application was reset, e.g. upgraded to a new version.
    ApplicationReset,
    /// The user asked for all telemetry to be forgotten.
    UserReset,
}

/// Maps lifetimes to retention policy.
#[derive(Debug, Default, Clone, Copy)]
pub struct LifetimeManager;

impl LifetimeManager {
    /// Whether `event` clears values of `lifetime`.
    pub fn clears_on(&self, event: ClearEvent, lifetime: Lifetime) -> bool {
        match event {
            ClearEvent::PingCollected => lifetime == Lifetime::Ping,
            ClearEvent::ApplicationReset => lifetime != Lifetime::User,
            ClearEvent::UserReset => true,
        }
    }

    /// The lifetimes `event` clears, shortest first.
    pub fn cleared_by(&self, event: ClearEvent) -> Vec<Lifetime> {
        Lifetime::ALL
            .iter()
            .cloned()
            .filter(|l| self.clears_on(event, *l))
            .collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn collection_only_clears_ping() {
        let lm = LifetimeManager;
        assert_eq!(vec![Lifetime::Ping], lm.cleared_by(ClearEvent::PingCollected));
    }

    #[test]
    fn application_reset_keeps_user() {
        let lm = LifetimeManager;
        assert_eq!(
            vec![Lifetime::Ping, Lifetime::Application],
            lm.cleared_by(ClearEvent::ApplicationReset)
        );
    }

    #[test]
    fn user_reset_clears_everything() {
        let lm = LifetimeManager;
        assert_eq!(Lifetime::ALL.to_vec(), lm.cleared_by(ClearEvent::UserReset));
    }

    #[test]
    fn indices_are_distinct() {
        let mut idx: Vec<usize> = Lifetime::ALL.iter().map(|l| l.index()).collect();
        idx.dedup();
        assert_eq!(3, idx.len());
    }
}
