//! Lifecycle state machine applied once per entry per reconciliation run.
//!
//! States are `active`, `deprecated` and `disabled`. `disabled` is set by
//! operators and is never changed here. `deprecated_at` records the first
//! deprecation and is never rewritten.

use crate::catalog::model::{Harvest, LifecycleStatus, Manifest};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Reason recorded when the registry itself marks a server deprecated.
pub const UPSTREAM_DEPRECATED_REASON: &str = "Deprecated upstream";

/// What a single transition did to an entry.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    /// New or previously unset entry became active.
    Activated,
    /// Already active and seen again.
    Refreshed,
    /// Deprecated entry seen again.
    Reactivated,
    /// Disabled entry seen; status left alone.
    HeldDisabled,
    /// Active entry not seen this run.
    Deprecated,
    /// Active entry superseded by the same key at a new path.
    Relocated,
    /// Deprecated or disabled entry still not seen.
    StillInactive,
}

/// Applies transitions with a single run timestamp.
#[derive(Clone, Copy, Debug)]
pub struct LifecycleTracker {
    now: DateTime<Utc>,
}

impl LifecycleTracker {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self { now }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    /// Entry is present in this run's record set.
    pub fn mark_seen(&self, manifest: &mut Manifest) -> Transition {
        let lifecycle = &mut manifest.lifecycle;
        let transition = match lifecycle.status {
            Some(LifecycleStatus::Disabled) => Transition::HeldDisabled,
            Some(LifecycleStatus::Deprecated) => {
                lifecycle.status = Some(LifecycleStatus::Active);
                lifecycle.reactivated_at = Some(self.now);
                Transition::Reactivated
            }
            Some(LifecycleStatus::Active) => Transition::Refreshed,
            None | Some(LifecycleStatus::Other(_)) => {
                lifecycle.status = Some(LifecycleStatus::Active);
                Transition::Activated
            }
        };

        let harvest = manifest.harvest.get_or_insert_with(Harvest::default);
        harvest.seen_in_latest_run = true;
        harvest.last_seen_at = Some(self.now);
        transition
    }

    /// Entry is present, but its registry listing marks it deprecated.
    ///
    /// Harvest timestamps refresh like a normal sighting; the status moves to
    /// `deprecated` unless it already is, or is operator-disabled.
    pub fn mark_seen_deprecated(&self, manifest: &mut Manifest) -> Transition {
        let transition = self.deprecate(manifest, UPSTREAM_DEPRECATED_REASON, Transition::Deprecated);
        let harvest = manifest.harvest.get_or_insert_with(Harvest::default);
        harvest.seen_in_latest_run = true;
        harvest.last_seen_at = Some(self.now);
        transition
    }

    /// Entry was known before but is missing from this run's record set.
    pub fn mark_absent(&self, manifest: &mut Manifest, reason: &str) -> Transition {
        let transition = self.deprecate(manifest, reason, Transition::Deprecated);
        let harvest = manifest.harvest.get_or_insert_with(Harvest::default);
        harvest.seen_in_latest_run = false;
        transition
    }

    /// Entry's key was seen this run but placed at a different path.
    pub fn mark_relocated(&self, manifest: &mut Manifest, reason: &str, replaced_by: &str) -> Transition {
        let transition = self.deprecate(manifest, reason, Transition::Relocated);
        if transition == Transition::Relocated {
            manifest.lifecycle.replaced_by = Some(replaced_by.to_string());
        }
        let harvest = manifest.harvest.get_or_insert_with(Harvest::default);
        harvest.seen_in_latest_run = false;
        transition
    }

    fn deprecate(&self, manifest: &mut Manifest, reason: &str, on_change: Transition) -> Transition {
        let lifecycle = &mut manifest.lifecycle;
        match lifecycle.status {
            Some(LifecycleStatus::Deprecated) | Some(LifecycleStatus::Disabled) => {
                Transition::StillInactive
            }
            None | Some(LifecycleStatus::Active) | Some(LifecycleStatus::Other(_)) => {
                lifecycle.status = Some(LifecycleStatus::Deprecated);
                lifecycle.deprecated_at.get_or_insert(self.now);
                lifecycle.reason = Some(reason.to_string());
                on_change
            }
        }
    }
}
