//! Partition discovery and reconciliation.
//!
//! Producer and consumer each own a [`PartitionTracker`] and refresh it on
//! their own schedule. A refresh replaces the tracked set wholesale when the
//! broker reports a different set of ids; order never matters, only
//! membership.

use crate::broker::PartitionSource;
use crate::observability::metrics;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info, warn};

/// Default interval between partition refreshes.
pub const DEFAULT_REFRESH_INTERVAL_MS: u64 = 10_000;

/// Ordered set of partition ids of one topic.
///
/// Iteration is ascending by partition id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartitionSet(BTreeSet<i32>);

impl PartitionSet {
    /// Empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of partitions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the set has no partitions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether `partition` is tracked.
    #[must_use]
    pub fn contains(&self, partition: i32) -> bool {
        self.0.contains(&partition)
    }

    /// Partition ids in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = i32> + '_ {
        self.0.iter().copied()
    }
}

impl FromIterator<i32> for PartitionSet {
    fn from_iter<I: IntoIterator<Item = i32>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl fmt::Display for PartitionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.0.iter()).finish()
    }
}

/// Which component a tracker belongs to. Used for logs and metric labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Producer,
    Consumer,
}

impl Role {
    /// Metric label value.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Producer => "producer",
            Role::Consumer => "consumer",
        }
    }
}

/// Outcome of [`PartitionTracker::refresh`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Refresh {
    /// Broker reported the same partitions as currently tracked.
    Unchanged,
    /// The tracked set was replaced; carries the new set.
    Changed(Arc<PartitionSet>),
    /// Metadata could not be fetched; the previous set is kept.
    Failed,
}

/// Tracks the partition set of one topic.
#[derive(Debug)]
pub struct PartitionTracker {
    topic: String,
    role: Role,
    current: RwLock<Arc<PartitionSet>>,
}

impl PartitionTracker {
    /// Create a tracker with an empty partition set.
    #[must_use]
    pub fn new(topic: impl Into<String>, role: Role) -> Self {
        Self {
            topic: topic.into(),
            role,
            current: RwLock::new(Arc::new(PartitionSet::new())),
        }
    }

    /// Topic being tracked.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Snapshot of the tracked partitions.
    ///
    /// Taken under the same lock as replacement, so a snapshot is always a
    /// complete set from one refresh.
    #[must_use]
    pub fn current(&self) -> Arc<PartitionSet> {
        Arc::clone(&self.current.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Forget the tracked partitions so the next successful refresh reports
    /// [`Refresh::Changed`].
    pub fn invalidate(&self) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) =
            Arc::new(PartitionSet::new());
    }

    /// Fetch partition metadata and reconcile the tracked set.
    pub fn refresh<S: PartitionSource + ?Sized>(&self, source: &S) -> Refresh {
        let fresh: PartitionSet = match source.partitions(&self.topic) {
            Ok(ids) => ids.into_iter().collect(),
            Err(e) => {
                warn!(
                    target: "probe.partitions",
                    role = self.role.as_str(),
                    topic = %self.topic,
                    error = %e,
                    "Failed to refresh partitions, keeping previous set"
                );
                metrics::record_partition_refresh(self.role.as_str(), "error");
                return Refresh::Failed;
            }
        };
        metrics::record_partition_refresh(self.role.as_str(), "success");

        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        if **current == fresh {
            debug!(
                target: "probe.partitions",
                role = self.role.as_str(),
                partitions = %fresh,
                "Partitions unchanged"
            );
            return Refresh::Unchanged;
        }

        info!(
            target: "probe.partitions",
            role = self.role.as_str(),
            topic = %self.topic,
            previous = %current,
            current = %fresh,
            "Partition set changed"
        );
        metrics::record_partition_change(self.role.as_str());

        let fresh = Arc::new(fresh);
        *current = Arc::clone(&fresh);
        Refresh::Changed(fresh)
    }
}
