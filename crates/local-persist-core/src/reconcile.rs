//! Startup reconciliation.
//!
//! Picks the registry's initial state once, before any request is served:
//! a non-empty live observation set wins, otherwise the snapshot, otherwise
//! the empty map. Nothing here aborts startup.

use crate::config::DriverConfig;
use crate::error::PersistError;
use crate::live::{LiveSource, Observation};
use crate::snapshot::SnapshotStore;
use crate::volume::{join_mountpoint, VolumeMap};
use std::collections::hash_map::Entry;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use tracing::{error, info, warn};

/// Rule for a name the live source reports with differing paths.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ConflictPolicy {
    /// Keep the first observation and warn about the rest.
    #[default]
    FirstWins,
    /// Keep the last observation and warn about the ones it replaced.
    LastWins,
    /// Discard the whole live result and fall back to the snapshot.
    Reject,
}

impl ConflictPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictPolicy::FirstWins => "first-wins",
            ConflictPolicy::LastWins => "last-wins",
            ConflictPolicy::Reject => "reject",
        }
    }
}

impl FromStr for ConflictPolicy {
    type Err = PersistError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "first-wins" | "first" => Ok(ConflictPolicy::FirstWins),
            "last-wins" | "last" => Ok(ConflictPolicy::LastWins),
            "reject" => Ok(ConflictPolicy::Reject),
            other => Err(PersistError::Config {
                message: format!(
                    "unknown conflict policy {other:?} (expected first-wins, last-wins or reject)"
                ),
            }),
        }
    }
}

impl fmt::Display for ConflictPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the initial state came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateOrigin {
    Live,
    Snapshot,
    Empty,
}

/// A name observed with two different paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conflict {
    pub name: String,
    pub kept: String,
    pub discarded: String,
}

/// Result of startup reconciliation.
#[derive(Debug, Clone)]
pub struct Reconciliation {
    pub state: VolumeMap,
    pub origin: StateOrigin,
    pub conflicts: Vec<Conflict>,
}

/// Observations folded into a map under a conflict policy.
#[derive(Debug, Default)]
pub struct MergedObservations {
    pub state: VolumeMap,
    pub conflicts: Vec<Conflict>,
}

/// Fold observations in order, keeping each source path as reported.
///
/// A source that resolves to `base_dir` itself is dropped, since it would be
/// indistinguishable from an unknown volume.
///
/// Under [`ConflictPolicy::Reject`] the first path is kept in `state`; the
/// caller decides to discard the result when `conflicts` is non-empty.
pub fn merge_observations(
    observations: Vec<Observation>,
    policy: ConflictPolicy,
    base_dir: &Path,
) -> MergedObservations {
    let mut merged = MergedObservations::default();

    for observation in observations {
        if join_mountpoint(base_dir, &observation.source) == base_dir {
            warn!(
                "Ignoring volume {} observed at the base dir itself",
                observation.name
            );
            continue;
        }
        let mountpoint = observation.source;
        match merged.state.entry(observation.name) {
            Entry::Vacant(slot) => {
                slot.insert(mountpoint);
            }
            Entry::Occupied(mut slot) => {
                if *slot.get() == mountpoint {
                    continue;
                }
                let conflict = if policy == ConflictPolicy::LastWins {
                    let previous = slot.insert(mountpoint.clone());
                    Conflict {
                        name: slot.key().clone(),
                        kept: mountpoint,
                        discarded: previous,
                    }
                } else {
                    Conflict {
                        name: slot.key().clone(),
                        kept: slot.get().clone(),
                        discarded: mountpoint,
                    }
                };
                warn!(
                    "Volume {} observed at both {} and {} ({}: keeping {})",
                    conflict.name, conflict.kept, conflict.discarded, policy, conflict.kept
                );
                merged.conflicts.push(conflict);
            }
        }
    }

    merged
}

/// Runs the one-time startup reconciliation for a driver.
pub struct Reconciler<'a> {
    config: &'a DriverConfig,
    source: &'a dyn LiveSource,
    store: &'a SnapshotStore,
}

impl<'a> Reconciler<'a> {
    pub fn new(config: &'a DriverConfig, source: &'a dyn LiveSource, store: &'a SnapshotStore) -> Self {
        Self {
            config,
            source,
            store,
        }
    }

    /// Decide the initial state. Never fails.
    pub async fn run(&self) -> Reconciliation {
        let mut conflicts = Vec::new();

        match self.source.observe(&self.config.name).await {
            Ok(observations) => {
                let merged = merge_observations(
                    observations,
                    self.config.conflict_policy,
                    &self.config.base_dir,
                );
                conflicts = merged.conflicts;

                if self.config.conflict_policy == ConflictPolicy::Reject && !conflicts.is_empty() {
                    let err = PersistError::ConflictingObservations {
                        count: conflicts.len(),
                    };
                    warn!("Discarding live state from {}: {}", self.source.id(), err);
                } else if !merged.state.is_empty() || self.config.accept_empty_live {
                    info!(
                        "Found {} volume(s) via live source {}",
                        merged.state.len(),
                        self.source.id()
                    );
                    self.refresh_snapshot(&merged.state);
                    return Reconciliation {
                        state: merged.state,
                        origin: StateOrigin::Live,
                        conflicts,
                    };
                } else {
                    info!(
                        "Live source {} reported no volumes, loading from snapshot",
                        self.source.id()
                    );
                }
            }
            Err(e) => log_fallback(&e, "loading from snapshot"),
        }

        match self.store.load() {
            Ok(state) => {
                info!(
                    "Found {} volume(s) in snapshot {}",
                    state.len(),
                    self.store.path().display()
                );
                Reconciliation {
                    state,
                    origin: StateOrigin::Snapshot,
                    conflicts,
                }
            }
            Err(PersistError::SnapshotNotFound(path)) => {
                info!("No snapshot at {}, starting empty", path.display());
                self.empty(conflicts)
            }
            Err(e) => {
                log_fallback(&e, "starting empty");
                self.empty(conflicts)
            }
        }
    }

    fn empty(&self, conflicts: Vec<Conflict>) -> Reconciliation {
        Reconciliation {
            state: VolumeMap::new(),
            origin: StateOrigin::Empty,
            conflicts,
        }
    }

    fn refresh_snapshot(&self, state: &VolumeMap) {
        if let Err(e) = self.store.save(state) {
            error!("Failed to refresh snapshot from live state: {}", e);
        }
    }
}

/// Recoverable failures are expected on a cold host; anything else is not.
fn log_fallback(err: &PersistError, fallback: &str) {
    if err.is_recoverable() {
        warn!("{}; {}", err, fallback);
    } else {
        error!("{}; {}", err, fallback);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::live::DisabledSource;
    use async_trait::async_trait;
    use std::path::PathBuf;
    use tempfile::TempDir;

    struct MockSource {
        observations: Vec<Observation>,
    }

    impl MockSource {
        fn with(pairs: &[(&str, &str)]) -> Self {
            Self {
                observations: pairs.iter().map(|(n, s)| Observation::new(*n, *s)).collect(),
            }
        }
    }

    #[async_trait]
    impl LiveSource for MockSource {
        fn id(&self) -> &'static str {
            "mock"
        }

        async fn observe(&self, _driver_name: &str) -> Result<Vec<Observation>> {
            Ok(self.observations.clone())
        }
    }

    fn setup(base_dir: &str) -> (TempDir, DriverConfig, SnapshotStore) {
        let temp_dir = TempDir::new().unwrap();
        let config = DriverConfig::new("test-driver", base_dir, temp_dir.path());
        let store = SnapshotStore::new(&config);
        (temp_dir, config, store)
    }

    fn map(pairs: &[(&str, &str)]) -> VolumeMap {
        pairs
            .iter()
            .map(|(n, m)| (n.to_string(), m.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn test_live_takes_precedence() {
        let (_temp, config, store) = setup("/mnt/base");
        store.save(&map(&[("B", "/p2")])).unwrap();

        let source = MockSource::with(&[("A", "/p1")]);
        let result = Reconciler::new(&config, &source, &store).run().await;

        assert_eq!(result.origin, StateOrigin::Live);
        assert_eq!(result.state, map(&[("A", "/p1")]));
    }

    #[tokio::test]
    async fn test_live_state_refreshes_snapshot() {
        let (_temp, config, store) = setup("/mnt/base");
        store.save(&map(&[("B", "/p2")])).unwrap();

        let source = MockSource::with(&[("A", "/p1")]);
        Reconciler::new(&config, &source, &store).run().await;

        assert_eq!(store.load().unwrap(), map(&[("A", "/p1")]));
    }

    #[tokio::test]
    async fn test_failed_live_falls_back_to_snapshot() {
        let (_temp, config, store) = setup("/mnt/base");
        store.save(&map(&[("B", "/p2")])).unwrap();

        let result = Reconciler::new(&config, &DisabledSource, &store).run().await;

        assert_eq!(result.origin, StateOrigin::Snapshot);
        assert_eq!(result.state, map(&[("B", "/p2")]));
    }

    #[tokio::test]
    async fn test_empty_live_falls_back_to_snapshot() {
        let (_temp, config, store) = setup("/mnt/base");
        store.save(&map(&[("B", "/p2")])).unwrap();

        let source = MockSource::with(&[]);
        let result = Reconciler::new(&config, &source, &store).run().await;

        assert_eq!(result.origin, StateOrigin::Snapshot);
        assert_eq!(result.state, map(&[("B", "/p2")]));
    }

    #[tokio::test]
    async fn test_empty_live_accepted_when_configured() {
        let (_temp, mut config, store) = setup("/mnt/base");
        config.accept_empty_live = true;
        store.save(&map(&[("B", "/p2")])).unwrap();

        let source = MockSource::with(&[]);
        let result = Reconciler::new(&config, &source, &store).run().await;

        assert_eq!(result.origin, StateOrigin::Live);
        assert!(result.state.is_empty());
    }

    #[tokio::test]
    async fn test_nothing_anywhere_is_empty() {
        let (_temp, config, store) = setup("/mnt/base");

        let result = Reconciler::new(&config, &DisabledSource, &store).run().await;

        assert_eq!(result.origin, StateOrigin::Empty);
        assert!(result.state.is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_snapshot_is_empty() {
        let (_temp, config, store) = setup("/mnt/base");
        std::fs::write(store.path(), "{{{{").unwrap();

        let result = Reconciler::new(&config, &DisabledSource, &store).run().await;

        assert_eq!(result.origin, StateOrigin::Empty);
        assert!(result.state.is_empty());
    }

    #[tokio::test]
    async fn test_live_precedence_at_root_base_keeps_paths() {
        let (_temp, config, store) = setup("/");
        store.save(&map(&[("B", "/p2")])).unwrap();

        let source = MockSource::with(&[("A", "/p1")]);
        let result = Reconciler::new(&config, &source, &store).run().await;

        assert_eq!(result.origin, StateOrigin::Live);
        assert_eq!(result.state, map(&[("A", "/p1")]));
        assert_eq!(store.load().unwrap(), map(&[("A", "/p1")]));
        assert_eq!(
            join_mountpoint(&config.base_dir, &result.state["A"]),
            PathBuf::from("/p1")
        );
    }

    #[tokio::test]
    async fn test_live_sources_kept_verbatim_under_base() {
        let (_temp, config, store) = setup("/mnt/base");

        let source = MockSource::with(&[("vol1", "/mnt/base/data/vol1"), ("vol2", "/p1")]);
        let result = Reconciler::new(&config, &source, &store).run().await;

        assert_eq!(
            result.state,
            map(&[("vol1", "/mnt/base/data/vol1"), ("vol2", "/p1")])
        );
        // Inside the base dir the observed path resolves back to itself;
        // outside it the path is contained under the base dir.
        assert_eq!(
            join_mountpoint(&config.base_dir, &result.state["vol1"]),
            PathBuf::from("/mnt/base/data/vol1")
        );
        assert_eq!(
            join_mountpoint(&config.base_dir, &result.state["vol2"]),
            PathBuf::from("/mnt/base/p1")
        );
    }

    #[test]
    fn test_first_wins_keeps_first() {
        let observations = vec![
            Observation::new("A", "/p1"),
            Observation::new("A", "/p9"),
        ];
        let merged = merge_observations(observations, ConflictPolicy::FirstWins, Path::new("/mnt"));

        assert_eq!(merged.state, map(&[("A", "/p1")]));
        assert_eq!(
            merged.conflicts,
            vec![Conflict {
                name: "A".into(),
                kept: "/p1".into(),
                discarded: "/p9".into(),
            }]
        );
    }

    #[test]
    fn test_last_wins_keeps_last() {
        let observations = vec![
            Observation::new("A", "/p1"),
            Observation::new("A", "/p9"),
        ];
        let merged = merge_observations(observations, ConflictPolicy::LastWins, Path::new("/mnt"));

        assert_eq!(merged.state, map(&[("A", "/p9")]));
        assert_eq!(merged.conflicts[0].discarded, "/p1");
    }

    #[test]
    fn test_observation_at_base_dir_is_ignored() {
        let observations = vec![
            Observation::new("A", "/mnt"),
            Observation::new("C", ""),
            Observation::new("B", "/mnt/b"),
        ];
        let merged = merge_observations(observations, ConflictPolicy::FirstWins, Path::new("/mnt"));

        assert_eq!(merged.state, map(&[("B", "/mnt/b")]));
    }

    #[test]
    fn test_identical_duplicates_are_not_conflicts() {
        let observations = vec![
            Observation::new("A", "/p1"),
            Observation::new("B", "/p2"),
            Observation::new("A", "/p1"),
        ];
        let merged = merge_observations(observations, ConflictPolicy::Reject, Path::new("/mnt"));

        assert!(merged.conflicts.is_empty());
        assert_eq!(merged.state.len(), 2);
    }

    #[tokio::test]
    async fn test_reject_policy_falls_back_on_conflict() {
        let (_temp, mut config, store) = setup("/mnt/base");
        config.conflict_policy = ConflictPolicy::Reject;
        store.save(&map(&[("B", "/p2")])).unwrap();

        let source = MockSource::with(&[("A", "/p1"), ("A", "/p9")]);
        let result = Reconciler::new(&config, &source, &store).run().await;

        assert_eq!(result.origin, StateOrigin::Snapshot);
        assert_eq!(result.state, map(&[("B", "/p2")]));
        assert_eq!(result.conflicts.len(), 1);
    }

    #[test]
    fn test_policy_parse_roundtrip() {
        for policy in [
            ConflictPolicy::FirstWins,
            ConflictPolicy::LastWins,
            ConflictPolicy::Reject,
        ] {
            assert_eq!(policy.as_str().parse::<ConflictPolicy>().unwrap(), policy);
        }
        assert!("newest".parse::<ConflictPolicy>().is_err());
    }
}
