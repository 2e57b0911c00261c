// src/deps/mod.rs

//! Incremental dependency-validity tracking.
//!
//! Each experiment key owns one [`DependencyCollection`]: the set of resource
//! paths it depends on, each mapped to its on-disk existence. A reverse index
//! (resource path -> dependent keys) keeps revalidation proportional to the
//! number of affected collections instead of the whole catalog.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use tracing::debug;

/// The resource set of one experiment, plus existence flags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyCollection {
    resources: BTreeMap<String, bool>,
}

impl DependencyCollection {
    /// All tracked paths exist.
    pub fn valid(&self) -> bool {
        self.resources.values().all(|exists| *exists)
    }

    /// Paths currently missing on disk, in sorted order.
    pub fn missing(&self) -> Vec<String> {
        self.resources
            .iter()
            .filter(|(_, exists)| !**exists)
            .map(|(path, _)| path.clone())
            .collect()
    }

    pub fn resources(&self) -> &BTreeMap<String, bool> {
        &self.resources
    }
}

/// Tracks dependency collections for a set of experiment keys against a
/// fixed root directory.
#[derive(Debug)]
pub struct DependencyTracker {
    root: PathBuf,
    collections: BTreeMap<String, DependencyCollection>,
    /// normalized resource path -> keys depending on it
    reverse: HashMap<String, Vec<String>>,
}

impl DependencyTracker {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            collections: BTreeMap::new(),
            reverse: HashMap::new(),
        }
    }

    /// Canonical resource key: paths under the root are stored relative to
    /// it, everything else keeps its absolute form.
    fn normalize(&self, path: &Path) -> String {
        match path.strip_prefix(&self.root) {
            Ok(rel) => rel.to_string_lossy().replace('\\', "/"),
            Err(_) => path.to_string_lossy().replace('\\', "/"),
        }
    }

    /// Stat one normalized resource key. A transient stat error counts as
    /// non-existence; there is no error surface here.
    fn probe(&self, resource: &str) -> bool {
        let path = Path::new(resource);
        if path.is_absolute() {
            path.exists()
        } else {
            self.root.join(path).exists()
        }
    }

    /// Add or wholesale-replace the dependencies of `key`.
    ///
    /// Every path is normalized against the root and immediately probed, so
    /// the returned collection reflects on-disk truth at call time.
    pub fn add_dependencies<P: AsRef<Path>>(
        &mut self,
        key: &str,
        paths: impl IntoIterator<Item = P>,
    ) -> &DependencyCollection {
        let resources: BTreeMap<String, bool> = paths
            .into_iter()
            .map(|p| {
                let resource = self.normalize(p.as_ref());
                let exists = self.probe(&resource);
                (resource, exists)
            })
            .collect();

        debug!(key, count = resources.len(), "tracking dependencies");
        self.collections
            .insert(key.to_string(), DependencyCollection { resources });
        self.rebuild_reverse_index();

        &self.collections[key]
    }

    /// Stop tracking `key`. No-op when absent.
    pub fn remove_dependencies(&mut self, key: &str) {
        if self.collections.remove(key).is_none() {
            return;
        }
        self.rebuild_reverse_index();
    }

    pub fn collection(&self, key: &str) -> Option<&DependencyCollection> {
        self.collections.get(key)
    }

    fn rebuild_reverse_index(&mut self) {
        self.reverse.clear();
        for (key, info) in &self.collections {
            for resource in info.resources.keys() {
                self.reverse
                    .entry(resource.clone())
                    .or_default()
                    .push(key.clone());
            }
        }
    }

    /// Revalidate every collection that depends on one of `paths`.
    ///
    /// All resources of an affected collection are re-probed, not just the
    /// changed path. Returns the keys whose `valid` flag actually flipped;
    /// paths with no dependents are silently ignored.
    pub fn validate<P: AsRef<Path>>(
        &mut self,
        paths: impl IntoIterator<Item = P>,
    ) -> Vec<String> {
        let mut affected: Vec<String> = Vec::new();
        for path in paths {
            let resource = self.normalize(path.as_ref());
            for key in self.reverse.get(&resource).into_iter().flatten() {
                if !affected.contains(key) {
                    affected.push(key.clone());
                }
            }
        }

        let mut flipped = Vec::new();
        for key in affected {
            let Some(info) = self.collections.get(&key) else {
                continue;
            };
            let was_valid = info.valid();
            let resources: BTreeMap<String, bool> = info
                .resources
                .keys()
                .map(|r| (r.clone(), self.probe(r)))
                .collect();
            let collection = DependencyCollection { resources };
            let is_valid = collection.valid();
            self.collections.insert(key.clone(), collection);
            if was_valid != is_valid {
                debug!(key, valid = is_valid, "dependency validity flipped");
                flipped.push(key);
            }
        }
        flipped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn tracker_with_abc(dir: &Path) -> DependencyTracker {
        for f in ["a", "b", "c"] {
            fs::write(dir.join(f), b"").unwrap();
        }
        let mut tracker = DependencyTracker::new(dir);
        tracker.add_dependencies("a", ["a"]);
        tracker.add_dependencies("b", ["b"]);
        tracker.add_dependencies("c", ["a", "b", "c"]);
        tracker
    }

    #[test]
    fn validates_on_creation() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = tracker_with_abc(dir.path());
        for key in ["a", "b", "c"] {
            assert!(tracker.collection(key).unwrap().valid(), "{key}");
        }
    }

    #[test]
    fn revalidates_only_dependent_collections() {
        let dir = tempfile::tempdir().unwrap();
        let mut tracker = tracker_with_abc(dir.path());

        fs::remove_file(dir.path().join("a")).unwrap();
        // Until validate() runs the stale flags stay in place.
        assert!(tracker.collection("a").unwrap().valid());

        let flipped = tracker.validate(["a"]);
        assert_eq!(flipped, vec!["a".to_string(), "c".to_string()]);
        assert!(!tracker.collection("a").unwrap().valid());
        assert!(tracker.collection("b").unwrap().valid());
        assert!(!tracker.collection("c").unwrap().valid());
        assert_eq!(tracker.collection("a").unwrap().missing(), vec!["a"]);
    }

    #[test]
    fn validate_reports_flips_only() {
        let dir = tempfile::tempdir().unwrap();
        let mut tracker = tracker_with_abc(dir.path());

        assert!(tracker.validate(["a"]).is_empty());
        fs::remove_file(dir.path().join("a")).unwrap();
        assert_eq!(tracker.validate(["a"]).len(), 2);
        // Already invalid: re-validating is a no-op report.
        assert!(tracker.validate(["a"]).is_empty());

        fs::write(dir.path().join("a"), b"").unwrap();
        assert_eq!(tracker.validate(["a"]).len(), 2);
    }

    #[test]
    fn validate_list_of_paths() {
        let dir = tempfile::tempdir().unwrap();
        let mut tracker = tracker_with_abc(dir.path());

        fs::remove_file(dir.path().join("a")).unwrap();
        fs::remove_file(dir.path().join("c")).unwrap();
        let flipped = tracker.validate(["a", "c"]);
        assert_eq!(flipped, vec!["a".to_string(), "c".to_string()]);
        assert!(tracker.collection("b").unwrap().valid());
    }

    #[test]
    fn unknown_paths_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let mut tracker = tracker_with_abc(dir.path());
        assert!(tracker.validate(["nobody-tracks-me"]).is_empty());
    }

    #[test]
    fn absolute_paths_under_root_are_stored_relative() {
        let dir = tempfile::tempdir().unwrap();
        let mut tracker = tracker_with_abc(dir.path());

        let collection = tracker.add_dependencies("d", [dir.path().join("a")]);
        assert!(collection.valid());
        assert!(collection.resources().contains_key("a"));
    }

    #[test]
    fn add_replaces_previous_collection() {
        let dir = tempfile::tempdir().unwrap();
        let mut tracker = tracker_with_abc(dir.path());

        tracker.add_dependencies("c", ["b"]);
        let collection = tracker.collection("c").unwrap();
        assert_eq!(collection.resources().len(), 1);

        // "a" no longer affects "c".
        fs::remove_file(dir.path().join("a")).unwrap();
        assert_eq!(tracker.validate(["a"]), vec!["a".to_string()]);
        assert!(tracker.collection("c").unwrap().valid());
    }

    #[test]
    fn remove_is_noop_when_absent() {
        let dir = tempfile::tempdir().unwrap();
        let mut tracker = tracker_with_abc(dir.path());
        tracker.remove_dependencies("nope");
        tracker.remove_dependencies("a");
        assert!(tracker.collection("a").is_none());
        fs::remove_file(dir.path().join("a")).unwrap();
        // Only "c" still depends on "a".
        assert_eq!(tracker.validate(["a"]), vec!["c".to_string()]);
    }
}
