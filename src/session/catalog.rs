// src/session/catalog.rs

//! Catalog entry bookkeeping: filename validation and duplicate-name
//! detection.

use std::path::Path;

use crate::types::{Catalog, EXPERIMENT_FILENAME_PATTERN};

/// Error title for an identifier-unsafe definition file name.
pub const INVALID_FILENAME_ERROR: &str = "invalid filename";
/// Error title for an unparsable definition.
pub const LOAD_ERROR: &str = "load error";
/// Error title for a logical name shared by several experiments.
pub const DUPLICATE_NAME_ERROR: &str = "duplicate expName";

/// The final path component (without extension) must be identifier-safe.
pub fn valid_experiment_filename(file: &Path) -> bool {
    file.file_stem()
        .and_then(|s| s.to_str())
        .map(|s| EXPERIMENT_FILENAME_PATTERN.is_match(s))
        .unwrap_or(false)
}

/// Re-run duplicate-name detection over the whole catalog.
///
/// Every non-empty `name` shared by two or more keys gets a
/// [`DUPLICATE_NAME_ERROR`] attached to each conflicting entry, listing all
/// conflicting keys in sorted order; entries no longer conflicting have that
/// error removed. Returns the keys whose error set actually changed, so the
/// caller broadcasts only those.
pub fn refresh_duplicate_names(catalog: &mut Catalog) -> Vec<String> {
    let mut by_name: std::collections::BTreeMap<String, Vec<String>> = Default::default();
    for (key, experiment) in catalog.iter() {
        if !experiment.name.is_empty() {
            by_name
                .entry(experiment.name.clone())
                .or_default()
                .push(key.clone());
        }
    }

    let mut changed = Vec::new();
    for (key, experiment) in catalog.iter_mut() {
        let conflict = by_name
            .get(&experiment.name)
            .filter(|keys| keys.len() >= 2);
        let entry_changed = match conflict {
            Some(keys) => experiment.set_error(
                DUPLICATE_NAME_ERROR,
                format!("experiments {keys:?} share the name '{}'", experiment.name),
            ),
            None => experiment.clear_error(DUPLICATE_NAME_ERROR),
        };
        if entry_changed {
            changed.push(key.clone());
        }
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Experiment;

    fn named(key: &str, name: &str) -> Experiment {
        Experiment {
            name: name.to_string(),
            ..Experiment::new(key)
        }
    }

    #[test]
    fn filename_pattern() {
        assert!(valid_experiment_filename(Path::new("foo.psyexp")));
        assert!(valid_experiment_filename(Path::new("sub/dir/My_exp_2.psyexp")));
        // Only [A-Za-z0-9_] is allowed in the stem: extra dots, spaces and
        // hyphens all disqualify the file.
        assert!(!valid_experiment_filename(Path::new("blue.0.1.psyexp")));
        assert!(!valid_experiment_filename(Path::new("My exp-2.psyexp")));
        assert!(!valid_experiment_filename(Path::new("we!rd.psyexp")));
    }

    #[test]
    fn duplicate_names_are_flagged_on_all_conflicting_entries() {
        let mut catalog = Catalog::new();
        catalog.insert("b.psyexp".into(), named("b.psyexp", "blue"));
        catalog.insert("a.psyexp".into(), named("a.psyexp", "blue"));
        catalog.insert("c.psyexp".into(), named("c.psyexp", "green"));

        let changed = refresh_duplicate_names(&mut catalog);
        assert_eq!(changed, vec!["a.psyexp".to_string(), "b.psyexp".to_string()]);

        for key in ["a.psyexp", "b.psyexp"] {
            let errors = &catalog[key].errors;
            assert_eq!(errors.len(), 1);
            assert_eq!(errors[0].title, DUPLICATE_NAME_ERROR);
            // Conflicting keys are listed sorted.
            assert!(errors[0].details.contains(r#"["a.psyexp", "b.psyexp"]"#));
        }
        assert!(catalog["c.psyexp"].errors.is_empty());

        // Stable conflict: nothing changes, nothing to broadcast.
        assert!(refresh_duplicate_names(&mut catalog).is_empty());
    }

    #[test]
    fn resolving_a_conflict_clears_both_sides() {
        let mut catalog = Catalog::new();
        catalog.insert("a.psyexp".into(), named("a.psyexp", "blue"));
        catalog.insert("b.psyexp".into(), named("b.psyexp", "blue"));
        refresh_duplicate_names(&mut catalog);

        if let Some(e) = catalog.get_mut("b.psyexp") {
            e.name = "teal".to_string();
        }
        let changed = refresh_duplicate_names(&mut catalog);
        assert_eq!(changed, vec!["a.psyexp".to_string(), "b.psyexp".to_string()]);
        assert!(catalog["a.psyexp"].errors.is_empty());
        assert!(catalog["b.psyexp"].errors.is_empty());
    }

    #[test]
    fn empty_names_never_conflict() {
        let mut catalog = Catalog::new();
        catalog.insert("a.psyexp".into(), Experiment::new("a.psyexp"));
        catalog.insert("b.psyexp".into(), Experiment::new("b.psyexp"));
        assert!(refresh_duplicate_names(&mut catalog).is_empty());
        assert!(catalog["a.psyexp"].errors.is_empty());
    }
}
