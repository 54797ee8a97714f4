//! Named, replaceable predicates over items, AND-combined into a view.

use std::collections::BTreeMap;
use std::fmt;

use regex::Regex;

use crate::errors::TrackerError;
use crate::item::Item;

pub const COMMAND: &str = "command";
pub const DIRECTORY: &str = "directory";
pub const LIVE: &str = "live";

type Predicate = Box<dyn Fn(&Item) -> bool + Send + Sync>;

pub struct Filter {
    label: String,
    predicate: Predicate,
}

impl fmt::Debug for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Filter").field("label", &self.label).finish()
    }
}

impl Filter {
    /// The label doubles as the filter's identity: toggling a category with a
    /// filter of the same label switches it off.
    pub fn new(
        label: impl Into<String>,
        predicate: impl Fn(&Item) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            label: label.into(),
            predicate: Box::new(predicate),
        }
    }

    pub fn command(pattern: &str) -> Result<Self, TrackerError> {
        let regex = Regex::new(pattern)
            .map_err(|err| TrackerError::InvalidFilter(format!("{pattern}: {err}")))?;
        Ok(Self::new(format!("command ~ {pattern}"), move |item| {
            regex.is_match(&item.name)
        }))
    }

    /// Matches items whose directory is `prefix` or lies beneath it. Paths
    /// are compared as plain strings, so remote and local paths never mix.
    pub fn directory(prefix: &str) -> Self {
        let prefix = prefix.to_string();
        Self::new(format!("directory in {prefix}"), move |item| {
            is_path_prefix(&prefix, &item.directory)
        })
    }

    pub fn live() -> Self {
        Self::new("live", Item::is_live)
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn matches(&self, item: &Item) -> bool {
        (self.predicate)(item)
    }
}

fn is_path_prefix(prefix: &str, directory: &str) -> bool {
    let Some(rest) = directory.strip_prefix(prefix) else {
        return false;
    };
    rest.is_empty() || prefix.ends_with('/') || rest.starts_with('/')
}

/// Active filters keyed by category. An item is visible iff it passes every
/// active filter.
#[derive(Debug, Default)]
pub struct FilterSet {
    active: BTreeMap<String, Filter>,
}

impl FilterSet {
    /// Installs `filter` for `category`, replacing whatever was there.
    pub fn set(&mut self, category: impl Into<String>, filter: Filter) -> Option<Filter> {
        self.active.insert(category.into(), filter)
    }

    /// Removes the category when it already holds a filter with the same
    /// label, otherwise installs `filter`. Returns whether the category is
    /// active afterwards.
    pub fn toggle(&mut self, category: impl Into<String>, filter: Filter) -> bool {
        let category = category.into();
        if self
            .active
            .get(&category)
            .is_some_and(|current| current.label == filter.label)
        {
            self.active.remove(&category);
            return false;
        }
        self.active.insert(category, filter);
        true
    }

    pub fn matches(&self, item: &Item) -> bool {
        self.active.values().all(|filter| filter.matches(item))
    }

    pub fn apply<'a>(&self, items: impl IntoIterator<Item = &'a Item>) -> Vec<&'a Item> {
        items.into_iter().filter(|item| self.matches(item)).collect()
    }

    /// `(category, label)` pairs in category order.
    pub fn labels(&self) -> Vec<(&str, &str)> {
        self.active
            .iter()
            .map(|(category, filter)| (category.as_str(), filter.label()))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::{Filter, FilterSet, COMMAND, DIRECTORY, LIVE};
    use crate::item::{Item, ItemId};

    fn fixture() -> Vec<Item> {
        let now = Utc::now();
        let mut items = vec![
            Item::new(ItemId(1), "cargo build", None, "/home/me/app", now),
            Item::new(ItemId(2), "cargo test", None, "/home/me/app/sub", now),
            Item::new(ItemId(3), "ls -la", None, "/home/me/application", now),
            Item::new(ItemId(4), "make", None, "/ssh:box:/home/me/app", now),
        ];
        items[1].finalize(now, Some(0));
        items[2].finalize(now, None);
        items
    }

    fn ids(items: &[&Item]) -> Vec<u64> {
        items.iter().map(|item| item.id.0).collect()
    }

    #[test]
    fn empty_set_passes_everything() {
        let items = fixture();
        assert_eq!(ids(&FilterSet::default().apply(&items)), vec![1, 2, 3, 4]);
    }

    #[test]
    fn command_filter_uses_regex() {
        let items = fixture();
        let mut filters = FilterSet::default();
        filters.set(COMMAND, Filter::command("^cargo (build|check)").expect("valid regex"));
        assert_eq!(ids(&filters.apply(&items)), vec![1]);
    }

    #[test]
    fn invalid_command_pattern_is_rejected() {
        assert!(Filter::command("(unclosed").is_err());
    }

    #[test]
    fn directory_filter_matches_path_prefix_only() {
        let items = fixture();
        let mut filters = FilterSet::default();
        filters.set(DIRECTORY, Filter::directory("/home/me/app"));
        assert_eq!(ids(&filters.apply(&items)), vec![1, 2]);

        filters.set(DIRECTORY, Filter::directory("/ssh:box:"));
        assert_eq!(ids(&filters.apply(&items)), vec![4]);
    }

    #[test]
    fn composition_is_intersection_of_single_filters() {
        let items = fixture();

        let mut command_only = FilterSet::default();
        command_only.set(COMMAND, Filter::command("cargo|make").expect("valid regex"));
        let mut live_only = FilterSet::default();
        live_only.set(LIVE, Filter::live());
        let mut both = FilterSet::default();
        both.set(COMMAND, Filter::command("cargo|make").expect("valid regex"));
        both.set(LIVE, Filter::live());

        let from_command = ids(&command_only.apply(&items));
        let from_live = ids(&live_only.apply(&items));
        let expected: Vec<u64> = from_command
            .iter()
            .copied()
            .filter(|id| from_live.contains(id))
            .collect();

        assert_eq!(ids(&both.apply(&items)), expected);
        assert_eq!(expected, vec![1, 4]);
    }

    #[test]
    fn setting_a_category_replaces_previous_filter() {
        let items = fixture();
        let mut filters = FilterSet::default();
        filters.set(COMMAND, Filter::command("cargo").expect("valid regex"));
        filters.set(COMMAND, Filter::command("^ls").expect("valid regex"));
        assert_eq!(ids(&filters.apply(&items)), vec![3]);
        assert_eq!(filters.labels(), vec![(COMMAND, "command ~ ^ls")]);
    }

    #[test]
    fn toggling_twice_restores_previous_state() {
        let items = fixture();
        let mut filters = FilterSet::default();
        filters.set(DIRECTORY, Filter::directory("/home/me"));
        let before_labels: Vec<(String, String)> = filters
            .labels()
            .into_iter()
            .map(|(c, l)| (c.to_string(), l.to_string()))
            .collect();
        let before = ids(&filters.apply(&items));

        assert!(filters.toggle(LIVE, Filter::live()));
        assert_ne!(ids(&filters.apply(&items)), before);
        assert!(!filters.toggle(LIVE, Filter::live()));

        let after_labels: Vec<(String, String)> = filters
            .labels()
            .into_iter()
            .map(|(c, l)| (c.to_string(), l.to_string()))
            .collect();
        assert_eq!(after_labels, before_labels);
        assert_eq!(ids(&filters.apply(&items)), before);
    }

    #[test]
    fn toggling_with_different_semantics_replaces() {
        let mut filters = FilterSet::default();
        assert!(filters.toggle(COMMAND, Filter::command("a").expect("valid regex")));
        assert!(filters.toggle(COMMAND, Filter::command("b").expect("valid regex")));
        assert_eq!(filters.labels(), vec![(COMMAND, "command ~ b")]);
    }
}
