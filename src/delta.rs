//! Delta between desired and current membership, and the report of its
//! application.

use std::collections::BTreeSet;
use std::fmt;

use crate::address::AddressEntry;

/// Entries to add and remove to turn the current set into the desired one.
///
/// Computed as a plain set difference on canonical entries: a desired
/// `1.2.3.0/24` does not cover a current `1.2.3.1`, the host is removed and
/// the prefix added. `to_add` and `to_remove` are always disjoint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Delta {
    pub to_add: BTreeSet<AddressEntry>,
    pub to_remove: BTreeSet<AddressEntry>,
}

impl Delta {
    pub fn compute(desired: &BTreeSet<AddressEntry>, current: &BTreeSet<AddressEntry>) -> Self {
        Self {
            to_add: desired.difference(current).copied().collect(),
            to_remove: current.difference(desired).copied().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty()
    }

    /// Number of actuation calls needed
    pub fn len(&self) -> usize {
        self.to_add.len() + self.to_remove.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeAction {
    Add,
    Remove,
}

impl fmt::Display for ChangeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeAction::Add => f.write_str("add"),
            ChangeAction::Remove => f.write_str("remove"),
        }
    }
}

/// One add or remove the device did not confirm.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedChange {
    pub action: ChangeAction,
    pub entry: AddressEntry,
    pub reason: String,
}

/// Confirmed outcome of applying a delta to one list.
///
/// Built as an accumulator: each actuation result is folded in with
/// [`ChangeReport::record`], in application order. Only calls the device
/// confirmed appear in `added`/`removed`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeReport {
    pub list: String,
    pub label: String,
    pub added: Vec<AddressEntry>,
    pub removed: Vec<AddressEntry>,
    pub failed: Vec<FailedChange>,
}

impl ChangeReport {
    pub fn new(list: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            list: list.into(),
            label: label.into(),
            ..Self::default()
        }
    }

    /// Fold one actuation result into the report.
    pub fn record(
        mut self,
        action: ChangeAction,
        entry: AddressEntry,
        result: anyhow::Result<()>,
    ) -> Self {
        match (result, action) {
            (Ok(()), ChangeAction::Add) => self.added.push(entry),
            (Ok(()), ChangeAction::Remove) => self.removed.push(entry),
            (Err(e), action) => self.failed.push(FailedChange {
                action,
                entry,
                reason: format!("{:#}", e),
            }),
        }
        self
    }

    /// Number of confirmed changes
    pub fn change_count(&self) -> usize {
        self.added.len() + self.removed.len()
    }

    pub fn has_failures(&self) -> bool {
        !self.failed.is_empty()
    }

    /// Plain-text rendering used for logs and notifications.
    pub fn render(&self) -> String {
        let mut out = format!(
            "List '{}' (label '{}'): {} added, {} removed",
            self.list,
            self.label,
            self.added.len(),
            self.removed.len()
        );
        if self.has_failures() {
            out.push_str(&format!(", {} failed", self.failed.len()));
        }
        for entry in &self.added {
            out.push_str(&format!("\n+ {}", entry));
        }
        for entry in &self.removed {
            out.push_str(&format!("\n- {}", entry));
        }
        for failure in &self.failed {
            out.push_str(&format!(
                "\n! {} {}: {}",
                failure.action, failure.entry, failure.reason
            ));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(items: &[&str]) -> BTreeSet<AddressEntry> {
        items.iter().map(|s| s.parse().unwrap()).collect()
    }

    #[test]
    fn test_delta_no_containment_at_diff_time() {
        let delta = Delta::compute(&set(&["1.2.3.0/24"]), &set(&["1.2.3.1"]));
        assert_eq!(delta.to_add, set(&["1.2.3.0/24"]));
        assert_eq!(delta.to_remove, set(&["1.2.3.1"]));
        assert_eq!(delta.len(), 2);
    }

    #[test]
    fn test_delta_identical_sets_empty() {
        let same = set(&["8.8.8.8", "1.1.1.0/24"]);
        let delta = Delta::compute(&same, &same);
        assert!(delta.is_empty());
        assert_eq!(delta.len(), 0);
    }

    #[test]
    fn test_delta_partial_overlap() {
        let delta = Delta::compute(&set(&["8.8.8.8", "9.9.9.9"]), &set(&["9.9.9.9", "4.4.4.4"]));
        assert_eq!(delta.to_add, set(&["8.8.8.8"]));
        assert_eq!(delta.to_remove, set(&["4.4.4.4"]));
    }

    #[test]
    fn test_report_records_confirmed_only() {
        let entry: AddressEntry = "8.8.8.8".parse().unwrap();
        let other: AddressEntry = "9.9.9.9".parse().unwrap();
        let report = ChangeReport::new("blocklist", "feed")
            .record(ChangeAction::Add, entry, Ok(()))
            .record(ChangeAction::Remove, other, Err(anyhow::anyhow!("no such item")));

        assert_eq!(report.added, vec![entry]);
        assert!(report.removed.is_empty());
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].action, ChangeAction::Remove);
        assert_eq!(report.change_count(), 1);
        assert!(report.has_failures());
    }

    #[test]
    fn test_report_render() {
        let report = ChangeReport::new("blocklist", "feed")
            .record(ChangeAction::Remove, "1.2.3.1".parse().unwrap(), Ok(()))
            .record(ChangeAction::Add, "1.2.3.0/24".parse().unwrap(), Ok(()));
        let text = report.render();
        assert!(text.starts_with("List 'blocklist' (label 'feed'): 1 added, 1 removed"));
        assert!(text.contains("\n+ 1.2.3.0/24"));
        assert!(text.contains("\n- 1.2.3.1"));
        assert!(!text.contains("failed"));
    }
}
