use crate::feed::parser::FeedEntry;
use crate::storage::FeedCategory;
use serde::{Deserialize, Serialize};

/// Declarative tagging rule deciding which entries of a shared feed belong to
/// a category.
///
/// Sources that publish several language variants in one feed mark entries
/// with category tags. Most are matched positively (`tags`), a few need the
/// inverse (`exclude_tags`) or an extra text match (`keywords`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterRule {
    /// Accepted tags. A tagged entry must carry at least one of them.
    /// Empty means no tagged entry matches.
    pub tags: Vec<String>,
    /// When non-empty, replaces `tags`: a tagged entry is kept unless it
    /// carries one of these.
    pub exclude_tags: Vec<String>,
    /// When non-empty, a tagged entry must also mention one of these in its
    /// title or summary.
    pub keywords: Vec<String>,
    /// Whether entries without any tag belong to this category.
    pub accept_untagged: bool,
}

impl FilterRule {
    pub fn matches(&self, entry: &FeedEntry) -> bool {
        if entry.tags.is_empty() {
            return self.accept_untagged;
        }

        if !self.exclude_tags.is_empty() {
            return !self.exclude_tags.iter().any(|t| entry.tags.contains(t));
        }

        if !self.tags.iter().any(|t| entry.tags.contains(t)) {
            return false;
        }

        self.keywords.is_empty() || self.keywords.iter().any(|k| mentions(entry, k))
    }
}

fn mentions(entry: &FeedEntry, keyword: &str) -> bool {
    let in_title = entry.title.as_deref().is_some_and(|t| t.contains(keyword));
    let in_summary = entry
        .summary
        .as_deref()
        .is_some_and(|s| s.contains(keyword));
    in_title || in_summary
}

/// Narrows a raw entry list to the entries belonging to `category`.
///
/// A category without a rule declares no distinguishing tag and gets every
/// entry. Relative order is preserved.
pub fn filter_entries(entries: Vec<FeedEntry>, category: &FeedCategory) -> Vec<FeedEntry> {
    match &category.rule {
        None => entries,
        Some(rule) => entries.into_iter().filter(|e| rule.matches(e)).collect(),
    }
}
