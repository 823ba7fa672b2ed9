//! Keyset pagination: request parameters and page metadata.
//!
//! Pages are bounded by "key greater than the last key seen" rather than a
//! numeric offset, so concurrent inserts/deletes never shift a page. Keys
//! compare bytewise, which matches both `str` ordering and the `"C"`
//! collation used by the SQL backend.

use serde::{Deserialize, Serialize};

use crate::entity::Entity;

/// Pagination parameters, built explicitly by each caller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    /// Maximum rows to return. `None` means unbounded at the store layer.
    pub amount: Option<u32>,
    /// Only keys starting with this prefix (ignored when empty).
    pub prefix: Option<String>,
    /// Only keys strictly greater than this cursor (ignored when empty).
    pub after: Option<String>,
}

impl PageRequest {
    /// Every row, unbounded.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn with_amount(mut self, amount: u32) -> Self {
        self.amount = Some(amount);
        self
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    pub fn with_after(mut self, after: impl Into<String>) -> Self {
        self.after = Some(after.into());
        self
    }

    /// Effective prefix filter.
    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref().filter(|p| !p.is_empty())
    }

    /// Effective cursor.
    pub fn after(&self) -> Option<&str> {
        self.after.as_deref().filter(|a| !a.is_empty())
    }

    pub fn limit(&self) -> Option<usize> {
        self.amount.map(|a| a as usize)
    }

    /// Whether `key` passes the prefix and cursor predicates.
    ///
    /// The limit is not part of this check: counting must use exactly these
    /// predicates and nothing else.
    pub fn admits(&self, key: &str) -> bool {
        self.prefix().is_none_or(|p| key.starts_with(p))
            && self.after().is_none_or(|a| key > a)
    }

    /// Apply filter, ordering and limit to an in-memory candidate set.
    pub fn paginate<T, I>(&self, rows: I) -> (Vec<T>, Page)
    where
        T: Entity,
        I: IntoIterator<Item = T>,
    {
        let mut matching: Vec<T> = rows.into_iter().filter(|r| self.admits(r.key())).collect();
        matching.sort_by(|a, b| a.key().cmp(b.key()));

        let total = matching.len() as u64;
        if let Some(limit) = self.limit() {
            matching.truncate(limit);
        }

        let page = Page::from_window(self, total, &matching);
        (matching, page)
    }
}

/// Page metadata returned alongside every listing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    /// Rows in this page.
    pub results: usize,
    /// More rows match beyond this page.
    pub has_more: bool,
    /// Cursor for the next page, empty when `has_more` is false.
    pub next_offset: String,
}

impl Page {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Compute page metadata from the unlimited match count and the returned
    /// (limited, ascending) window.
    ///
    /// `total` must come from the same predicates that produced `window`.
    /// An `amount = 0` page never advances the cursor: `next_offset` echoes
    /// the request's `after` (or `""`), even when `has_more` is true. Callers
    /// walking pages must use a positive amount to make progress.
    pub fn from_window<T: Entity>(request: &PageRequest, total: u64, window: &[T]) -> Self {
        if total == 0 {
            return Self::empty();
        }

        let results = window.len();
        let has_more = total > results as u64;
        if !has_more {
            return Self {
                results,
                has_more,
                next_offset: String::new(),
            };
        }

        let next_offset = match window.last() {
            Some(last) => last.key().to_string(),
            None => request.after().unwrap_or_default().to_string(),
        };

        Self {
            results,
            has_more,
            next_offset,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityKind;
    use proptest::prelude::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct Row(String);

    impl Entity for Row {
        const KIND: EntityKind = EntityKind::Policy;

        fn key(&self) -> &str {
            &self.0
        }
    }

    fn rows(keys: &[&str]) -> Vec<Row> {
        keys.iter().map(|k| Row(k.to_string())).collect()
    }

    fn keys(rows: &[Row]) -> Vec<&str> {
        rows.iter().map(|r| r.0.as_str()).collect()
    }

    #[test]
    fn walks_five_policies_two_at_a_time() {
        let all = rows(&["p3", "p1", "p5", "p2", "p4"]);

        let (first, page) = PageRequest::all().with_amount(2).paginate(all.clone());
        assert_eq!(keys(&first), ["p1", "p2"]);
        assert_eq!(
            page,
            Page { results: 2, has_more: true, next_offset: "p2".into() }
        );

        let (second, page) = PageRequest::all()
            .with_amount(2)
            .with_after("p2")
            .paginate(all.clone());
        assert_eq!(keys(&second), ["p3", "p4"]);
        assert_eq!(
            page,
            Page { results: 2, has_more: true, next_offset: "p4".into() }
        );

        let (third, page) = PageRequest::all()
            .with_amount(2)
            .with_after("p4")
            .paginate(all);
        assert_eq!(keys(&third), ["p5"]);
        assert_eq!(
            page,
            Page { results: 1, has_more: false, next_offset: String::new() }
        );
    }

    #[test]
    fn prefix_and_cursor_compose() {
        let all = rows(&["bob", "allen", "alice", "alicia", "al"]);
        let (found, page) = PageRequest::all()
            .with_prefix("al")
            .with_after("alice")
            .paginate(all);
        assert_eq!(keys(&found), ["alicia", "allen"]);
        assert!(!page.has_more);
    }

    #[test]
    fn empty_set_yields_empty_page() {
        let (found, page) = PageRequest::all().with_amount(10).paginate(Vec::<Row>::new());
        assert!(found.is_empty());
        assert_eq!(page, Page::empty());
    }

    #[test]
    fn zero_amount_still_reports_has_more() {
        let all = rows(&["a", "b", "c"]);

        let (found, page) = PageRequest::all().with_amount(0).paginate(all.clone());
        assert!(found.is_empty());
        assert_eq!(page.results, 0);
        assert!(page.has_more);
        assert_eq!(page.next_offset, "");

        let (_, page) = PageRequest::all()
            .with_amount(0)
            .with_after("b")
            .paginate(all.clone());
        assert!(page.has_more);
        assert_eq!(page.next_offset, "b");

        let (_, again) = PageRequest::all()
            .with_amount(0)
            .with_after(page.next_offset.clone())
            .paginate(all.clone());
        assert_eq!(again, page);

        let (_, page) = PageRequest::all().with_amount(0).with_after("c").paginate(all);
        assert!(!page.has_more);
    }

    #[test]
    fn empty_prefix_and_cursor_are_ignored() {
        let request = PageRequest::all().with_prefix("").with_after("");
        assert!(request.admits("anything"));
        assert_eq!(request.prefix(), None);
        assert_eq!(request.after(), None);
    }

    #[test]
    fn ordering_is_bytewise() {
        let (found, _) = PageRequest::all().paginate(rows(&["b", "B", "a", "_", "A"]));
        assert_eq!(keys(&found), ["A", "B", "_", "a", "b"]);
    }

    proptest! {
        #[test]
        fn following_next_offset_visits_every_row_once(
            set in proptest::collection::btree_set("[a-c]{1,4}", 0..40),
            amount in 1u32..7,
            prefix in proptest::option::of("[a-c]{0,2}"),
        ) {
            let all: Vec<Row> = set.iter().cloned().map(Row).collect();
            let expected: Vec<String> = set
                .iter()
                .filter(|k| prefix.as_deref().is_none_or(|p| k.starts_with(p)))
                .cloned()
                .collect();

            let mut seen = Vec::new();
            let mut after: Option<String> = None;
            loop {
                let request = PageRequest {
                    amount: Some(amount),
                    prefix: prefix.clone(),
                    after: after.clone(),
                };
                let (found, page) = request.paginate(all.clone());
                prop_assert_eq!(page.results, found.len());
                prop_assert!(found.len() <= amount as usize);
                seen.extend(found.into_iter().map(|r| r.0));
                if !page.has_more {
                    prop_assert_eq!(page.next_offset.as_str(), "");
                    break;
                }
                after = Some(page.next_offset);
            }

            prop_assert_eq!(seen, expected);
        }
    }
}
