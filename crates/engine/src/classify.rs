//! Partition of an owner's transactions by the role of their category.

use crate::{CategoryBinding, Transaction, stamp::STAMP_DELIMITER};

/// Result of [`classify`]. The three sets are disjoint.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Classified {
    /// Jointly owed, propagated one-way into the shared ledger.
    pub shared_expense: Vec<Transaction>,
    /// Owed between the owners, mirrored by the balancing coordinator.
    pub balancing: Vec<Transaction>,
    pub other: Vec<Transaction>,
}

impl Classified {
    pub fn len(&self) -> usize {
        self.shared_expense.len() + self.balancing.len() + self.other.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Splits `transactions` according to `binding`.
///
/// Balancing transactions whose memo already carries a stamp delimiter are
/// echoes written by the coordinator into this ledger; they are dropped from
/// every set so they never get mirrored back.
pub fn classify(transactions: &[Transaction], binding: &CategoryBinding) -> Classified {
    let mut classified = Classified::default();
    for transaction in transactions {
        if transaction.has_category(&binding.shared_category_id) {
            classified.shared_expense.push(transaction.clone());
        } else if transaction.has_category(&binding.shared_category_balancing_id) {
            if !is_echo(transaction) {
                classified.balancing.push(transaction.clone());
            }
        } else {
            classified.other.push(transaction.clone());
        }
    }
    classified
}

fn is_echo(transaction: &Transaction) -> bool {
    transaction.memo_text().contains(STAMP_DELIMITER)
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use chrono::NaiveDate;

    use super::*;
    use crate::stamp;

    fn binding() -> CategoryBinding {
        CategoryBinding::new("group", "shared", "balancing").unwrap()
    }

    fn tx(id: &str, category: Option<&str>, memo: Option<&str>) -> Transaction {
        let mut t = Transaction::new(
            id,
            "acc",
            NaiveDate::from_ymd_opt(2024, 1, 10).unwrap(),
            -1000,
        );
        t.category_id = category.map(ToString::to_string);
        t.memo = memo.map(ToString::to_string);
        t
    }

    #[test]
    fn splits_by_category() {
        let input = vec![
            tx("a", Some("shared"), None),
            tx("b", Some("balancing"), Some("rent share")),
            tx("c", Some("groceries"), None),
            tx("d", None, None),
        ];
        let classified = classify(&input, &binding());
        assert_eq!(classified.shared_expense[0].id, "a");
        assert_eq!(classified.balancing[0].id, "b");
        let other: Vec<_> = classified.other.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(other, ["c", "d"]);
    }

    #[test]
    fn stamped_balancing_echoes_are_dropped() {
        let echo = stamp::encode("mirror-1", 7, "rent share");
        let input = vec![
            tx("echo", Some("balancing"), Some(&echo)),
            tx("legacy-echo", Some("balancing"), Some("mirror-0 @ rent")),
        ];
        let classified = classify(&input, &binding());
        assert!(classified.is_empty());
    }

    #[test]
    fn stamped_memo_outside_balancing_is_kept() {
        let input = vec![tx("a", Some("shared"), Some("split @ dinner"))];
        let classified = classify(&input, &binding());
        assert_eq!(classified.shared_expense.len(), 1);
    }

    #[test]
    fn partition_is_disjoint_and_complete() {
        let categories = [Some("shared"), Some("balancing"), Some("other"), None];
        let memos = [None, Some("plain"), Some("x@1 | y")];
        let mut input = Vec::new();
        for (i, category) in categories.iter().enumerate() {
            for (j, memo) in memos.iter().enumerate() {
                input.push(tx(&format!("{i}-{j}"), *category, *memo));
            }
        }
        let classified = classify(&input, &binding());

        let ids = |set: &[Transaction]| -> HashSet<String> {
            set.iter().map(|t| t.id.clone()).collect()
        };
        let shared = ids(&classified.shared_expense);
        let balancing = ids(&classified.balancing);
        let other = ids(&classified.other);
        assert!(shared.is_disjoint(&balancing));
        assert!(shared.is_disjoint(&other));
        assert!(balancing.is_disjoint(&other));

        let expected: HashSet<String> = input
            .iter()
            .filter(|t| !(t.has_category("balancing") && t.memo_text().contains('@')))
            .map(|t| t.id.clone())
            .collect();
        let union: HashSet<String> = shared.union(&balancing).cloned().collect();
        let union: HashSet<String> = union.union(&other).cloned().collect();
        assert_eq!(union, expected);
        assert_eq!(classified.len(), expected.len());
    }
}
