//! Version stamps embedded in transaction memos.
//!
//! A transaction written by the sync into a target ledger carries exactly one
//! stamp as a memo prefix:
//!
//! ```text
//! <origin id>@<knowledge at write> | <origin memo>
//! ```
//!
//! The origin id correlates the target transaction with the transaction that
//! produced it, the knowledge tells whether the copy is stale.
//!
//! ```rust
//! use engine::stamp;
//!
//! let memo = stamp::encode("t1", 5, "pizza");
//! assert_eq!(memo, "t1@5 | pizza");
//! assert!(!stamp::needs_update(5, &memo));
//! assert!(stamp::needs_update(6, &memo));
//! ```

use std::collections::HashMap;

use crate::transactions::Transaction;

/// Separates the origin id from the knowledge.
pub const STAMP_DELIMITER: char = '@';
/// Separates the stamp from the original memo.
const MEMO_SEPARATOR: char = '|';

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VersionStamp {
    pub origin_id: String,
    pub knowledge: i64,
}

pub fn encode(origin_id: &str, knowledge: i64, memo: &str) -> String {
    format!("{origin_id}{STAMP_DELIMITER}{knowledge} {MEMO_SEPARATOR} {memo}")
}

/// Returns `None` when the memo carries no stamp or the knowledge is not an
/// integer.
pub fn decode(memo: &str) -> Option<VersionStamp> {
    let (id, knowledge) = stamp_segment(memo).split_once(STAMP_DELIMITER)?;
    let origin_id = id.trim();
    if origin_id.is_empty() {
        return None;
    }
    let knowledge = knowledge.trim().parse::<i64>().ok()?;
    Some(VersionStamp {
        origin_id: origin_id.to_string(),
        knowledge,
    })
}

/// Origin id of a stamped memo, even when the knowledge part is unreadable
/// (memos written before knowledge was recorded).
pub fn origin_id(memo: &str) -> Option<&str> {
    let (id, _) = stamp_segment(memo).split_once(STAMP_DELIMITER)?;
    let id = id.trim();
    (!id.is_empty()).then_some(id)
}

/// The staleness predicate: an unstamped memo always needs a refresh,
/// otherwise only when the ledger has moved past the stamped knowledge.
pub fn needs_update(current_knowledge: i64, memo: &str) -> bool {
    match decode(memo) {
        Some(stamp) => current_knowledge > stamp.knowledge,
        None => true,
    }
}

/// Memo text after the stamp. Unstamped memos are returned whole.
pub fn original_memo(memo: &str) -> &str {
    match memo.split_once(MEMO_SEPARATOR) {
        Some((segment, rest)) if segment.contains(STAMP_DELIMITER) => {
            rest.strip_prefix(' ').unwrap_or(rest)
        }
        _ => memo,
    }
}

fn stamp_segment(memo: &str) -> &str {
    memo.split_once(MEMO_SEPARATOR)
        .map_or(memo, |(segment, _)| segment)
}

/// Target transactions keyed by the origin id of their stamp.
///
/// Built once per pass. Deleted target transactions and unstamped memos are
/// skipped; when two live transactions claim the same origin the first one
/// wins.
#[derive(Clone, Debug, Default)]
pub struct StampIndex {
    by_origin: HashMap<String, Transaction>,
}

impl StampIndex {
    pub fn build(target: &[Transaction]) -> Self {
        Self::collect(target.iter())
    }

    /// Same as [`build`](Self::build) but limited to one account of the target
    /// ledger.
    pub fn for_account(target: &[Transaction], account_id: &str) -> Self {
        Self::collect(target.iter().filter(|t| t.account_id == account_id))
    }

    fn collect<'a>(target: impl Iterator<Item = &'a Transaction>) -> Self {
        let mut by_origin: HashMap<String, Transaction> = HashMap::new();
        for transaction in target.filter(|t| !t.deleted) {
            let Some(origin) = origin_id(transaction.memo_text()) else {
                continue;
            };
            if let Some(existing) = by_origin.get(origin) {
                tracing::warn!(
                    "origin {origin} stamped on both {} and {}, keeping the first",
                    existing.id,
                    transaction.id
                );
                continue;
            }
            by_origin.insert(origin.to_string(), transaction.clone());
        }
        Self { by_origin }
    }

    pub fn get(&self, origin_id: &str) -> Option<&Transaction> {
        self.by_origin.get(origin_id)
    }

    pub fn len(&self) -> usize {
        self.by_origin.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_origin.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;

    fn target(id: &str, memo: &str) -> Transaction {
        let mut t = Transaction::new(
            id,
            "shared-acc",
            NaiveDate::from_ymd_opt(2024, 1, 10).unwrap(),
            -2000,
        );
        t.memo = Some(memo.to_string());
        t
    }

    #[test]
    fn encode_matches_wire_format() {
        assert_eq!(encode("t1", 5, ""), "t1@5 | ");
        assert_eq!(encode("t1", 5, "a | b"), "t1@5 | a | b");
    }

    #[test]
    fn decode_reads_back_the_stamp() {
        let stamp = decode("t1@5 | dinner @ home").unwrap();
        assert_eq!(stamp.origin_id, "t1");
        assert_eq!(stamp.knowledge, 5);
    }

    #[test]
    fn decode_rejects_unstamped_and_non_numeric() {
        assert_eq!(decode("no stamp here"), None);
        assert_eq!(decode(""), None);
        assert_eq!(decode("t1 @ groceries"), None);
        assert_eq!(decode("@5 | x"), None);
        assert_eq!(decode("t1@five | x"), None);
    }

    #[test]
    fn staleness_is_monotonic_in_knowledge() {
        for k in [-1_i64, 0, 5, 1_000_000] {
            for id in ["t1", "2024-01-01", "a-b-c"] {
                for memo in ["", "pizza", "x | y @ z"] {
                    let stamped = encode(id, k, memo);
                    assert!(!needs_update(k, &stamped));
                    assert!(!needs_update(k - 1, &stamped));
                    assert!(needs_update(k + 1, &stamped));
                    assert!(needs_update(k, "no stamp here"));
                }
            }
        }
    }

    #[test]
    fn original_memo_drops_only_the_stamp() {
        assert_eq!(original_memo(&encode("t1", 5, "a | b")), "a | b");
        assert_eq!(original_memo(&encode("t1", 5, "")), "");
        assert_eq!(original_memo("rent | march"), "rent | march");
        assert_eq!(original_memo("no stamp here"), "no stamp here");
    }

    #[test]
    fn legacy_stamp_indexes_but_is_always_stale() {
        let legacy = "t1 @ groceries";
        assert_eq!(origin_id(legacy), Some("t1"));
        assert!(needs_update(0, legacy));
    }

    #[test]
    fn index_does_not_confuse_prefixed_ids() {
        let ledger = vec![target("x10", &encode("t10", 3, "")), target("x1", &encode("t1", 3, ""))];
        let index = StampIndex::build(&ledger);
        assert_eq!(index.get("t1").unwrap().id, "x1");
        assert_eq!(index.get("t10").unwrap().id, "x10");
        assert!(index.get("t").is_none());
    }

    #[test]
    fn index_skips_deleted_and_unstamped() {
        let mut gone = target("x1", &encode("t1", 3, ""));
        gone.deleted = true;
        let ledger = vec![gone, target("x2", "bought by hand")];
        let index = StampIndex::build(&ledger);
        assert!(index.is_empty());
    }

    #[test]
    fn account_scoped_index() {
        let mut other = target("x2", &encode("2024-01-01", 3, ""));
        other.account_id = "other-acc".to_string();
        let ledger = vec![other, target("x1", &encode("2024-01-01", 3, ""))];
        let index = StampIndex::for_account(&ledger, "shared-acc");
        assert_eq!(index.get("2024-01-01").unwrap().id, "x1");
        assert_eq!(index.len(), 1);
    }
}
