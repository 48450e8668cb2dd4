//! Line reconciliation for folding an anonymous cart into a user's cart.
//!
//! The database side of a merge lives in the server crate. This module owns
//! the decisions: which source lines are fused, inserted or omitted, and the
//! bookkeeping that guarantees every source line is accounted for exactly
//! once.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::types::ProductId;

/// Maximum number of warning messages retained in [`MergeStats`].
pub const MAX_MERGE_WARNINGS: usize = 10;

/// What to do with one source line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineDisposition {
    /// The destination already holds the product; add the quantities.
    Fuse,
    /// The destination has room; insert the line.
    Insert,
    /// The destination is at its line cap; skip the line.
    Omit,
}

/// Why a source line did not make it into the destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OmitReason {
    /// The destination reached its distinct-line cap.
    LineCap,
    /// Writing the line failed (e.g. the product no longer exists).
    WriteFailed(String),
}

/// Outcome of a merge.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeStats {
    /// Source lines summed into an existing destination line.
    pub fused: u32,
    /// Source lines inserted as new destination lines.
    pub added: u32,
    /// Source lines dropped. Always exact, even when warnings are truncated.
    pub omitted: u32,
    /// Human-readable reasons for omissions, at most [`MAX_MERGE_WARNINGS`].
    pub warnings: Vec<String>,
}

impl MergeStats {
    /// Number of source lines these stats account for.
    #[must_use]
    pub const fn processed(&self) -> u32 {
        self.fused + self.added + self.omitted
    }
}

/// Classifies source lines against the destination cart as they are merged.
///
/// The planner tracks the destination's distinct products, so each
/// successful insert counts against the cap for the lines that follow.
///
/// ```
/// use cartkeeper_core::merge::{LineDisposition, MergePlanner};
/// use cartkeeper_core::ProductId;
///
/// let mut planner = MergePlanner::new(2, [ProductId::new(1)]);
/// assert_eq!(planner.classify(ProductId::new(1)), LineDisposition::Fuse);
/// assert_eq!(planner.classify(ProductId::new(2)), LineDisposition::Insert);
/// planner.record_inserted(ProductId::new(2));
/// assert_eq!(planner.classify(ProductId::new(3)), LineDisposition::Omit);
/// ```
#[derive(Debug, Clone)]
pub struct MergePlanner {
    cap: usize,
    destination: HashSet<ProductId>,
    stats: MergeStats,
}

impl MergePlanner {
    /// Start a merge into a destination holding `destination` products.
    #[must_use]
    pub fn new(cap: usize, destination: impl IntoIterator<Item = ProductId>) -> Self {
        Self {
            cap,
            destination: destination.into_iter().collect(),
            stats: MergeStats::default(),
        }
    }

    /// Decide what to do with a source line for `product_id`.
    #[must_use]
    pub fn classify(&self, product_id: ProductId) -> LineDisposition {
        if self.destination.contains(&product_id) {
            LineDisposition::Fuse
        } else if self.destination.len() < self.cap {
            LineDisposition::Insert
        } else {
            LineDisposition::Omit
        }
    }

    /// Record a successful fuse.
    pub const fn record_fused(&mut self) {
        self.stats.fused += 1;
    }

    /// Record a successful insert. The product now counts against the cap.
    pub fn record_inserted(&mut self, product_id: ProductId) {
        self.destination.insert(product_id);
        self.stats.added += 1;
    }

    /// Record a dropped source line.
    pub fn record_omitted(&mut self, product_id: ProductId, reason: &OmitReason) {
        self.stats.omitted += 1;
        if self.stats.warnings.len() < MAX_MERGE_WARNINGS {
            let message = match reason {
                OmitReason::LineCap => {
                    format!("product {product_id} omitted: cart line limit reached")
                }
                OmitReason::WriteFailed(detail) => {
                    format!("product {product_id} omitted: {detail}")
                }
            };
            self.stats.warnings.push(message);
        }
    }

    /// Finish the merge and return its statistics.
    #[must_use]
    pub fn finish(self) -> MergeStats {
        self.stats
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn ids(range: std::ops::Range<i32>) -> impl Iterator<Item = ProductId> {
        range.map(ProductId::new)
    }

    #[test]
    fn test_full_destination_fuses_overlap_and_omits_new() {
        let mut planner = MergePlanner::new(200, ids(1..201));
        let source = [ProductId::new(5), ProductId::new(900)];

        for product in source {
            match planner.classify(product) {
                LineDisposition::Fuse => planner.record_fused(),
                LineDisposition::Insert => planner.record_inserted(product),
                LineDisposition::Omit => planner.record_omitted(product, &OmitReason::LineCap),
            }
        }

        assert_eq!(planner.classify(ProductId::new(901)), LineDisposition::Omit);
        let stats = planner.finish();
        assert_eq!(stats.fused, 1);
        assert_eq!(stats.added, 0);
        assert_eq!(stats.omitted, 1);
        assert_eq!(stats.warnings.len(), 1);
        assert!(stats.warnings[0].contains("900"));
        assert_eq!(stats.processed(), 2);
    }

    #[test]
    fn test_inserts_consume_remaining_capacity() {
        let mut planner = MergePlanner::new(3, ids(1..3));
        assert_eq!(planner.classify(ProductId::new(10)), LineDisposition::Insert);
        planner.record_inserted(ProductId::new(10));
        assert_eq!(planner.classify(ProductId::new(11)), LineDisposition::Omit);
        // Already inserted products fuse from then on.
        assert_eq!(planner.classify(ProductId::new(10)), LineDisposition::Fuse);
    }

    #[test]
    fn test_warnings_are_capped_but_count_is_exact() {
        let mut planner = MergePlanner::new(0, std::iter::empty());
        for product in ids(1..26) {
            assert_eq!(planner.classify(product), LineDisposition::Omit);
            planner.record_omitted(product, &OmitReason::LineCap);
        }
        let stats = planner.finish();
        assert_eq!(stats.omitted, 25);
        assert_eq!(stats.warnings.len(), MAX_MERGE_WARNINGS);
    }

    #[test]
    fn test_write_failure_is_counted_as_omitted() {
        let mut planner = MergePlanner::new(10, std::iter::empty());
        planner.record_omitted(
            ProductId::new(4),
            &OmitReason::WriteFailed("product no longer exists".to_owned()),
        );
        let stats = planner.finish();
        assert_eq!(stats.omitted, 1);
        assert_eq!(stats.warnings[0], "product 4 omitted: product no longer exists");
    }

    #[test]
    fn test_stats_serialize_shape() {
        let stats = MergeStats {
            fused: 1,
            added: 2,
            omitted: 0,
            warnings: vec![],
        };
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["fused"], 1);
        assert_eq!(json["added"], 2);
        assert!(json["warnings"].as_array().unwrap().is_empty());
    }
}
