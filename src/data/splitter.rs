// ============================================================
// Layer 4 — Page-Level Train/Validation Splitter
// ============================================================
// Splits dataset entries into training and validation sets by
// PAGE, never by individual entry. Windows cut from one page are
// highly correlated, so a page that contributes to training must
// contribute nothing to validation.
//
// Steps:
//   1. Collect the distinct page identities
//   2. Shuffle the pages (Fisher-Yates via SliceRandom)
//   3. split_idx = round(val_fraction * num_pages), halves to even
//   4. First split_idx pages → validation, the rest → training
//   5. Route every entry by its page identity
//
// The shuffle is the only randomness involved; the caller owns
// the RNG, so a seeded RNG gives a reproducible split.
//
// Reference: rand crate documentation (SliceRandom)

use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::{BTreeSet, HashSet};

use crate::domain::entry::DatasetEntry;

/// Fraction of pages routed to validation unless configured otherwise.
pub const DEFAULT_VAL_FRACTION: f64 = 0.10;

#[derive(Debug, Clone, Default)]
pub struct Split {
    pub train: Vec<DatasetEntry>,
    pub val:   Vec<DatasetEntry>,
}

impl Split {
    pub fn train_pages(&self) -> BTreeSet<String> {
        self.train.iter().map(DatasetEntry::page_id).collect()
    }

    pub fn val_pages(&self) -> BTreeSet<String> {
        self.val.iter().map(DatasetEntry::page_id).collect()
    }
}

/// Partition `entries` into (train, val) with whole pages on each side.
///
/// # Arguments
/// * `entries`      - All resolved entries (consumed)
/// * `val_fraction` - Proportion of pages for validation, e.g. 0.1
/// * `rng`          - Source of the page shuffle
///
/// Entry order inside each side follows the input order.
pub fn split_by_page<R: Rng + ?Sized>(
    entries:      Vec<DatasetEntry>,
    val_fraction: f64,
    rng:          &mut R,
) -> Split {
    // BTreeSet first so the pre-shuffle order does not depend on hashing
    let mut pages: Vec<String> = entries
        .iter()
        .map(DatasetEntry::page_id)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    pages.shuffle(rng);

    let num_pages = pages.len();
    let split_idx = ((val_fraction.clamp(0.0, 1.0) * num_pages as f64).round_ties_even() as usize).min(num_pages);
    let val_pages: HashSet<&str> = pages[..split_idx].iter().map(String::as_str).collect();

    if num_pages < 2 {
        tracing::warn!(
            "Only {} distinct page(s); validation split will be empty",
            num_pages
        );
    } else if split_idx == 0 {
        tracing::warn!(
            "val_fraction {} of {} pages rounds to zero validation pages",
            val_fraction,
            num_pages
        );
    }

    let (val, train): (Vec<_>, Vec<_>) = entries
        .into_iter()
        .partition(|e| val_pages.contains(e.page_id().as_str()));

    tracing::info!(
        "Page split: {} train pages ({} entries), {} validation pages ({} entries)",
        num_pages - split_idx,
        train.len(),
        split_idx,
        val.len(),
    );

    Split { train, val }
}
