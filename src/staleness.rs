// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Oldest-by-timestamp selection.
//!
//! Credentials and tier members are both picked by "least recently touched".
//! A missing timestamp counts as older than any real one, which is exactly
//! how `Option<DateTime>` orders, so the sort key is `(timestamp, tiebreak)`.

use chrono::{DateTime, Utc};

/// Sort key for staleness: `None` sorts before every timestamp.
pub type Staleness = Option<DateTime<Utc>>;

/// Return the stalest item.
///
/// `key` yields the item's timestamp and a tiebreak; among equal keys the
/// first item in iteration order wins.
pub fn oldest_by<I, K, F>(items: I, mut key: F) -> Option<I::Item>
where
    I: IntoIterator,
    K: Ord,
    F: FnMut(&I::Item) -> (Staleness, K),
{
    items.into_iter().min_by_key(|item| key(item))
}
