// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! [`Ranker`]: in-memory score-to-rank index
//!
//! Entities are annotated with a dense 1-based rank derived from their
//! risk score: rank 1 is the highest distinct score, entities sharing a
//! score share a rank, and the rank after a tie group is one past the
//! tie group's rank (no gaps within ties, one gap after).
//!
//! The whole rank table is recomputed from the score map on every
//! mutation.  That is an O(n log n) sort under the write lock; the lock
//! is never held across I/O.  One instance exists per resource kind,
//! created at process start and passed explicitly to the datastore
//! composition that owns its mutations.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::RwLock;
use vigil_common::ResourceKind;

#[derive(Default)]
struct RankerInner {
    scores: HashMap<String, f64>,
    ranks: HashMap<String, u64>,
}

impl RankerInner {
    fn recompute(&mut self) {
        let mut by_score: Vec<(&String, f64)> =
            self.scores.iter().map(|(id, score)| (id, *score)).collect();
        by_score.sort_by(|a, b| {
            b.1.total_cmp(&a.1).then_with(|| a.0.cmp(b.0))
        });

        let mut ranks = HashMap::with_capacity(by_score.len());
        let mut rank = 0u64;
        let mut previous_score = None;
        for (id, score) in by_score {
            if previous_score != Some(score) {
                rank += 1;
                previous_score = Some(score);
            }
            ranks.insert(id.clone(), rank);
        }
        self.ranks = ranks;
    }
}

/// Score-to-rank index for one resource kind
pub struct Ranker {
    inner: RwLock<RankerInner>,
}

impl Default for Ranker {
    fn default() -> Ranker {
        Ranker::new()
    }
}

impl Ranker {
    pub fn new() -> Ranker {
        Ranker { inner: RwLock::new(RankerInner::default()) }
    }

    /// Upserts the score for `id` and recomputes the rank table
    ///
    /// If the score is unchanged for that id this is a no-op: no
    /// recomputation, no observable effect on any other id's rank.
    pub fn add(&self, id: &str, score: f64) {
        let mut inner = self.inner.write().unwrap();
        if inner.scores.get(id) == Some(&score) {
            return;
        }
        inner.scores.insert(id.to_owned(), score);
        inner.recompute();
    }

    /// Removes `id` and recomputes; unknown ids are a no-op
    pub fn remove(&self, id: &str) {
        let mut inner = self.inner.write().unwrap();
        if inner.scores.remove(id).is_none() {
            return;
        }
        inner.recompute();
    }

    /// The rank for `id`, or 0 if unknown
    ///
    /// Rank 0 means "unranked" and consumers must treat it as lowest
    /// priority, never as ahead of rank 1.
    pub fn rank_for_id(&self, id: &str) -> u64 {
        let inner = self.inner.read().unwrap();
        inner.ranks.get(id).copied().unwrap_or(0)
    }

    /// The stored score for `id`, if any
    pub fn score_for_id(&self, id: &str) -> Option<f64> {
        let inner = self.inner.read().unwrap();
        inner.scores.get(id).copied()
    }

    /// Number of ranked entities
    pub fn len(&self) -> usize {
        self.inner.read().unwrap().scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Per-kind rankers, created once and shared by reference
///
/// This is the process-wide wiring point: constructed at startup,
/// handed to each datastore composition explicitly.  Rankers are
/// created lazily but exactly once per kind.
#[derive(Default)]
pub struct RankerSet {
    rankers: Mutex<BTreeMap<ResourceKind, Arc<Ranker>>>,
}

impl RankerSet {
    pub fn new() -> RankerSet {
        RankerSet::default()
    }

    pub fn ranker(&self, kind: ResourceKind) -> Arc<Ranker> {
        let mut rankers = self.rankers.lock().unwrap();
        Arc::clone(
            rankers.entry(kind).or_insert_with(|| Arc::new(Ranker::new())),
        )
    }
}
