//! Link allocation
//!
//! Picks the next link(s) for a site from the coordinator queue, preferring
//! links the site has not shown yet.
//!
//! # Selection
//!
//! ```text
//! unused = queue - used          (by link id, queue order kept)
//!
//! result = unused[..]            tagged "actual"
//!        + used (oldest first)   tagged "fillup", only to reach `count`
//! ```
//!
//! With `persist`, both [`Allocator::pick_one`] and [`Allocator::pick_next`]
//! record the chosen links as used before returning them, inside one locked
//! cycle of the [`LinkStore`], so concurrent calls never hand out the same
//! unused link twice.
//!
//! Running out of links is a normal outcome: an empty result, never an
//! error.

use rand::seq::IteratorRandom;
use std::collections::HashSet;
use std::sync::Arc;

use crate::models::{AllocationResult, Link, Site, UsedLinkRecord, UsedLinks};
use crate::storage::{LinkStore, QueueSource, StoreError};

// ============================================================================
// Selection
// ============================================================================

/// Links in `queue` that are not in `used`, in queue order
pub fn unused_links(queue: &[Link], used: &UsedLinks) -> Vec<Link> {
    let mut seen = HashSet::new();
    queue
        .iter()
        .filter(|link| !used.contains_key(&link.id) && seen.insert(link.id))
        .cloned()
        .collect()
}

/// Up to `count` links: unused ones first, then used ones oldest first
pub fn plan_batch(queue: &[Link], used: &UsedLinks, count: usize) -> Vec<AllocationResult> {
    let mut results: Vec<AllocationResult> = unused_links(queue, used)
        .into_iter()
        .take(count)
        .map(AllocationResult::actual)
        .collect();

    if results.len() < count {
        let mut records: Vec<&UsedLinkRecord> = used.values().collect();
        records.sort_by_key(|record| (record.assigned_at, record.link_id));

        let missing = count - results.len();
        results.extend(
            records
                .into_iter()
                .take(missing)
                .map(|record| AllocationResult::fillup(record.link.clone())),
        );
    }

    results
}

// ============================================================================
// Allocator
// ============================================================================

/// Allocates links for sites backed by a [`LinkStore`]
pub struct Allocator {
    store: Arc<LinkStore>,
    source: Arc<dyn QueueSource>,
    always_show_something: bool,
}

impl Allocator {
    pub fn new(store: Arc<LinkStore>, source: Arc<dyn QueueSource>) -> Self {
        Self {
            store,
            source,
            always_show_something: false,
        }
    }

    /// Fall back to already used links once the queue is exhausted
    pub fn with_always_show_something(mut self, enabled: bool) -> Self {
        self.always_show_something = enabled;
        self
    }

    pub fn always_show_something(&self) -> bool {
        self.always_show_something
    }

    pub fn store(&self) -> &Arc<LinkStore> {
        &self.store
    }

    /// Up to `count` links for `site`
    ///
    /// Used links fill the remainder once the unused ones run out. With
    /// `persist`, every returned link is recorded as used in the same cycle
    /// that planned it. A corrupt used-link file is treated as an empty set.
    pub async fn pick_next(
        &self,
        site: &Site,
        count: usize,
        persist: bool,
    ) -> Result<Vec<AllocationResult>, StoreError> {
        if count == 0 {
            return Ok(Vec::new());
        }

        let queue = self.store.get_queue(site, self.source.as_ref()).await;

        let (results, used_before) = if persist {
            self.store
                .with_used(site, |used| {
                    let used_before = used.len();
                    let results = plan_batch(&queue.links, used, count);
                    for result in &results {
                        used.insert(result.link.id, UsedLinkRecord::now(result.link.clone()));
                    }
                    (results, used_before)
                })
                .await?
        } else {
            let used = match self.store.get_used(site) {
                Ok(used) => used,
                Err(e @ StoreError::Corrupt { .. }) => {
                    tracing::warn!(%site, error = %e, "Ignoring corrupt used-link state");
                    UsedLinks::new()
                }
                Err(e) => return Err(e),
            };
            (plan_batch(&queue.links, &used, count), used.len())
        };

        tracing::debug!(
            %site,
            requested = count,
            allocated = results.len(),
            queue = queue.links.len(),
            used = used_before,
            persist,
            "Batch planned"
        );
        Ok(results)
    }

    /// The next unused link for `site`
    ///
    /// With `persist`, the link is recorded as used before it is returned.
    /// Without it the used set is only read, which is how untrusted or
    /// emulated requests get an answer without consuming the pool.
    pub async fn pick_one(
        &self,
        site: &Site,
        persist: bool,
    ) -> Result<Option<AllocationResult>, StoreError> {
        let queue = self.store.get_queue(site, self.source.as_ref()).await;
        let always_show_something = self.always_show_something;

        let picked = self
            .store
            .with_used(site, move |used| {
                if let Some(link) = unused_links(&queue.links, used).into_iter().next() {
                    if persist {
                        used.insert(link.id, UsedLinkRecord::now(link.clone()));
                    }
                    return Some(AllocationResult::actual(link));
                }

                if !always_show_something {
                    return None;
                }

                used.values()
                    .choose(&mut rand::thread_rng())
                    .map(|record| AllocationResult::fillup(record.link.clone()))
            })
            .await?;

        match &picked {
            Some(result) => tracing::debug!(
                %site,
                link_id = result.link.id,
                kind = result.kind.as_str(),
                persist,
                "Link allocated"
            ),
            None => tracing::debug!(%site, "No link available"),
        }

        Ok(picked)
    }
}

// ============================================================================
// Tests
// ============================================================================
