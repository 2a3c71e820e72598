//! Leg cache in front of a directions provider.

use crate::config::Config;
use dashmap::DashMap;
use parcel_core::{Coordinate, DirectionsProvider, LegEstimate, ProviderError};
use std::hash::Hash;
use std::time::{Duration, Instant};

pub trait CacheEntry {
    fn fetched_at(&self) -> Instant;
}

/// Drop entries older than `max_age`, then the oldest ones until at most
/// `max_entries` remain.
pub fn prune_cache<K, V>(cache: &DashMap<K, V>, max_entries: usize, max_age: Duration)
where
    K: Clone + Eq + Hash,
    V: CacheEntry,
{
    let now = Instant::now();
    let mut entries: Vec<(K, Instant)> = cache
        .iter()
        .map(|entry| (entry.key().clone(), entry.value().fetched_at()))
        .collect();

    for (key, fetched_at) in &entries {
        if now.duration_since(*fetched_at) > max_age {
            cache.remove(key);
        }
    }

    if cache.len() <= max_entries {
        return;
    }

    entries.sort_by_key(|(_, fetched_at)| *fetched_at);
    for (key, _) in entries {
        if cache.len() <= max_entries {
            break;
        }
        cache.remove(&key);
    }
}

/// Bit-exact key for a directed leg.
type LegKey = [u64; 4];

fn leg_key(from: &Coordinate, to: &Coordinate) -> LegKey {
    [
        from.latitude().to_bits(),
        from.longitude().to_bits(),
        to.latitude().to_bits(),
        to.longitude().to_bits(),
    ]
}

#[derive(Debug, Clone)]
struct CachedLeg {
    estimate: LegEstimate,
    fetched_at: Instant,
}

impl CacheEntry for CachedLeg {
    fn fetched_at(&self) -> Instant {
        self.fetched_at
    }
}

/// Wraps a provider and remembers successful leg answers for `max_age`.
/// Failures are never cached.
pub struct CachingProvider<P> {
    inner: P,
    legs: DashMap<LegKey, CachedLeg>,
    max_entries: usize,
    max_age: Duration,
}

impl<P: DirectionsProvider> CachingProvider<P> {
    pub fn new(inner: P, max_entries: usize, max_age: Duration) -> Self {
        Self {
            inner,
            legs: DashMap::new(),
            max_entries,
            max_age,
        }
    }

    /// Sized and aged by the station's `leg_cache_*` settings.
    pub fn from_config(inner: P, config: &Config) -> Self {
        Self::new(inner, config.leg_cache_max_entries, config.leg_cache_ttl)
    }

    pub fn cached_legs(&self) -> usize {
        self.legs.len()
    }
}

impl<P: DirectionsProvider> DirectionsProvider for CachingProvider<P> {
    fn leg(&self, from: &Coordinate, to: &Coordinate) -> Result<LegEstimate, ProviderError> {
        let key = leg_key(from, to);
        if let Some(hit) = self.legs.get(&key) {
            if hit.fetched_at.elapsed() <= self.max_age {
                return Ok(hit.estimate.clone());
            }
        }

        let estimate = self.inner.leg(from, to)?;
        self.legs.insert(
            key,
            CachedLeg {
                estimate: estimate.clone(),
                fetched_at: Instant::now(),
            },
        );
        if self.legs.len() > self.max_entries {
            prune_cache(&self.legs, self.max_entries, self.max_age);
        }
        Ok(estimate)
    }
}
