// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Allocation statistics for profiling and diagnostics.
//!
//! [`AllocationStats`] is how the effect of lifetime-based sharing becomes
//! visible: with transition memory enabled, `peak_allocated_bytes` should
//! drop because intermediate tensors land in shared blobs.

/// Cumulative statistics about allocator usage.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct AllocationStats {
    /// Total number of allocation requests, including failed ones.
    pub total_allocations: u64,
    /// Number of allocations served from the free list.
    pub cache_hits: u64,
    /// Number of allocations that required fresh memory.
    pub cache_misses: u64,
    /// Number of allocation requests that failed due to budget exhaustion.
    pub oom_count: u64,
    /// High-water mark of live bytes.
    pub peak_allocated_bytes: usize,
    /// Total bytes ever handed out.
    pub cumulative_allocated_bytes: u64,
    /// Number of regions returned to the allocator.
    pub total_releases: u64,
    /// Regions currently alive.
    pub live_regions: u64,
}

impl AllocationStats {
    /// Returns the cache hit ratio as a fraction in `[0.0, 1.0]`.
    pub fn cache_hit_ratio(&self) -> f64 {
        let total = self.cache_hits + self.cache_misses;
        if total == 0 {
            return 0.0;
        }
        self.cache_hits as f64 / total as f64
    }

    /// Adds the counters of `other`, e.g. another target's allocator.
    pub fn accumulate(&mut self, other: &AllocationStats) {
        self.total_allocations += other.total_allocations;
        self.cache_hits += other.cache_hits;
        self.cache_misses += other.cache_misses;
        self.oom_count += other.oom_count;
        self.peak_allocated_bytes += other.peak_allocated_bytes;
        self.cumulative_allocated_bytes += other.cumulative_allocated_bytes;
        self.total_releases += other.total_releases;
        self.live_regions += other.live_regions;
    }

    pub(crate) fn record_cache_hit(&mut self, size: usize) {
        self.total_allocations += 1;
        self.cache_hits += 1;
        self.live_regions += 1;
        self.cumulative_allocated_bytes += size as u64;
    }

    pub(crate) fn record_cache_miss(&mut self, size: usize) {
        self.total_allocations += 1;
        self.cache_misses += 1;
        self.live_regions += 1;
        self.cumulative_allocated_bytes += size as u64;
    }

    pub(crate) fn record_oom(&mut self) {
        self.total_allocations += 1;
        self.oom_count += 1;
    }

    pub(crate) fn record_release(&mut self, _size: usize) {
        self.total_releases += 1;
        self.live_regions = self.live_regions.saturating_sub(1);
    }

    pub(crate) fn update_peak(&mut self, current_bytes: usize) {
        self.peak_allocated_bytes = self.peak_allocated_bytes.max(current_bytes);
    }

    /// Returns a human-readable summary.
    pub fn summary(&self) -> String {
        let peak_kb = self.peak_allocated_bytes as f64 / 1024.0;
        format!(
            "Allocations: {} total ({} hits, {} misses, {:.0}% hit rate), \
             {} OOMs, peak {:.1} KB, {} live regions",
            self.total_allocations,
            self.cache_hits,
            self.cache_misses,
            self.cache_hit_ratio() * 100.0,
            self.oom_count,
            peak_kb,
            self.live_regions,
        )
    }
}
