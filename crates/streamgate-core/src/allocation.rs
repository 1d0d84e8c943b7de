//! # Allocation Engine
//!
//! Turns "available uplink capacity + N external streamers" into one Mbps
//! limit per user.
//!
//! ## Policy
//!
//! When smoothed non-streaming usage is at or below the low-usage
//! threshold the engine forces [`AllocationStrategy::EqualSplit`]; above
//! it, the configured strategy takes over. Every strategy clamps each
//! user into `[min_per_user, max_per_user]`. The floor is a guarantee:
//! if `N × min_per_user` exceeds the available capacity the floor is
//! still honoured and the uplink is knowingly oversubscribed.
//!
//! All strategies walk the streamer set in user-ID order and produce a
//! `BTreeMap`, so the result never depends on how the input was built.
//!
//! Known limitation: priority-based redistribution is a single greedy
//! pass. Capacity freed by users hitting the ceiling goes once to the
//! users that were not clamped; if that pushes one of them onto a bound
//! the excess is not redistributed again.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::session::{Streamer, StreamerSet};

/// Per-user limits in Mbps, one entry per streamer.
pub type Allocation = BTreeMap<String, f64>;

/// The closed set of allocation strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationStrategy {
    /// `available / N` for everyone.
    #[default]
    EqualSplit,
    /// Proportional to per-user weight (administrators weigh more).
    PriorityBased,
    /// Playing-item bitrate as a per-user floor hint; equal split for the rest.
    DemandBased,
}

impl AllocationStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            AllocationStrategy::EqualSplit => "equal_split",
            AllocationStrategy::PriorityBased => "priority_based",
            AllocationStrategy::DemandBased => "demand_based",
        }
    }

    /// Compute limits for every streamer. `available_mbps` may be negative.
    pub fn calculate_limits(
        self,
        streamers: &StreamerSet,
        available_mbps: f64,
        params: &AllocationParams,
    ) -> Allocation {
        if streamers.is_empty() {
            return Allocation::new();
        }
        match self {
            AllocationStrategy::EqualSplit => {
                equal_split(streamers, available_mbps, &params.bounds)
            }
            AllocationStrategy::PriorityBased => priority_based(streamers, available_mbps, params),
            AllocationStrategy::DemandBased => {
                demand_based(streamers, available_mbps, &params.bounds)
            }
        }
    }
}

impl std::fmt::Display for AllocationStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-user floor and ceiling in Mbps.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LimitBounds {
    pub min_per_user: f64,
    pub max_per_user: f64,
}

impl LimitBounds {
    /// NaN goes to the floor. Inverted bounds yield the ceiling.
    pub fn clamp(&self, mbps: f64) -> f64 {
        mbps.max(self.min_per_user).min(self.max_per_user)
    }

    fn pins(&self, mbps: f64) -> bool {
        mbps <= self.min_per_user || mbps >= self.max_per_user
    }
}

impl Default for LimitBounds {
    fn default() -> Self {
        LimitBounds {
            min_per_user: 2.0,
            max_per_user: 50.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AllocationParams {
    pub bounds: LimitBounds,
    /// Weight of an administrator relative to a regular user (1.0).
    pub admin_weight: f64,
}

impl Default for AllocationParams {
    fn default() -> Self {
        AllocationParams {
            bounds: LimitBounds::default(),
            admin_weight: 2.0,
        }
    }
}

impl AllocationParams {
    fn weight(&self, streamer: &Streamer) -> f64 {
        if streamer.is_administrator() {
            self.admin_weight
        } else {
            1.0
        }
    }
}

/// Strategy selection plus the shared allocation parameters.
#[derive(Debug, Clone)]
pub struct AllocationEngine {
    configured: AllocationStrategy,
    params: AllocationParams,
    low_usage_threshold: f64,
}

impl AllocationEngine {
    pub fn new(
        configured: AllocationStrategy,
        params: AllocationParams,
        low_usage_threshold: f64,
    ) -> Self {
        AllocationEngine {
            configured,
            params,
            low_usage_threshold,
        }
    }

    pub fn configured(&self) -> AllocationStrategy {
        self.configured
    }

    pub fn params(&self) -> &AllocationParams {
        &self.params
    }

    /// Strategy to use given the cycle's smoothed non-streaming usage.
    pub fn select(&self, smoothed_usage_mbps: f64) -> AllocationStrategy {
        if smoothed_usage_mbps <= self.low_usage_threshold {
            AllocationStrategy::EqualSplit
        } else {
            self.configured
        }
    }

    /// Select a strategy and compute limits with it.
    pub fn calculate(
        &self,
        streamers: &StreamerSet,
        available_mbps: f64,
        smoothed_usage_mbps: f64,
    ) -> (AllocationStrategy, Allocation) {
        let strategy = self.select(smoothed_usage_mbps);
        let limits = strategy.calculate_limits(streamers, available_mbps, &self.params);
        (strategy, limits)
    }
}

// ─── Strategies ─────────────────────────────────────────────────────────────

fn equal_split(streamers: &StreamerSet, available_mbps: f64, bounds: &LimitBounds) -> Allocation {
    let per_user = bounds.clamp(available_mbps / streamers.len() as f64);
    streamers
        .keys()
        .map(|id| (id.clone(), per_user))
        .collect()
}

fn priority_based(
    streamers: &StreamerSet,
    available_mbps: f64,
    params: &AllocationParams,
) -> Allocation {
    let bounds = &params.bounds;
    let available = available_mbps.max(0.0);
    let weights: Vec<(&String, f64)> = streamers
        .iter()
        .map(|(id, s)| (id, params.weight(s)))
        .collect();
    let total_weight: f64 = weights.iter().map(|(_, w)| w).sum();

    // First pass: proportional share, clamped.
    let mut shares: Vec<(&String, f64, f64, bool)> = weights
        .iter()
        .map(|&(id, w)| {
            let raw = available * w / total_weight;
            (id, w, bounds.clamp(raw), bounds.pins(raw))
        })
        .collect();

    // Second pass: hand the clamping surplus (or deficit) to unclamped users.
    let assigned: f64 = shares.iter().map(|(_, _, limit, _)| limit).sum();
    let surplus = available - assigned;
    let free_weight: f64 = shares
        .iter()
        .filter(|(_, _, _, pinned)| !pinned)
        .map(|(_, w, _, _)| w)
        .sum();
    if surplus != 0.0 && free_weight > 0.0 {
        for (_, w, limit, pinned) in shares.iter_mut() {
            if !*pinned {
                *limit = bounds.clamp(*limit + surplus * *w / free_weight);
            }
        }
    }

    shares
        .into_iter()
        .map(|(id, _, limit, _)| (id.clone(), limit))
        .collect()
}

fn demand_based(streamers: &StreamerSet, available_mbps: f64, bounds: &LimitBounds) -> Allocation {
    let available = available_mbps.max(0.0);
    let mut known: Vec<(&String, f64)> = Vec::new();
    let mut unknown: Vec<&String> = Vec::new();
    for (id, streamer) in streamers {
        match streamer.demand_mbps() {
            Some(demand) => known.push((id, bounds.clamp(demand))),
            None => unknown.push(id),
        }
    }

    if known.is_empty() {
        return equal_split(streamers, available_mbps, bounds);
    }

    let hint_total: f64 = known.iter().map(|(_, hint)| hint).sum();
    let floor_reserve = unknown.len() as f64 * bounds.min_per_user;
    let known_budget = (available - floor_reserve).max(0.0);

    let mut out = Allocation::new();
    if hint_total > known_budget {
        // Hints alone oversubscribe: scale them down and give the rest
        // (usually just the floor) to sessions without a known demand.
        let scale = known_budget / hint_total;
        let mut spent = 0.0;
        for (id, hint) in &known {
            let limit = bounds.clamp(hint * scale);
            spent += limit;
            out.insert((*id).clone(), limit);
        }
        if !unknown.is_empty() {
            let per_user = bounds.clamp((available - spent) / unknown.len() as f64);
            for id in unknown {
                out.insert(id.clone(), per_user);
            }
        }
        return out;
    }

    let leftover = available - hint_total;
    if unknown.is_empty() {
        let bonus = leftover / known.len() as f64;
        for (id, hint) in known {
            out.insert(id.clone(), bounds.clamp(hint + bonus));
        }
    } else {
        let per_user = bounds.clamp(leftover / unknown.len() as f64);
        for (id, hint) in known {
            out.insert(id.clone(), hint);
        }
        for id in unknown {
            out.insert(id.clone(), per_user);
        }
    }
    out
}
