//! # Controller
//!
//! Single long-lived owner of all cross-cycle state: the rolling usage
//! window, the demand flag, the previous streamer set and the original-
//! limit ledger. One cycle runs to completion before the next starts:
//!
//! ```text
//! measure usage → classify demand → find external streamers → diff
//!     → allocate (one consistent available-bandwidth snapshot) → apply all
//!     → commit streamer set
//! ```
//!
//! Collaborator failures degrade to neutral values and are logged; nothing
//! escapes a cycle, so the next cycle always runs.

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;
use std::time::{Duration, Instant};

use tokio::sync::watch;

use crate::allocation::{Allocation, AllocationEngine, AllocationParams, AllocationStrategy};
use crate::apply::{ApplyOutcome, LimitApplier};
use crate::backup::LimitBackup;
use crate::config::{BandwidthConfig, Config, UsageFailurePolicy};
use crate::demand::{DemandClassifier, DemandTransition};
use crate::error::{ApplyError, ConfigError};
use crate::estimator::UsageEstimator;
use crate::network::{parse_endpoint_ip, IpClassifier};
use crate::session::{SessionInfo, Streamer, StreamerSet};
use crate::source::{MediaServer, UsageSource};
use crate::tracker::{StreamerSetDiff, StreamerTracker};

/// Capacity assumed when the router cannot report one.
pub const DEFAULT_TOTAL_CAPACITY_MBPS: f64 = 100.0;

/// Smoothed usage for one cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UsageReading {
    pub smoothed_mbps: f64,
    /// The raw reading failed and the cycle treats the uplink as full.
    pub saturated: bool,
}

/// What the allocation half of a cycle decided and did.
#[derive(Debug)]
pub struct CycleAllocation {
    pub total_mbps: f64,
    pub available_mbps: f64,
    pub strategy: AllocationStrategy,
    pub limits: Allocation,
    pub results: BTreeMap<String, Result<ApplyOutcome, ApplyError>>,
}

/// Observable result of one cycle.
#[derive(Debug)]
pub struct CycleReport {
    pub usage: UsageReading,
    pub transition: Option<DemandTransition>,
    pub streamers: BTreeSet<String>,
    pub diff: StreamerSetDiff,
    /// `None` when there were no external streamers.
    pub allocation: Option<CycleAllocation>,
}

pub struct Controller<U, M> {
    usage: U,
    server: M,
    classifier: IpClassifier,
    estimator: UsageEstimator,
    demand: DemandClassifier,
    tracker: StreamerTracker,
    engine: AllocationEngine,
    applier: LimitApplier,
    backup: LimitBackup,
    bandwidth: BandwidthConfig,
    media_server_ip: Option<IpAddr>,
    update_interval: Duration,
    backup_user_settings: bool,
}

impl<U: UsageSource, M: MediaServer> Controller<U, M> {
    pub fn new(config: &Config, usage: U, server: M) -> Result<Self, ConfigError> {
        let classifier = IpClassifier::new(&config.network)?;
        let media_server_ip = config
            .router
            .media_server_ip
            .as_deref()
            .map(|ip| {
                ip.parse::<IpAddr>().map_err(|_| {
                    ConfigError::Invalid(format!("router.media_server_ip {ip:?} is not an IP"))
                })
            })
            .transpose()?;
        let bandwidth = config.bandwidth.clone();
        let engine = AllocationEngine::new(
            bandwidth.algorithm,
            AllocationParams {
                bounds: bandwidth.bounds(),
                admin_weight: bandwidth.admin_weight,
            },
            bandwidth.low_usage_threshold,
        );
        let applier = LimitApplier {
            dry_run: config.daemon.dry_run,
            restart_settle: config.daemon.restart_settle(),
            tolerance_bps: crate::mbps_to_bps(bandwidth.change_tolerance_mbps),
            backup_originals: config.daemon.backup_user_settings,
        };

        Ok(Controller {
            usage,
            server,
            classifier,
            estimator: UsageEstimator::new(bandwidth.window()),
            demand: DemandClassifier::new(),
            tracker: StreamerTracker::new(),
            engine,
            applier,
            backup: LimitBackup::new(),
            bandwidth,
            media_server_ip,
            update_interval: Duration::from_secs(config.daemon.update_interval),
            backup_user_settings: config.daemon.backup_user_settings,
        })
    }

    pub fn usage_source(&self) -> &U {
        &self.usage
    }

    pub fn media_server(&self) -> &M {
        &self.server
    }

    pub fn backup(&self) -> &LimitBackup {
        &self.backup
    }

    pub fn is_dry_run(&self) -> bool {
        self.applier.dry_run
    }

    /// Probe both collaborators.
    pub async fn validate_connectivity(&self) -> bool {
        tracing::info!("validating connectivity");
        if let Err(e) = self.usage.check().await {
            tracing::error!(error = %e, "failed to connect to router");
            return false;
        }
        if let Err(e) = self.server.check().await {
            tracing::error!(error = %e, "failed to connect to media server");
            return false;
        }
        tracing::info!("all connectivity tests passed");
        true
    }

    /// Run cycles until `shutdown` flips to `true` (or its sender is dropped).
    ///
    /// The inter-cycle pause is taken in one-second steps so shutdown is
    /// noticed within about a second. A cycle in progress always finishes.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            interval_s = self.update_interval.as_secs(),
            dry_run = self.applier.dry_run,
            "starting main loop"
        );
        'cycles: loop {
            if *shutdown.borrow() {
                break;
            }
            self.run_cycle(Instant::now()).await;

            for _ in 0..self.update_interval.as_secs() {
                if *shutdown.borrow() {
                    break 'cycles;
                }
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_secs(1)) => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break 'cycles;
                        }
                    }
                }
            }
        }
        tracing::info!("main loop stopped");
    }

    /// One full monitoring/adjustment cycle at time `now`.
    pub async fn run_cycle(&mut self, now: Instant) -> CycleReport {
        tracing::debug!("starting monitoring cycle");

        let usage = self.measure_usage(now).await;
        let transition = self
            .demand
            .update(usage.smoothed_mbps, self.bandwidth.low_usage_threshold);
        match transition {
            Some(DemandTransition::EnteredHighDemand) => {
                tracing::info!("network usage exceeded threshold - entering high-demand mode")
            }
            Some(DemandTransition::LeftHighDemand) => {
                tracing::info!("network usage dropped below threshold - leaving high-demand mode")
            }
            None => {}
        }

        let streamers = self.external_streamers().await;
        let current: BTreeSet<String> = streamers.keys().cloned().collect();
        let diff = self.tracker.diff(&current);
        for user_id in &diff.joined {
            if let Some(s) = streamers.get(user_id) {
                tracing::info!(user_id = %user_id, ip = %s.remote_ip, "user started streaming");
            }
        }
        for user_id in &diff.left {
            tracing::info!(user_id = %user_id, "user stopped streaming");
        }

        let allocation = if streamers.is_empty() {
            tracing::debug!("no external streamers, skipping bandwidth calculation");
            None
        } else {
            Some(self.allocate_and_apply(&streamers, usage).await)
        };

        // Replaced only after every user's limit for this cycle is handled.
        self.tracker.commit(current.clone());
        tracing::debug!("monitoring cycle completed");

        CycleReport {
            usage,
            transition,
            streamers: current,
            diff,
            allocation,
        }
    }

    /// Write back every original limit recorded so far.
    pub async fn restore_limits(&mut self) -> bool {
        if !self.backup_user_settings {
            return true;
        }
        if self.applier.dry_run {
            tracing::info!("[DRY RUN] Would restore user bandwidth limits to original values");
            return true;
        }
        if self.backup.is_empty() {
            tracing::debug!("no modified user limits to restore");
            return true;
        }
        let ok = self.backup.restore(&self.server).await;
        if ok {
            tracing::info!("user bandwidth limits restored");
        } else {
            tracing::warn!("failed to restore some user limits");
        }
        ok
    }

    // ── Cycle steps ─────────────────────────────────────────────────

    async fn measure_usage(&mut self, now: Instant) -> UsageReading {
        let raw = match self.usage.upload_usage(None).await {
            Ok(total) => {
                let excluded = self.excluded_usage().await;
                Some((total - excluded).max(0.0))
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to get bandwidth usage");
                None
            }
        };

        match (raw, self.bandwidth.on_usage_failure) {
            (Some(raw), _) => {
                let smoothed = self.estimator.observe(raw, now);
                tracing::debug!(
                    raw_mbps = raw,
                    smoothed_mbps = smoothed,
                    samples = self.estimator.len(),
                    "current upload usage"
                );
                UsageReading {
                    smoothed_mbps: smoothed,
                    saturated: false,
                }
            }
            (None, UsageFailurePolicy::AssumeIdle) => UsageReading {
                smoothed_mbps: self.estimator.observe(0.0, now),
                saturated: false,
            },
            (None, UsageFailurePolicy::AssumeSaturated) => UsageReading {
                smoothed_mbps: self.estimator.current().unwrap_or(0.0),
                saturated: true,
            },
        }
    }

    /// Usage of the co-located media server, subtracted from the total.
    async fn excluded_usage(&self) -> f64 {
        let Some(ip) = self.media_server_ip else {
            return 0.0;
        };
        match self.usage.upload_usage(Some(ip)).await {
            Ok(mbps) => {
                tracing::debug!(ip = %ip, mbps, "subtracting media server traffic from total");
                mbps.max(0.0)
            }
            Err(e) => {
                tracing::warn!(ip = %ip, error = %e, "failed to get media server usage");
                0.0
            }
        }
    }

    async fn external_streamers(&self) -> StreamerSet {
        let sessions = match self.server.active_sessions().await {
            Ok(sessions) => sessions,
            Err(e) => {
                tracing::error!(error = %e, "failed to get active sessions");
                return StreamerSet::new();
            }
        };

        let mut candidates: BTreeMap<String, (IpAddr, SessionInfo)> = BTreeMap::new();
        for session in sessions {
            let Some(user_id) = session.user_id.clone().filter(|id| !id.is_empty()) else {
                continue;
            };
            let Some(endpoint) = session
                .remote_end_point
                .as_deref()
                .filter(|ep| !ep.is_empty())
            else {
                continue;
            };
            let Some(ip) = parse_endpoint_ip(endpoint) else {
                tracing::debug!(user_id = %user_id, endpoint, "unparseable remote endpoint");
                continue;
            };
            if !self.classifier.is_external(ip) {
                continue;
            }
            match candidates.entry(user_id) {
                Entry::Vacant(slot) => {
                    slot.insert((ip, session));
                }
                Entry::Occupied(mut slot) => {
                    if preferred_session(&session, &slot.get().1) {
                        slot.insert((ip, session));
                    }
                }
            }
        }

        let mut streamers = StreamerSet::new();
        for (user_id, (remote_ip, session)) in candidates {
            let user = match self.server.user_info(&user_id).await {
                Ok(user) => Some(user),
                Err(e) => {
                    tracing::warn!(user_id = %user_id, error = %e, "failed to get user info");
                    None
                }
            };
            tracing::debug!(user_id = %user_id, ip = %remote_ip, "external streamer found");
            streamers.insert(
                user_id.clone(),
                Streamer {
                    user_id,
                    remote_ip,
                    session,
                    user,
                },
            );
        }
        tracing::info!(count = streamers.len(), "found external streamers");
        streamers
    }

    async fn total_capacity(&self) -> f64 {
        if self.bandwidth.total_upload_mbps > 0.0 {
            return self.bandwidth.total_upload_mbps;
        }
        match self.usage.total_capacity().await {
            Ok(mbps) if mbps > 0.0 => mbps,
            Ok(mbps) => {
                tracing::warn!(
                    reported_mbps = mbps,
                    fallback_mbps = DEFAULT_TOTAL_CAPACITY_MBPS,
                    "router reported no usable capacity"
                );
                DEFAULT_TOTAL_CAPACITY_MBPS
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    fallback_mbps = DEFAULT_TOTAL_CAPACITY_MBPS,
                    "failed to get total bandwidth"
                );
                DEFAULT_TOTAL_CAPACITY_MBPS
            }
        }
    }

    async fn allocate_and_apply(
        &mut self,
        streamers: &StreamerSet,
        usage: UsageReading,
    ) -> CycleAllocation {
        let total_mbps = self.total_capacity().await;
        let available_mbps = if usage.saturated {
            0.0
        } else {
            total_mbps - usage.smoothed_mbps - self.bandwidth.reserved_bandwidth
        };
        tracing::info!(
            "Total: {:.2} Mbps, Current usage: {:.2} Mbps, Available: {:.2} Mbps",
            total_mbps,
            usage.smoothed_mbps,
            available_mbps
        );

        let (strategy, limits) = self
            .engine
            .calculate(streamers, available_mbps, usage.smoothed_mbps);
        if strategy != self.engine.configured() {
            tracing::debug!("low network usage detected - applying equal split limits");
        }

        let mut results = BTreeMap::new();
        for (user_id, &limit) in &limits {
            let Some(streamer) = streamers.get(user_id) else {
                continue;
            };
            let result = self
                .applier
                .apply(
                    &self.server,
                    &mut self.backup,
                    user_id,
                    limit,
                    &streamer.session,
                )
                .await;
            if let Err(e) = &result {
                tracing::warn!(user_id = %user_id, error = %e, "failed to apply bandwidth limit");
            }
            results.insert(user_id.clone(), result);
        }

        CycleAllocation {
            total_mbps,
            available_mbps,
            strategy,
            limits,
            results,
        }
    }
}

/// Whether `candidate` should replace `current` as a user's tracked session:
/// a playing session wins, then the smaller session ID.
fn preferred_session(candidate: &SessionInfo, current: &SessionInfo) -> bool {
    match (candidate.is_playing(), current.is_playing()) {
        (true, false) => true,
        (false, true) => false,
        _ => candidate.id < current.id,
    }
}
