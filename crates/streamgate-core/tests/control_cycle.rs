//! Integration tests for the control cycle.
//!
//! These tests drive `Controller` end to end against in-memory router and
//! media-server mocks that record every mutating call in order.

use std::collections::{HashMap, HashSet, VecDeque};
use std::net::IpAddr;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use streamgate_core::allocation::AllocationStrategy;
use streamgate_core::apply::{ApplyOutcome, SkipReason};
use streamgate_core::config::{Config, UsageFailurePolicy};
use streamgate_core::controller::Controller;
use streamgate_core::demand::DemandTransition;
use streamgate_core::error::{ApplyError, SourceError};
use streamgate_core::session::{
    MediaSource, NowPlayingItem, PlayState, ResumeRequest, SessionInfo, UserInfo, UserPolicy,
};
use streamgate_core::source::{MediaServer, UsageSource};

// ─── Mock Infrastructure ────────────────────────────────────────────────

#[derive(Default)]
struct MockRouter {
    /// Queued whole-uplink readings; `None` fails the call. Empty → 0.0.
    readings: Mutex<VecDeque<Option<f64>>>,
    per_ip: Mutex<HashMap<IpAddr, f64>>,
    capacity: Option<f64>,
}

impl MockRouter {
    fn with_readings(readings: &[Option<f64>]) -> Self {
        MockRouter {
            readings: Mutex::new(readings.iter().copied().collect()),
            capacity: Some(100.0),
            ..Default::default()
        }
    }
}

impl UsageSource for MockRouter {
    async fn check(&self) -> Result<(), SourceError> {
        Ok(())
    }

    async fn upload_usage(&self, ip: Option<IpAddr>) -> Result<f64, SourceError> {
        if let Some(ip) = ip {
            return self
                .per_ip
                .lock()
                .unwrap()
                .get(&ip)
                .copied()
                .ok_or(SourceError::Unsupported("per-ip usage"));
        }
        match self.readings.lock().unwrap().pop_front() {
            Some(Some(v)) => Ok(v),
            Some(None) => Err(SourceError::Transport("router unreachable".into())),
            None => Ok(0.0),
        }
    }

    async fn total_capacity(&self) -> Result<f64, SourceError> {
        self.capacity
            .ok_or_else(|| SourceError::Transport("no capacity".into()))
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Call {
    SetPolicy(String, i64),
    Stop(String),
    Resume(ResumeRequest),
}

#[derive(Default)]
struct MockServer {
    sessions: Mutex<Vec<SessionInfo>>,
    fail_sessions: bool,
    users: HashMap<String, UserInfo>,
    policies: Mutex<HashMap<String, UserPolicy>>,
    fail_policy_write: HashSet<String>,
    fail_stop: bool,
    calls: Mutex<Vec<Call>>,
    session_fetches: Mutex<usize>,
}

impl MockServer {
    fn with_sessions(sessions: Vec<SessionInfo>) -> Self {
        MockServer {
            sessions: Mutex::new(sessions),
            ..Default::default()
        }
    }

    fn policy_bps(self, user_id: &str, bps: i64) -> Self {
        self.policies.lock().unwrap().insert(
            user_id.to_string(),
            UserPolicy {
                remote_client_bitrate_limit: bps,
                ..Default::default()
            },
        );
        self
    }

    fn set_sessions(&self, sessions: Vec<SessionInfo>) {
        *self.sessions.lock().unwrap() = sessions;
    }

    fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn stored_bps(&self, user_id: &str) -> i64 {
        self.policies.lock().unwrap()[user_id].remote_client_bitrate_limit
    }
}

impl MediaServer for MockServer {
    async fn check(&self) -> Result<(), SourceError> {
        Ok(())
    }

    async fn active_sessions(&self) -> Result<Vec<SessionInfo>, SourceError> {
        *self.session_fetches.lock().unwrap() += 1;
        if self.fail_sessions {
            return Err(SourceError::Status { code: 500 });
        }
        Ok(self.sessions.lock().unwrap().clone())
    }

    async fn user_info(&self, user_id: &str) -> Result<UserInfo, SourceError> {
        self.users
            .get(user_id)
            .cloned()
            .ok_or(SourceError::Status { code: 404 })
    }

    async fn user_policy(&self, user_id: &str) -> Result<UserPolicy, SourceError> {
        self.policies
            .lock()
            .unwrap()
            .get(user_id)
            .cloned()
            .ok_or(SourceError::Status { code: 404 })
    }

    async fn set_user_policy(&self, user_id: &str, policy: &UserPolicy) -> Result<(), SourceError> {
        if self.fail_policy_write.contains(user_id) {
            return Err(SourceError::Status { code: 500 });
        }
        self.calls.lock().unwrap().push(Call::SetPolicy(
            user_id.to_string(),
            policy.remote_client_bitrate_limit,
        ));
        self.policies
            .lock()
            .unwrap()
            .insert(user_id.to_string(), policy.clone());
        Ok(())
    }

    async fn stop_playback(&self, session_id: &str) -> Result<(), SourceError> {
        if self.fail_stop {
            return Err(SourceError::Transport("stop refused".into()));
        }
        self.calls
            .lock()
            .unwrap()
            .push(Call::Stop(session_id.to_string()));
        Ok(())
    }

    async fn resume_playback(&self, request: &ResumeRequest) -> Result<(), SourceError> {
        self.calls
            .lock()
            .unwrap()
            .push(Call::Resume(request.clone()));
        Ok(())
    }
}

// ─── Fixtures ───────────────────────────────────────────────────────────

fn config() -> Config {
    let mut cfg = Config::default();
    cfg.router.host = "192.168.1.1".into();
    cfg.jellyfin.host = "localhost".into();
    cfg.jellyfin.api_key = "key".into();
    cfg.network.internal_ranges = vec!["192.168.0.0/16".into(), "10.0.0.0/8".into()];
    cfg.bandwidth.total_upload_mbps = 35.0;
    cfg.bandwidth.reserved_bandwidth = 10.0;
    cfg.bandwidth.low_usage_threshold = 10.0;
    cfg.daemon.restart_settle_ms = 0;
    cfg
}

fn playing_session(session_id: &str, user_id: &str, endpoint: &str) -> SessionInfo {
    SessionInfo {
        id: session_id.into(),
        user_id: Some(user_id.into()),
        remote_end_point: Some(endpoint.into()),
        now_playing_item: Some(NowPlayingItem {
            id: "i1".into(),
            bitrate: None,
            media_sources: vec![MediaSource {
                id: "ms1".into(),
                bitrate: None,
            }],
        }),
        play_state: Some(PlayState {
            position_ticks: Some(1),
            media_source_id: Some("ms1".into()),
        }),
    }
}

fn idle_session(session_id: &str, user_id: &str, endpoint: &str) -> SessionInfo {
    SessionInfo {
        id: session_id.into(),
        user_id: Some(user_id.into()),
        remote_end_point: Some(endpoint.into()),
        now_playing_item: None,
        play_state: None,
    }
}

fn outcome<'a>(
    report: &'a streamgate_core::controller::CycleReport,
    user_id: &str,
) -> &'a Result<ApplyOutcome, ApplyError> {
    &report.allocation.as_ref().expect("allocation ran").results[user_id]
}

// ─── Restart protocol ───────────────────────────────────────────────────

#[tokio::test]
async fn changed_limit_on_playing_session_restarts_once() {
    // usage 20 → available 35 - 20 - 10 = 5 for one streamer.
    let router = MockRouter::with_readings(&[Some(20.0)]);
    let server = MockServer::with_sessions(vec![playing_session("s1", "u1", "203.0.113.5:40000")])
        .policy_bps("u1", 10_000_000);
    let mut ctl = Controller::new(&config(), router, server).unwrap();

    let report = ctl.run_cycle(Instant::now()).await;

    assert_eq!(
        outcome(&report, "u1").as_ref().unwrap(),
        &ApplyOutcome::Applied {
            old_bps: 10_000_000,
            new_bps: 5_000_000,
            restarted: true
        }
    );
    assert_eq!(
        ctl.media_server().calls(),
        vec![
            Call::SetPolicy("u1".into(), 5_000_000),
            Call::Stop("s1".into()),
            Call::Resume(ResumeRequest {
                session_id: "s1".into(),
                item_id: "i1".into(),
                position_ticks: 1,
                media_source_id: Some("ms1".into()),
                controlling_user_id: "u1".into(),
            }),
        ]
    );
    assert_eq!(ctl.backup().original("u1"), Some(10_000_000));
}

#[tokio::test]
async fn zero_floor_never_writes_unlimited() {
    // usage 40 over a 35 Mbps uplink leaves nothing; a zero floor must not
    // become an unlimited policy.
    let mut cfg = config();
    cfg.bandwidth.min_per_user = 0.0;
    let router = MockRouter::with_readings(&[Some(40.0)]);
    let server = MockServer::with_sessions(vec![idle_session("s1", "u1", "203.0.113.5:40000")])
        .policy_bps("u1", 10_000_000);
    let mut ctl = Controller::new(&cfg, router, server).unwrap();

    ctl.run_cycle(Instant::now()).await;

    assert_eq!(
        ctl.media_server().calls(),
        vec![Call::SetPolicy("u1".into(), 1)]
    );
    assert_eq!(ctl.media_server().stored_bps("u1"), 1);
}

#[tokio::test]
async fn idle_session_is_not_interrupted() {
    let router = MockRouter::with_readings(&[Some(20.0)]);
    let server = MockServer::with_sessions(vec![idle_session("s1", "u1", "203.0.113.5:40000")])
        .policy_bps("u1", 0);
    let mut ctl = Controller::new(&config(), router, server).unwrap();

    let report = ctl.run_cycle(Instant::now()).await;

    assert!(matches!(
        outcome(&report, "u1"),
        Ok(ApplyOutcome::Applied {
            restarted: false,
            ..
        })
    ));
    assert_eq!(
        ctl.media_server().calls(),
        vec![Call::SetPolicy("u1".into(), 5_000_000)]
    );
}

#[tokio::test]
async fn unchanged_limit_is_skipped() {
    let router = MockRouter::with_readings(&[Some(20.0)]);
    let server = MockServer::with_sessions(vec![playing_session("s1", "u1", "203.0.113.5:40000")])
        .policy_bps("u1", 5_000_000);
    let mut ctl = Controller::new(&config(), router, server).unwrap();

    let report = ctl.run_cycle(Instant::now()).await;

    assert_eq!(
        outcome(&report, "u1").as_ref().unwrap(),
        &ApplyOutcome::Skipped(SkipReason::Unchanged)
    );
    assert!(ctl.media_server().calls().is_empty());
}

#[tokio::test]
async fn change_within_tolerance_is_skipped() {
    let mut cfg = config();
    cfg.bandwidth.change_tolerance_mbps = 0.5;
    let router = MockRouter::with_readings(&[Some(20.0)]);
    let server = MockServer::with_sessions(vec![playing_session("s1", "u1", "203.0.113.5:40000")])
        .policy_bps("u1", 5_400_000);
    let mut ctl = Controller::new(&cfg, router, server).unwrap();

    let report = ctl.run_cycle(Instant::now()).await;

    assert_eq!(
        outcome(&report, "u1").as_ref().unwrap(),
        &ApplyOutcome::Skipped(SkipReason::Unchanged)
    );
    assert!(ctl.media_server().calls().is_empty());
}

#[tokio::test]
async fn failed_stop_skips_resume() {
    let router = MockRouter::with_readings(&[Some(20.0)]);
    let mut server =
        MockServer::with_sessions(vec![playing_session("s1", "u1", "203.0.113.5:40000")])
            .policy_bps("u1", 10_000_000);
    server.fail_stop = true;
    let mut ctl = Controller::new(&config(), router, server).unwrap();

    let report = ctl.run_cycle(Instant::now()).await;

    assert!(matches!(
        outcome(&report, "u1"),
        Err(ApplyError::Stop { session_id, .. }) if session_id == "s1"
    ));
    assert_eq!(
        ctl.media_server().calls(),
        vec![Call::SetPolicy("u1".into(), 5_000_000)]
    );
}

#[tokio::test]
async fn one_failed_user_does_not_block_the_rest() {
    let mut cfg = config();
    cfg.bandwidth.total_upload_mbps = 60.0;
    let router = MockRouter::with_readings(&[Some(20.0)]);
    let mut server = MockServer::with_sessions(vec![
        idle_session("s1", "u1", "203.0.113.5:40000"),
        idle_session("s2", "u2", "198.51.100.7:40000"),
    ])
    .policy_bps("u1", 0)
    .policy_bps("u2", 0);
    server.fail_policy_write.insert("u1".into());
    let mut ctl = Controller::new(&cfg, router, server).unwrap();

    let report = ctl.run_cycle(Instant::now()).await;

    assert!(matches!(
        outcome(&report, "u1"),
        Err(ApplyError::PolicyWrite { .. })
    ));
    assert!(matches!(outcome(&report, "u2"), Ok(ApplyOutcome::Applied { .. })));
    // 60 - 20 - 10 = 30 split two ways.
    assert_eq!(
        ctl.media_server().calls(),
        vec![Call::SetPolicy("u2".into(), 15_000_000)]
    );
}

#[tokio::test]
async fn unreadable_policy_skips_user() {
    let router = MockRouter::with_readings(&[Some(20.0)]);
    let server = MockServer::with_sessions(vec![playing_session("s1", "u1", "203.0.113.5:40000")]);
    let mut ctl = Controller::new(&config(), router, server).unwrap();

    let report = ctl.run_cycle(Instant::now()).await;

    assert_eq!(
        outcome(&report, "u1").as_ref().unwrap(),
        &ApplyOutcome::Skipped(SkipReason::PolicyUnavailable)
    );
    assert!(ctl.media_server().calls().is_empty());
}

// ─── Dry run ────────────────────────────────────────────────────────────

#[tokio::test]
async fn dry_run_never_mutates() {
    let mut cfg = config();
    cfg.daemon.dry_run = true;
    let router = MockRouter::with_readings(&[Some(20.0), Some(30.0)]);
    let server = MockServer::with_sessions(vec![
        playing_session("s1", "u1", "203.0.113.5:40000"),
        idle_session("s2", "u2", "198.51.100.7:40000"),
    ])
    .policy_bps("u1", 10_000_000);
    let mut ctl = Controller::new(&cfg, router, server).unwrap();
    assert!(ctl.is_dry_run());

    let now = Instant::now();
    let report = ctl.run_cycle(now).await;

    assert_eq!(
        outcome(&report, "u1").as_ref().unwrap(),
        &ApplyOutcome::Simulated {
            old_bps: 10_000_000,
            new_bps: 2_500_000,
            would_restart: true
        }
    );
    // No stored policy for u2: reported as unlimited.
    assert_eq!(
        outcome(&report, "u2").as_ref().unwrap(),
        &ApplyOutcome::Simulated {
            old_bps: 0,
            new_bps: 2_500_000,
            would_restart: false
        }
    );

    ctl.run_cycle(now + Duration::from_secs(30)).await;
    assert!(ctl.media_server().calls().is_empty());
    assert!(ctl.backup().is_empty());
    assert!(ctl.restore_limits().await);
    assert!(ctl.media_server().calls().is_empty());
}

// ─── Tracking & demand ──────────────────────────────────────────────────

#[tokio::test]
async fn join_leave_and_high_demand_transitions() {
    let router = MockRouter::with_readings(&[Some(5.0), Some(15.0), Some(15.0)]);
    let server = MockServer::with_sessions(vec![idle_session("s1", "u1", "2.2.2.2:1234")])
        .policy_bps("u1", 0);
    let mut ctl = Controller::new(&config(), router, server).unwrap();
    let t0 = Instant::now();

    let first = ctl.run_cycle(t0).await;
    assert_eq!(first.transition, None);
    assert_eq!(first.diff.joined.iter().collect::<Vec<_>>(), vec!["u1"]);
    assert!(first.diff.left.is_empty());

    // Past the 3-minute window the 5 Mbps sample is gone: smoothed = 15.
    ctl.media_server().set_sessions(vec![]);
    let second = ctl.run_cycle(t0 + Duration::from_secs(200)).await;
    assert_eq!(second.usage.smoothed_mbps, 15.0);
    assert_eq!(second.transition, Some(DemandTransition::EnteredHighDemand));
    assert_eq!(second.diff.left.iter().collect::<Vec<_>>(), vec!["u1"]);
    assert!(second.allocation.is_none());

    let third = ctl.run_cycle(t0 + Duration::from_secs(230)).await;
    assert_eq!(third.transition, None);
    assert!(third.diff.is_empty());
}

#[tokio::test]
async fn internal_and_incomplete_sessions_are_ignored() {
    let router = MockRouter::with_readings(&[Some(0.0)]);
    let mut no_endpoint = idle_session("s3", "u3", "");
    no_endpoint.remote_end_point = None;
    let server = MockServer::with_sessions(vec![
        idle_session("s1", "u1", "192.168.1.50:5000"),
        idle_session("s2", "u2", "10.1.2.3:5000"),
        no_endpoint,
        SessionInfo {
            id: "s4".into(),
            remote_end_point: Some("8.8.8.8:1".into()),
            ..Default::default()
        },
        idle_session("s5", "u5", "not-an-address"),
    ]);
    let mut ctl = Controller::new(&config(), router, server).unwrap();

    let report = ctl.run_cycle(Instant::now()).await;
    assert!(report.streamers.is_empty());
    assert!(report.allocation.is_none());
}

#[tokio::test]
async fn one_streamer_per_user_prefers_playing_session() {
    let router = MockRouter::with_readings(&[Some(20.0)]);
    let server = MockServer::with_sessions(vec![
        idle_session("a-idle", "u1", "203.0.113.5:1"),
        playing_session("z-playing", "u1", "203.0.113.6:1"),
    ])
    .policy_bps("u1", 10_000_000);
    let mut ctl = Controller::new(&config(), router, server).unwrap();

    let report = ctl.run_cycle(Instant::now()).await;
    assert_eq!(report.streamers.len(), 1);
    assert!(ctl
        .media_server()
        .calls()
        .contains(&Call::Stop("z-playing".into())));
}

#[tokio::test]
async fn session_fetch_failure_degrades_to_no_streamers() {
    let router = MockRouter::with_readings(&[Some(20.0)]);
    let mut server = MockServer::with_sessions(vec![idle_session("s1", "u1", "203.0.113.5:1")]);
    server.fail_sessions = true;
    let mut ctl = Controller::new(&config(), router, server).unwrap();

    let report = ctl.run_cycle(Instant::now()).await;
    assert!(report.streamers.is_empty());
    assert!(report.allocation.is_none());
}

// ─── Usage measurement ──────────────────────────────────────────────────

#[tokio::test]
async fn media_server_traffic_is_subtracted() {
    let mut cfg = config();
    cfg.router.media_server_ip = Some("192.168.1.20".into());
    let router = MockRouter::with_readings(&[Some(30.0), Some(10.0)]);
    router
        .per_ip
        .lock()
        .unwrap()
        .insert("192.168.1.20".parse().unwrap(), 25.0);
    let mut ctl = Controller::new(&cfg, router, MockServer::default()).unwrap();
    let t0 = Instant::now();

    assert_eq!(ctl.run_cycle(t0).await.usage.smoothed_mbps, 5.0);
    // Excluded traffic larger than the total clamps the sample at zero.
    let second = ctl.run_cycle(t0 + Duration::from_secs(1)).await;
    assert_eq!(second.usage.smoothed_mbps, 2.5);
}

#[tokio::test]
async fn failed_reading_assumes_idle_by_default() {
    let router = MockRouter::with_readings(&[Some(40.0), None]);
    let mut ctl = Controller::new(&config(), router, MockServer::default()).unwrap();
    let t0 = Instant::now();

    ctl.run_cycle(t0).await;
    let report = ctl.run_cycle(t0 + Duration::from_secs(30)).await;
    assert_eq!(report.usage.smoothed_mbps, 20.0);
    assert!(!report.usage.saturated);
}

#[tokio::test]
async fn failed_reading_can_assume_saturation() {
    let mut cfg = config();
    cfg.bandwidth.on_usage_failure = UsageFailurePolicy::AssumeSaturated;
    cfg.bandwidth.total_upload_mbps = 500.0;
    let router = MockRouter::with_readings(&[None]);
    let server = MockServer::with_sessions(vec![
        idle_session("s1", "u1", "203.0.113.5:1"),
        idle_session("s2", "u2", "203.0.113.6:1"),
    ])
    .policy_bps("u1", 0)
    .policy_bps("u2", 0);
    let mut ctl = Controller::new(&cfg, router, server).unwrap();

    let report = ctl.run_cycle(Instant::now()).await;
    assert!(report.usage.saturated);
    let alloc = report.allocation.as_ref().unwrap();
    assert_eq!(alloc.available_mbps, 0.0);
    assert!(alloc.limits.values().all(|&v| v == 2.0));
}

#[tokio::test]
async fn router_capacity_used_when_not_configured() {
    let mut cfg = config();
    cfg.bandwidth.total_upload_mbps = 0.0;
    let mut router = MockRouter::with_readings(&[Some(20.0)]);
    router.capacity = None;
    let server = MockServer::with_sessions(vec![idle_session("s1", "u1", "203.0.113.5:1")])
        .policy_bps("u1", 0);
    let mut ctl = Controller::new(&cfg, router, server).unwrap();

    let report = ctl.run_cycle(Instant::now()).await;
    let alloc = report.allocation.as_ref().unwrap();
    // Fallback capacity of 100: 100 - 20 - 10 = 70, capped at 50.
    assert_eq!(alloc.total_mbps, 100.0);
    assert_eq!(alloc.limits["u1"], 50.0);
}

#[tokio::test]
async fn low_usage_overrides_configured_strategy() {
    let mut cfg = config();
    cfg.bandwidth.algorithm = AllocationStrategy::PriorityBased;
    cfg.bandwidth.total_upload_mbps = 100.0;
    let router = MockRouter::with_readings(&[Some(4.0), Some(64.0)]);
    let mut server = MockServer::with_sessions(vec![
        idle_session("s1", "admin", "203.0.113.5:1"),
        idle_session("s2", "guest", "203.0.113.6:1"),
    ])
    .policy_bps("admin", 0)
    .policy_bps("guest", 0);
    server.users.insert(
        "admin".into(),
        UserInfo {
            name: "Admin".into(),
            policy: Some(UserPolicy {
                is_administrator: true,
                ..Default::default()
            }),
            ..Default::default()
        },
    );
    let mut ctl = Controller::new(&cfg, router, server).unwrap();
    let t0 = Instant::now();

    let quiet = ctl.run_cycle(t0).await;
    let alloc = quiet.allocation.as_ref().unwrap();
    assert_eq!(alloc.strategy, AllocationStrategy::EqualSplit);
    assert_eq!(alloc.limits["admin"], alloc.limits["guest"]);

    // Smoothed (4 + 64) / 2 = 34 > 10: priority takes over.
    let busy = ctl.run_cycle(t0 + Duration::from_secs(30)).await;
    let alloc = busy.allocation.as_ref().unwrap();
    assert_eq!(alloc.strategy, AllocationStrategy::PriorityBased);
    // 100 - 34 - 10 = 56 split 2:1.
    assert!((alloc.limits["admin"] - 37.333_333).abs() < 1e-3);
    assert!((alloc.limits["guest"] - 18.666_666).abs() < 1e-3);
}

// ─── Restore & lifecycle ────────────────────────────────────────────────

#[tokio::test]
async fn restore_writes_back_original_limits() {
    let router = MockRouter::with_readings(&[Some(20.0), Some(20.0)]);
    let server = MockServer::with_sessions(vec![idle_session("s1", "u1", "203.0.113.5:1")])
        .policy_bps("u1", 12_000_000);
    let mut ctl = Controller::new(&config(), router, server).unwrap();
    let t0 = Instant::now();

    ctl.run_cycle(t0).await;
    assert_eq!(ctl.media_server().stored_bps("u1"), 5_000_000);

    assert!(ctl.restore_limits().await);
    assert_eq!(ctl.media_server().stored_bps("u1"), 12_000_000);
    assert!(ctl.backup().is_empty());
}

#[tokio::test]
async fn run_loop_stops_on_shutdown() {
    let router = MockRouter::with_readings(&[Some(1.0)]);
    let mut ctl = Controller::new(&config(), router, MockServer::default()).unwrap();
    let (tx, rx) = tokio::sync::watch::channel(false);

    let stop = async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(true).unwrap();
    };
    let started = Instant::now();
    tokio::join!(ctl.run(rx), stop);

    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(*ctl.media_server().session_fetches.lock().unwrap(), 1);
}

#[tokio::test]
async fn run_loop_does_not_start_when_already_shut_down() {
    let mut ctl =
        Controller::new(&config(), MockRouter::default(), MockServer::default()).unwrap();
    let (_tx, rx) = tokio::sync::watch::channel(true);
    ctl.run(rx).await;
    assert_eq!(*ctl.media_server().session_fetches.lock().unwrap(), 0);
}
