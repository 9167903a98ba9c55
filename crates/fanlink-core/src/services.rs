// ── Injected collaborators ──
//
// Policies the engine consults but does not own: receive timeouts, fault
// recovery and device naming. `Services::new` wires the defaults; tests
// and embedders swap in their own implementations.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use rand::seq::SliceRandom;
use serde::Serialize;
use strum::{Display, IntoStaticStr};
use tokio::sync::{Mutex as AsyncMutex, MutexGuard};

use crate::error::CoreError;

// ── Timeouts ────────────────────────────────────────────────────────

/// Kind of traffic a receive wait belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "snake_case")]
pub enum TrafficClass {
    /// Handshake exchanges.
    Heartbeat,
    /// Steady-state exchange replies.
    Data,
    /// Listener receive polling.
    Discovery,
}

pub trait TimeoutPolicy: Send + Sync + fmt::Debug {
    fn timeout_for(&self, class: TrafficClass) -> Duration;
}

/// Every class waits one exchange period.
#[derive(Debug, Clone, Copy)]
pub struct PeriodTimeouts {
    pub period: Duration,
}

impl TimeoutPolicy for PeriodTimeouts {
    fn timeout_for(&self, _class: TrafficClass) -> Duration {
        self.period
    }
}

// ── Fault recovery ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display, IntoStaticStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FaultKind {
    SocketTimeout,
    Socket,
    Network,
    Communication,
    LockTimeout,
    Resource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl FaultKind {
    pub fn severity(self) -> Severity {
        match self {
            Self::SocketTimeout => Severity::Low,
            Self::Socket | Self::Network | Self::Communication => Severity::Medium,
            Self::LockTimeout | Self::Resource => Severity::High,
        }
    }

    /// Classify a core error for reporting.
    pub fn of(error: &CoreError) -> Self {
        match error {
            CoreError::Bind { .. } | CoreError::Socket { .. } => Self::Socket,
            CoreError::NoEndpoint { .. } => Self::Network,
            CoreError::LockTimeout { .. } => Self::LockTimeout,
            CoreError::Internal(_) => Self::Resource,
            _ => Self::Communication,
        }
    }
}

/// A fault observed by one of the engine's tasks.
#[derive(Debug, Clone)]
pub struct Fault {
    pub kind: FaultKind,
    /// Task or device the fault happened in.
    pub origin: String,
    pub message: String,
}

impl Fault {
    pub fn new(kind: FaultKind, origin: impl Into<String>, message: impl fmt::Display) -> Self {
        Self {
            kind,
            origin: origin.into(),
            message: message.to_string(),
        }
    }

    pub fn from_error(origin: impl Into<String>, error: &CoreError) -> Self {
        Self::new(FaultKind::of(error), origin, error)
    }
}

/// Aggregate fault counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FaultStats {
    pub total: usize,
    pub by_kind: HashMap<FaultKind, usize>,
}

pub trait RecoveryPolicy: Send + Sync + fmt::Debug {
    /// Record a fault. Returns the severity it was filed under.
    fn report(&self, fault: Fault) -> Severity;

    fn stats(&self) -> FaultStats;
}

const FAULT_HISTORY_LIMIT: usize = 1000;
const FAULT_LOG_INTERVAL: Duration = Duration::from_secs(30);

/// Default policy: bounded history plus per-kind rate-limited logging.
#[derive(Debug)]
pub struct LoggingRecovery {
    state: Mutex<RecoveryState>,
    log_interval: Duration,
}

#[derive(Debug, Default)]
struct RecoveryState {
    history: VecDeque<FaultKind>,
    last_logged: HashMap<FaultKind, Instant>,
}

impl LoggingRecovery {
    pub fn new() -> Self {
        Self::with_log_interval(FAULT_LOG_INTERVAL)
    }

    pub fn with_log_interval(log_interval: Duration) -> Self {
        Self {
            state: Mutex::new(RecoveryState::default()),
            log_interval,
        }
    }
}

impl Default for LoggingRecovery {
    fn default() -> Self {
        Self::new()
    }
}

impl RecoveryPolicy for LoggingRecovery {
    fn report(&self, fault: Fault) -> Severity {
        let severity = fault.kind.severity();
        let now = Instant::now();
        let should_log = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if state.history.len() == FAULT_HISTORY_LIMIT {
                state.history.pop_front();
            }
            state.history.push_back(fault.kind);
            let due = state
                .last_logged
                .get(&fault.kind)
                .is_none_or(|at| now.duration_since(*at) >= self.log_interval);
            if due {
                state.last_logged.insert(fault.kind, now);
            }
            due
        };

        if should_log {
            let kind: &'static str = fault.kind.into();
            match severity {
                Severity::Low => {
                    tracing::debug!(kind, origin = %fault.origin, "{}", fault.message);
                }
                Severity::Medium => {
                    tracing::warn!(kind, origin = %fault.origin, "{}", fault.message);
                }
                Severity::High | Severity::Critical => {
                    tracing::error!(kind, origin = %fault.origin, "{}", fault.message);
                }
            }
        }
        severity
    }

    fn stats(&self) -> FaultStats {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let mut by_kind = HashMap::new();
        for kind in &state.history {
            *by_kind.entry(*kind).or_insert(0) += 1;
        }
        FaultStats {
            total: state.history.len(),
            by_kind,
        }
    }
}

// ── Naming ──────────────────────────────────────────────────────────

pub trait NameSource: Send + Sync + fmt::Debug {
    fn next_name(&self) -> String;
}

const NAMES: &[&str] = &[
    "Aeolus", "Boreas", "Zephyr", "Notus", "Eurus", "Mistral", "Sirocco", "Chinook", "Foehn",
    "Bora", "Levante", "Tramontane", "Khamsin", "Harmattan", "Simoom", "Williwaw", "Haboob",
    "Pampero", "Zonda", "Etesian", "Gregale", "Vendavals", "Santa Ana", "Squall", "Gale",
];

/// Picks a wind name at random; duplicates are possible.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomNames;

impl NameSource for RandomNames {
    fn next_name(&self) -> String {
        NAMES
            .choose(&mut rand::thread_rng())
            .copied()
            .unwrap_or("Unnamed")
            .to_owned()
    }
}

// ── Bounded locking ─────────────────────────────────────────────────

/// Acquire `mutex` or give up after `wait`.
pub async fn acquire_within<T>(
    mutex: &AsyncMutex<T>,
    wait: Duration,
) -> Result<MutexGuard<'_, T>, CoreError> {
    tokio::time::timeout(wait, mutex.lock())
        .await
        .map_err(|_| CoreError::LockTimeout { waited: wait })
}

// ── Bundle ──────────────────────────────────────────────────────────

/// Collaborators handed to the communicator at construction.
#[derive(Debug, Clone)]
pub struct Services {
    pub timeouts: Arc<dyn TimeoutPolicy>,
    pub recovery: Arc<dyn RecoveryPolicy>,
    pub names: Arc<dyn NameSource>,
}

impl Services {
    /// Default collaborators for an exchange period of `period`.
    pub fn new(period: Duration) -> Self {
        Self {
            timeouts: Arc::new(PeriodTimeouts { period }),
            recovery: Arc::new(LoggingRecovery::new()),
            names: Arc::new(RandomNames),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn severity_map() {
        assert_eq!(FaultKind::SocketTimeout.severity(), Severity::Low);
        assert_eq!(FaultKind::Socket.severity(), Severity::Medium);
        assert_eq!(FaultKind::Communication.severity(), Severity::Medium);
        assert_eq!(FaultKind::LockTimeout.severity(), Severity::High);
    }

    #[test]
    fn recovery_counts_faults_by_kind() {
        let recovery = LoggingRecovery::new();
        recovery.report(Fault::new(FaultKind::Socket, "worker", "boom"));
        recovery.report(Fault::new(FaultKind::Socket, "worker", "boom"));
        recovery.report(Fault::new(FaultKind::Communication, "listener", "bad"));
        let stats = recovery.stats();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.by_kind.get(&FaultKind::Socket), Some(&2));
    }

    #[test]
    fn recovery_history_is_bounded() {
        let recovery = LoggingRecovery::new();
        for _ in 0..FAULT_HISTORY_LIMIT + 10 {
            recovery.report(Fault::new(FaultKind::SocketTimeout, "t", "late"));
        }
        assert_eq!(recovery.stats().total, FAULT_HISTORY_LIMIT);
    }

    #[test]
    fn random_names_come_from_the_list() {
        let name = RandomNames.next_name();
        assert!(NAMES.contains(&name.as_str()));
    }

    #[tokio::test]
    async fn acquire_within_times_out_when_held() {
        let mutex = AsyncMutex::new(());
        let _held = mutex.lock().await;
        let err = acquire_within(&mutex, Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::LockTimeout { .. }));
    }
}
