//! Probe scheduling and fan-out.
//!
//! Three modes drive cycles through the prober, parser, classifier and
//! transition tracker: per-device recurring timers, on-demand single
//! checks, and a concurrent bulk check over a whole map. Devices never
//! block each other; within one device, cycles are strictly serialized by
//! the timer loop itself.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::sync::{RwLock, Semaphore, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval, timeout};
use tracing::{debug, error, warn};

use crate::database::models::Device;

use super::classifier::{self, INVALID_ADDRESS_DETAIL, NO_ADDRESS_DETAIL};
use super::parser::{self, PingDialect};
use super::prober::{PacketBudget, ProbeError, Prober};
use super::transition::{self, TransitionDecision};
use super::types::{CheckMethod, HealthState, PingMetrics, ProbeResult};

/// Everything one probe cycle produced, handed back for write-back and
/// notification. The device field is the read-only snapshot the cycle ran
/// against.
#[derive(Debug, Clone)]
pub struct CycleOutcome {
    pub device: Device,
    pub previous_status: HealthState,
    pub new_status: HealthState,
    pub detail: String,
    pub metrics: PingMetrics,
    /// None when nothing was probed (no address, address rejected).
    pub probe_result: Option<ProbeResult>,
    pub decision: TransitionDecision,
    pub timestamp: SystemTime,
}

/// Drives probe cycles for many independently configured devices.
pub struct ProbeScheduler {
    prober: Arc<dyn Prober>,
    dialect: PingDialect,
    /// Caps in-flight probes so a bulk check over hundreds of devices
    /// cannot exhaust OS process slots.
    limiter: Arc<Semaphore>,
    bulk_deadline: Duration,
}

impl ProbeScheduler {
    pub fn new(
        prober: Arc<dyn Prober>,
        dialect: PingDialect,
        max_in_flight: usize,
        bulk_deadline: Duration,
    ) -> Self {
        Self { prober, dialect, limiter: Arc::new(Semaphore::new(max_in_flight)), bulk_deadline }
    }

    /// Run exactly one probe cycle for one device.
    pub async fn check_device(&self, device: &Device, budget: PacketBudget) -> CycleOutcome {
        // The semaphore is never closed, so acquire cannot fail.
        let _permit = self.limiter.acquire().await.ok();
        run_cycle(self.prober.as_ref(), self.dialect, device, budget).await
    }

    /// Concurrent fan-out over every probeable device of a map. One
    /// device hanging or failing never delays the rest; members that miss
    /// the bulk deadline are reported as offline with a timeout detail.
    pub async fn check_map(&self, devices: Vec<Device>) -> Vec<CycleOutcome> {
        let eligible: Vec<Device> = devices.into_iter().filter(Device::is_probeable).collect();

        let cycles = eligible.iter().map(|device| async move {
            match timeout(self.bulk_deadline, self.check_device(device, PacketBudget::Scheduled))
                .await
            {
                Ok(outcome) => outcome,
                Err(_) => deadline_outcome(device, self.bulk_deadline),
            }
        });

        futures::future::join_all(cycles).await
    }

    /// Spawn the recurring timer task for one device. Ticks are skipped
    /// while a cycle is still running, so a device never has two probes in
    /// flight. The watch channel stops the timer immediately on scope
    /// unload; a cycle already in flight finishes but its outcome is
    /// discarded instead of sent.
    pub fn spawn_timer(
        &self,
        device: Arc<RwLock<Device>>,
        every: Duration,
        mut cancel: watch::Receiver<bool>,
        result_tx: mpsc::Sender<CycleOutcome>,
    ) -> JoinHandle<()> {
        let prober = Arc::clone(&self.prober);
        let dialect = self.dialect;
        let limiter = Arc::clone(&self.limiter);

        tokio::spawn(async move {
            let mut timer = interval(every);
            timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = timer.tick() => {}
                    _ = cancel.changed() => break,
                }
                if *cancel.borrow() {
                    break;
                }

                let snapshot = device.read().await.clone();
                let outcome = {
                    let _permit = limiter.acquire().await.ok();
                    run_cycle(prober.as_ref(), dialect, &snapshot, PacketBudget::Scheduled).await
                };

                // Refresh the shared status ahead of the write-back loop,
                // so the next tick compares against this cycle even when
                // store writes lag behind the interval.
                device.write().await.current_status = outcome.new_status;

                // Scope unloaded while we were probing: discard.
                if *cancel.borrow() {
                    break;
                }
                if result_tx.send(outcome).await.is_err() {
                    break;
                }
            }
        })
    }
}

/// One full probe cycle: probe, parse, classify, decide. Pure with respect
/// to storage; the caller writes the outcome back.
pub(crate) async fn run_cycle(
    prober: &dyn Prober,
    dialect: PingDialect,
    device: &Device,
    budget: PacketBudget,
) -> CycleOutcome {
    let timestamp = SystemTime::now();
    let previous = device.current_status;

    // Annotation-only nodes are never probed.
    let Some(address) = device.address.clone() else {
        return unprobed_outcome(device, NO_ADDRESS_DETAIL, timestamp);
    };

    let method = device.check_method();
    let (success, raw_output, metrics) = match prober.probe(&address, method, budget).await {
        Ok(outcome) => {
            let metrics = match method {
                CheckMethod::Icmp => parser::parse_ping(&outcome.raw_output, dialect),
                CheckMethod::TcpPort(_) => parser::tcp_metrics(&outcome),
            };
            // Windows ping can exit 0 with every packet lost.
            let success = outcome.success && metrics.packet_loss_pct < 100.0;
            (success, outcome.raw_output, metrics)
        }
        Err(ProbeError::InvalidAddress(rejected)) => {
            debug!(device = %device.name, address = %rejected, "address rejected, probe skipped");
            return unprobed_outcome(device, INVALID_ADDRESS_DETAIL, timestamp);
        }
        Err(err) => {
            match &err {
                ProbeError::Timeout(ms) => {
                    warn!(device = %device.name, timeout_ms = ms, "probe timed out")
                }
                ProbeError::ToolMissing(reason) => {
                    error!(device = %device.name, %reason, "ping utility unavailable")
                }
                ProbeError::Spawn(reason) => {
                    error!(device = %device.name, %reason, "failed to spawn probe process")
                }
                // Handled by the arm above.
                ProbeError::InvalidAddress(_) => {}
            }
            (false, err.to_string(), PingMetrics::unreachable())
        }
    };

    let (new_status, detail) = classifier::classify(device, success, &metrics);

    let probe_result = ProbeResult {
        host: address,
        packet_loss: metrics.packet_loss_pct,
        avg_time: metrics.avg_ms,
        min_time: metrics.min_ms,
        max_time: metrics.max_ms,
        ttl: metrics.ttl,
        success,
        raw_output,
        timestamp,
    };

    CycleOutcome {
        device: device.clone(),
        previous_status: previous,
        new_status,
        detail,
        metrics,
        probe_result: Some(probe_result),
        decision: transition::observe(previous, new_status, device.notifications_enabled),
        timestamp,
    }
}

/// Outcome for a device that was never probed this cycle: always unknown,
/// no history row.
fn unprobed_outcome(device: &Device, detail: &str, timestamp: SystemTime) -> CycleOutcome {
    CycleOutcome {
        device: device.clone(),
        previous_status: device.current_status,
        new_status: HealthState::Unknown,
        detail: detail.to_string(),
        metrics: PingMetrics::empty(),
        probe_result: None,
        decision: transition::observe(
            device.current_status,
            HealthState::Unknown,
            device.notifications_enabled,
        ),
        timestamp,
    }
}

/// Outcome for a bulk member that missed the overall deadline.
fn deadline_outcome(device: &Device, deadline: Duration) -> CycleOutcome {
    let timestamp = SystemTime::now();
    let detail = format!("Probe did not complete within {} s.", deadline.as_secs());
    let metrics = PingMetrics::unreachable();

    CycleOutcome {
        device: device.clone(),
        previous_status: device.current_status,
        new_status: HealthState::Offline,
        detail: detail.clone(),
        metrics,
        probe_result: Some(ProbeResult {
            host: device.address.clone().unwrap_or_default(),
            packet_loss: metrics.packet_loss_pct,
            avg_time: metrics.avg_ms,
            min_time: metrics.min_ms,
            max_time: metrics.max_ms,
            ttl: None,
            success: false,
            raw_output: detail,
            timestamp,
        }),
        decision: transition::observe(
            device.current_status,
            HealthState::Offline,
            device.notifications_enabled,
        ),
        timestamp,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitoring::types::ProbeOutcome;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Replies with scripted Unix ping output and counts probe attempts.
    struct ScriptedProber {
        calls: AtomicUsize,
        avg_ms: f64,
        loss_pct: f64,
    }

    impl ScriptedProber {
        fn new(avg_ms: f64, loss_pct: f64) -> Self {
            Self { calls: AtomicUsize::new(0), avg_ms, loss_pct }
        }

        fn raw_output(&self) -> String {
            format!(
                "1 packets transmitted, 1 received, {}% packet loss, time 0ms\n\
                 rtt min/avg/max/mdev = {avg}/{avg}/{avg}/0.0 ms\n",
                self.loss_pct,
                avg = self.avg_ms,
            )
        }
    }

    #[async_trait]
    impl Prober for ScriptedProber {
        async fn probe(
            &self,
            address: &str,
            _method: CheckMethod,
            _budget: PacketBudget,
        ) -> Result<ProbeOutcome, ProbeError> {
            crate::monitoring::validation::validate_probe_address(address)?;
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(ProbeOutcome {
                success: self.loss_pct < 100.0,
                raw_output: self.raw_output(),
                elapsed_ms: self.avg_ms as u64,
            })
        }
    }

    /// Always fails the probe itself, after address validation.
    struct FailingProber {
        kind: FailKind,
    }

    enum FailKind {
        TimedOut,
        NoPingBinary,
    }

    #[async_trait]
    impl Prober for FailingProber {
        async fn probe(
            &self,
            address: &str,
            _method: CheckMethod,
            _budget: PacketBudget,
        ) -> Result<ProbeOutcome, ProbeError> {
            crate::monitoring::validation::validate_probe_address(address)?;
            Err(match self.kind {
                FailKind::TimedOut => ProbeError::Timeout(5_000),
                FailKind::NoPingBinary => ProbeError::ToolMissing("ping: not found".to_string()),
            })
        }
    }

    fn device_with_address(address: &str) -> Device {
        let mut device = Device::new("switch-a".to_string(), 1);
        device.address = Some(address.to_string());
        device
    }

    #[tokio::test]
    async fn cycle_without_address_never_probes() {
        let prober = ScriptedProber::new(2.0, 0.0);
        let device = Device::new("annotation".to_string(), 1);

        let outcome = run_cycle(&prober, PingDialect::Unix, &device, PacketBudget::Manual).await;

        assert_eq!(outcome.new_status, HealthState::Unknown);
        assert!(outcome.probe_result.is_none());
        assert_eq!(prober.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn cycle_with_rejected_address_is_unknown_not_offline() {
        let prober = ScriptedProber::new(2.0, 0.0);
        let device = device_with_address("bad;rm -rf");

        let outcome = run_cycle(&prober, PingDialect::Unix, &device, PacketBudget::Manual).await;

        assert_eq!(outcome.new_status, HealthState::Unknown);
        assert!(outcome.probe_result.is_none());
        assert_eq!(prober.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn healthy_cycle_classifies_online_and_records_history() {
        let prober = ScriptedProber::new(2.0, 0.0);
        let device = device_with_address("10.0.0.9");

        let outcome = run_cycle(&prober, PingDialect::Unix, &device, PacketBudget::Scheduled).await;

        assert_eq!(outcome.new_status, HealthState::Online);
        assert!(outcome.decision.changed);
        let result = outcome.probe_result.expect("a probe ran");
        assert!(result.success);
        assert_eq!(result.avg_time, 2.0);
        assert_eq!(result.host, "10.0.0.9");
    }

    #[tokio::test]
    async fn total_loss_cycle_goes_offline() {
        let prober = ScriptedProber::new(0.0, 100.0);
        let device = device_with_address("10.0.0.9");

        let outcome = run_cycle(&prober, PingDialect::Unix, &device, PacketBudget::Scheduled).await;

        assert_eq!(outcome.new_status, HealthState::Offline);
        assert_eq!(outcome.detail, classifier::OFFLINE_DETAIL);
    }

    #[tokio::test]
    async fn timed_out_probe_goes_offline_with_failed_history_row() {
        let prober = FailingProber { kind: FailKind::TimedOut };
        let device = device_with_address("10.0.0.9");

        let outcome = run_cycle(&prober, PingDialect::Unix, &device, PacketBudget::Scheduled).await;

        assert_eq!(outcome.new_status, HealthState::Offline);
        assert_eq!(outcome.detail, classifier::OFFLINE_DETAIL);
        assert!(outcome.decision.changed);
        let result = outcome.probe_result.expect("failure still recorded");
        assert!(!result.success);
        assert_eq!(result.packet_loss, 100.0);
        assert!(result.raw_output.contains("timed out after 5000 ms"));
    }

    #[tokio::test]
    async fn missing_ping_utility_goes_offline_with_failed_history_row() {
        let prober = FailingProber { kind: FailKind::NoPingBinary };
        let device = device_with_address("10.0.0.9");

        let outcome = run_cycle(&prober, PingDialect::Unix, &device, PacketBudget::Scheduled).await;

        assert_eq!(outcome.new_status, HealthState::Offline);
        assert_eq!(outcome.detail, classifier::OFFLINE_DETAIL);
        let result = outcome.probe_result.expect("failure still recorded");
        assert!(!result.success);
        assert!(result.raw_output.contains("ping utility unavailable"));
    }

    #[tokio::test]
    async fn timer_compares_against_its_own_last_cycle_when_write_back_lags() {
        let prober = Arc::new(ScriptedProber::new(2.0, 0.0));
        let scheduler =
            ProbeScheduler::new(prober, PingDialect::Unix, 8, Duration::from_secs(5));
        let cell = Arc::new(RwLock::new(device_with_address("10.0.0.9")));
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (result_tx, mut result_rx) = mpsc::channel(16);

        let timer = scheduler.spawn_timer(
            Arc::clone(&cell),
            Duration::from_millis(50),
            cancel_rx,
            result_tx,
        );

        // Nothing applies the outcomes back, as if the store were stalled.
        let first = result_rx.recv().await.expect("first cycle");
        let second = result_rx.recv().await.expect("second cycle");
        let third = result_rx.recv().await.expect("third cycle");
        let _ = cancel_tx.send(true);
        let _ = timer.await;

        assert!(first.decision.changed);
        assert!(!second.decision.changed);
        assert!(!third.decision.changed);
        assert_eq!(cell.read().await.current_status, HealthState::Online);
    }

    #[tokio::test]
    async fn bulk_check_skips_boxes_and_unaddressed_devices() {
        let prober = Arc::new(ScriptedProber::new(2.0, 0.0));
        let scheduler = ProbeScheduler::new(
            prober.clone(),
            PingDialect::Unix,
            8,
            Duration::from_secs(5),
        );

        let mut annotation = device_with_address("10.0.0.1");
        annotation.kind = crate::database::models::DeviceKind::Box;
        let unaddressed = Device::new("note".to_string(), 1);
        let real = device_with_address("10.0.0.2");

        let outcomes = scheduler.check_map(vec![annotation, unaddressed, real]).await;

        assert_eq!(outcomes.len(), 1);
        assert_eq!(prober.calls.load(Ordering::SeqCst), 1);
    }
}
