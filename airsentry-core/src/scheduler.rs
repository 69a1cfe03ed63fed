//! Duty-cycle controller
//!
//! ```text
//! Bootstrapping ──→ Sampling ─┐
//!                             ├─ (concurrent)
//!                  Connecting ┘
//!                      │ session
//!                      ▼
//!                  Publishing ──→ Draining ──→ Sleeping
//!                      │                          ▲
//!                      └──── connection failed ───┘
//! ```
//!
//! One call to [`DutyCycleScheduler::run`] is one cycle. Nothing outlives
//! it: the next cycle starts from Bootstrapping with fresh state after the
//! device resumes. Whatever happens, the cycle ends in Sleeping with exactly
//! one [`SuspendRequest`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{error, info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::aggregate::ResultAggregate;
use crate::barrier::{CompletionBarrier, CycleSignal, SignalSet, WaitMode};
use crate::config::{Credentials, DeviceConfig};
use crate::connection::ConnectionManager;
use crate::errors::{ConfigError, ConnectionError, PublishError};
use crate::message::TelemetryMessage;
use crate::publisher::{PublishOutcome, TelemetryPublisher};
use crate::reading::Modality;
use crate::sensors::SensorSuite;
use crate::session::{Connector, Session};
use crate::time::{CycleTimer, MonotonicTime, TimeSource};

/// Where a cycle is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CyclePhase {
    /// Building the cycle context
    Bootstrapping,
    /// Sensor workers started
    Sampling,
    /// Connection attempts started
    Connecting,
    /// Session established, publisher running
    Publishing,
    /// Waiting for the publisher to settle
    Draining,
    /// Cycle over, suspension requested
    Sleeping,
}

/// Ask the power controller to suspend the device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SuspendRequest {
    /// Time until the device resumes
    pub interval: Duration,
}

/// What a cycle achieved
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// Telemetry delivered and acknowledged
    Published {
        /// Topic published to
        topic: String,
        /// Message as sent
        message: TelemetryMessage,
        /// Connection attempts it took
        connect_attempts: u32,
        /// Drain polls until settled
        polls: u32,
    },
    /// Connected, but the publish did not settle
    PublishFailed(PublishError),
    /// No session this cycle
    ConnectionFailed(ConnectionError),
    /// The publish task ended without reporting
    Aborted(String),
}

/// Summary of one cycle
#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    /// Outcome of connect and publish
    pub outcome: CycleOutcome,
    /// The suspension requested at the end
    pub suspend: SuspendRequest,
    /// Phases entered, in order
    pub phases: Vec<CyclePhase>,
    /// Time from boot to Sleeping
    pub elapsed: Duration,
    /// Time spent establishing the broker session, retries included
    pub connect_time: Option<Duration>,
}

/// Receives the single suspension request of a cycle
#[async_trait]
pub trait PowerController: Send {
    /// Suspend for `request.interval`; on hardware this does not return
    async fn suspend(&mut self, request: SuspendRequest);
}

/// Everything a cycle shares between its tasks, built in Bootstrapping
#[derive(Debug, Clone)]
pub struct CycleContext {
    /// One write-once slot per modality
    pub aggregate: Arc<ResultAggregate>,
    /// Raised by sensor workers
    pub sensors: Arc<CompletionBarrier<Modality>>,
    /// Raised by the publish pipeline
    pub cycle: Arc<CompletionBarrier<CycleSignal>>,
    /// Validated configuration
    pub config: Arc<DeviceConfig>,
    /// Broker identity
    pub credentials: Arc<Credentials>,
}

impl CycleContext {
    /// Fresh, empty cycle state
    pub fn bootstrap(config: DeviceConfig, credentials: Credentials) -> Self {
        Self {
            aggregate: Arc::new(ResultAggregate::new()),
            sensors: Arc::new(CompletionBarrier::new()),
            cycle: Arc::new(CompletionBarrier::new()),
            config: Arc::new(config),
            credentials: Arc::new(credentials),
        }
    }
}

/// Raises `PublishDone` when the pipeline ends, however it ends
struct DoneGuard(Arc<CompletionBarrier<CycleSignal>>);

impl Drop for DoneGuard {
    fn drop(&mut self) {
        self.0.raise(CycleSignal::PublishDone);
    }
}

/// Runs one duty cycle
pub struct DutyCycleScheduler<C, R = StdRng> {
    config: DeviceConfig,
    credentials: Credentials,
    connector: C,
    rng: R,
    clock: Box<dyn TimeSource>,
}

impl<C: Connector + 'static> DutyCycleScheduler<C, StdRng> {
    /// Scheduler over `connector`, rejecting an unusable configuration
    pub fn new(config: DeviceConfig, credentials: Credentials, connector: C) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            credentials,
            connector,
            rng: StdRng::from_entropy(),
            clock: Box::new(MonotonicTime::new()),
        })
    }
}

impl<C, R> DutyCycleScheduler<C, R>
where
    C: Connector + 'static,
    R: Rng + Send + 'static,
{
    /// Replace the backoff jitter source
    pub fn with_rng<R2: Rng + Send + 'static>(self, rng: R2) -> DutyCycleScheduler<C, R2> {
        DutyCycleScheduler {
            config: self.config,
            credentials: self.credentials,
            connector: self.connector,
            rng,
            clock: self.clock,
        }
    }

    /// Replace the cycle clock
    pub fn with_clock(mut self, clock: Box<dyn TimeSource>) -> Self {
        self.clock = clock;
        self
    }

    /// Run one cycle, then hand its suspension request to `power`
    pub async fn run_and_suspend<P: PowerController + ?Sized>(self, sensors: SensorSuite, power: &mut P) -> CycleReport {
        let report = self.run(sensors).await;
        power.suspend(report.suspend).await;
        report
    }

    /// Run one cycle from Bootstrapping to Sleeping
    pub async fn run(self, sensors: SensorSuite) -> CycleReport {
        let DutyCycleScheduler {
            config,
            credentials,
            connector,
            rng,
            clock,
        } = self;

        let mut timer = CycleTimer::new(clock);
        timer.enter(CyclePhase::Bootstrapping);
        let ctx = CycleContext::bootstrap(config, credentials);
        info!("cycle starting for {}", ctx.credentials.device_id);

        timer.enter(CyclePhase::Sampling);
        let writers = ResultAggregate::writers(&ctx.aggregate, &ctx.sensors);
        let workers = sensors.spawn(writers, &ctx.config.sampling);

        timer.enter(CyclePhase::Connecting);
        let (ready_tx, ready_rx) = oneshot::channel();
        let pipeline = tokio::spawn(publish_pipeline(ctx.clone(), connector, rng, ready_tx));

        if ready_rx.await.is_ok() {
            timer.enter(CyclePhase::Publishing);
            timer.enter(CyclePhase::Draining);
        }

        ctx.cycle
            .wait(SignalSet::of(CycleSignal::PublishDone), WaitMode::All, true)
            .await;
        let outcome = settle(pipeline).await;
        stop_workers(workers, &ctx);

        timer.enter(CyclePhase::Sleeping);
        let suspend = SuspendRequest {
            interval: ctx.config.sleep_interval,
        };
        let elapsed = timer.elapsed();
        let connect_time = timer.time_in(CyclePhase::Connecting);
        log_outcome(&outcome);
        info!(
            "cycle finished in {:?} ({:?} connecting), sleeping for {:?}",
            elapsed,
            connect_time.unwrap_or_default(),
            suspend.interval
        );

        CycleReport {
            outcome,
            suspend,
            phases: timer.phases(),
            elapsed,
            connect_time,
        }
    }
}

async fn publish_pipeline<C, R>(
    ctx: CycleContext,
    connector: C,
    rng: R,
    ready: oneshot::Sender<()>,
) -> CycleOutcome
where
    C: Connector,
    R: Rng + Send,
{
    let _done = DoneGuard(ctx.cycle.clone());

    let mut manager = ConnectionManager::with_rng(connector, ctx.config.backoff, rng);
    let mut session = match manager.connect(&ctx.credentials, &ctx.config.connection).await {
        Ok(session) => session,
        Err(e) => return CycleOutcome::ConnectionFailed(e),
    };
    let connect_attempts = manager.attempts();
    let _ = ready.send(());

    let publisher = TelemetryPublisher::new(ctx.config.publish.clone());
    let outcome = publisher
        .publish(&mut session, &ctx.aggregate, &ctx.sensors, &ctx.credentials.device_id)
        .await;
    session.disconnect().await;

    match outcome {
        PublishOutcome::Delivered {
            topic, message, polls, ..
        } => CycleOutcome::Published {
            topic,
            message,
            connect_attempts,
            polls,
        },
        PublishOutcome::Failed(e) => CycleOutcome::PublishFailed(e),
    }
}

async fn settle(pipeline: JoinHandle<CycleOutcome>) -> CycleOutcome {
    match pipeline.await {
        Ok(outcome) => outcome,
        Err(e) => CycleOutcome::Aborted(e.to_string()),
    }
}

fn stop_workers(workers: Vec<JoinHandle<()>>, ctx: &CycleContext) {
    let pending: Vec<Modality> = Modality::ALL
        .into_iter()
        .filter(|m| !ctx.aggregate.is_filled(*m))
        .collect();
    if !pending.is_empty() {
        warn!("abandoning unfinished sensor workers: {:?}", pending);
    }
    for worker in workers {
        worker.abort();
    }
}

fn log_outcome(outcome: &CycleOutcome) {
    match outcome {
        CycleOutcome::Published {
            topic,
            connect_attempts,
            ..
        } => info!("telemetry delivered to {} (connected on attempt {})", topic, connect_attempts),
        CycleOutcome::PublishFailed(e) => error!("publish failed: {}", e),
        CycleOutcome::ConnectionFailed(e) => error!("no broker session this cycle: {}", e),
        CycleOutcome::Aborted(reason) => error!("publish task aborted: {}", reason),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{AcquisitionError, AttemptError, ProtocolError};
    use crate::config::ConnectionConfig;
    use crate::sensors::{AnalogChannel, Co2Probe, Co2Sample, HumidityProbe, HumiditySample};
    use crate::session::{QoS, SessionEvent};

    struct Steady;

    impl HumidityProbe for Steady {
        fn read(&mut self) -> Result<HumiditySample, AcquisitionError> {
            Ok(HumiditySample {
                temperature_c: 21,
                humidity_pct: 40,
            })
        }
    }

    impl Co2Probe for Steady {
        fn read(&mut self) -> Result<Co2Sample, AcquisitionError> {
            Ok(Co2Sample {
                ppm: 400,
                temperature_c: 21,
            })
        }
    }

    impl AnalogChannel for Steady {
        fn read_raw(&mut self) -> Result<u16, AcquisitionError> {
            Ok(100)
        }
    }

    fn suite() -> SensorSuite {
        SensorSuite {
            humidity: Box::new(Steady),
            co2: Box::new(Steady),
            gas: Box::new(Steady),
            light: Box::new(Steady),
            power: Box::new(Steady),
            calibration: None,
        }
    }

    struct Quiet;

    #[async_trait]
    impl Session for Quiet {
        async fn publish(&mut self, _: &str, _: &[u8], _: QoS, _: bool) -> Result<(), PublishError> {
            Ok(())
        }
        async fn poll(&mut self, _: Duration) -> Result<SessionEvent, PublishError> {
            Ok(SessionEvent::Idle)
        }
        async fn disconnect(&mut self) {}
    }

    struct Refusing;

    #[async_trait]
    impl Connector for Refusing {
        type Session = Quiet;

        async fn attempt(&mut self, _: &Credentials, _: &ConnectionConfig) -> Result<Quiet, AttemptError> {
            Err(ProtocolError::Refused("bad certificate identity".into()).into())
        }
    }

    struct Accepting;

    #[async_trait]
    impl Connector for Accepting {
        type Session = Quiet;

        async fn attempt(&mut self, _: &Credentials, _: &ConnectionConfig) -> Result<Quiet, AttemptError> {
            Ok(Quiet)
        }
    }

    /// Broker that takes a while to answer
    struct Slow(Duration);

    #[async_trait]
    impl Connector for Slow {
        type Session = Quiet;

        async fn attempt(&mut self, _: &Credentials, _: &ConnectionConfig) -> Result<Quiet, AttemptError> {
            tokio::time::sleep(self.0).await;
            Ok(Quiet)
        }
    }

    #[derive(Default)]
    struct Recorder(Vec<SuspendRequest>);

    #[async_trait]
    impl PowerController for Recorder {
        async fn suspend(&mut self, request: SuspendRequest) {
            self.0.push(request);
        }
    }

    fn creds() -> Credentials {
        Credentials::new("aq-unit", "broker.test", 8883)
    }

    #[test]
    fn invalid_config_is_rejected_up_front() {
        let config = DeviceConfig::default().max_attempts(0);
        assert!(DutyCycleScheduler::new(config, creds(), Accepting).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn protocol_rejection_skips_publishing() {
        let scheduler = DutyCycleScheduler::new(DeviceConfig::default(), creds(), Refusing)
            .unwrap()
            .with_rng(StdRng::seed_from_u64(1));
        let report = scheduler.run(suite()).await;

        assert!(matches!(
            report.outcome,
            CycleOutcome::ConnectionFailed(ConnectionError::ProtocolRejected(_))
        ));
        assert_eq!(
            report.phases,
            vec![
                CyclePhase::Bootstrapping,
                CyclePhase::Sampling,
                CyclePhase::Connecting,
                CyclePhase::Sleeping
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn suspension_is_requested_once() {
        let config = DeviceConfig::default().sleep_interval(Duration::from_secs(60));
        let scheduler = DutyCycleScheduler::new(config, creds(), Accepting)
            .unwrap()
            .with_rng(StdRng::seed_from_u64(1));

        let mut power = Recorder::default();
        let report = scheduler.run_and_suspend(suite(), &mut power).await;

        assert!(matches!(report.outcome, CycleOutcome::Published { connect_attempts: 1, .. }));
        assert_eq!(power.0, vec![SuspendRequest {
            interval: Duration::from_secs(60)
        }]);
        assert_eq!(report.phases.last(), Some(&CyclePhase::Sleeping));
    }

    #[tokio::test(start_paused = true)]
    async fn report_carries_connect_time() {
        let scheduler = DutyCycleScheduler::new(DeviceConfig::default(), creds(), Slow(Duration::from_secs(3)))
            .unwrap()
            .with_rng(StdRng::seed_from_u64(1));
        let report = scheduler.run(suite()).await;

        assert!(matches!(report.outcome, CycleOutcome::Published { .. }));
        let connect_time = report.connect_time.unwrap();
        assert!(connect_time >= Duration::from_secs(3), "{connect_time:?}");
        assert!(connect_time < Duration::from_secs(4), "{connect_time:?}");
        assert!(report.elapsed >= connect_time);
    }
}
