//! Publish-and-drain
//!
//! 1. Wait for every sensor signal (consuming them)
//! 2. Build topic and payload from the released slots
//! 3. Publish once, acknowledged, not retained
//! 4. Poll the session until nothing is in flight, an error ends the loop,
//!    or the poll budget runs out
//!
//! Every failure becomes a [`PublishOutcome::Failed`]; the caller logs it
//! and carries on to sleep.

use log::{debug, error, info, warn};

use crate::aggregate::ResultAggregate;
use crate::barrier::{CompletionBarrier, SignalSet, WaitMode};
use crate::config::PublishConfig;
use crate::errors::PublishError;
use crate::message::{telemetry_topic, TelemetryMessage};
use crate::reading::Modality;
use crate::session::{QoS, Session, SessionEvent};

/// How a publish cycle ended
#[derive(Debug, Clone, PartialEq)]
pub enum PublishOutcome {
    /// Message sent and the session settled
    Delivered {
        /// Topic published to
        topic: String,
        /// Message as published
        message: TelemetryMessage,
        /// Event loop polls until settled
        polls: u32,
        /// Acknowledgments observed while draining
        acknowledgments: u32,
    },
    /// Message not sent, or sent but never settled
    Failed(PublishError),
}

impl PublishOutcome {
    /// True for `Delivered`
    pub fn is_delivered(&self) -> bool {
        matches!(self, PublishOutcome::Delivered { .. })
    }
}

#[derive(Debug, Clone, Copy)]
struct Drained {
    polls: u32,
    acknowledgments: u32,
}

/// Serializes the aggregate and drives one acknowledged publish
#[derive(Debug, Clone)]
pub struct TelemetryPublisher {
    config: PublishConfig,
}

impl TelemetryPublisher {
    /// Publisher with the given poll parameters
    pub fn new(config: PublishConfig) -> Self {
        Self { config }
    }

    /// Run the whole publish cycle over `session`
    pub async fn publish<S: Session + ?Sized>(
        &self,
        session: &mut S,
        aggregate: &ResultAggregate,
        sensors: &CompletionBarrier<Modality>,
        device_id: &str,
    ) -> PublishOutcome {
        match self.try_publish(session, aggregate, sensors, device_id).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("publish cycle failed: {}", e);
                PublishOutcome::Failed(e)
            }
        }
    }

    async fn try_publish<S: Session + ?Sized>(
        &self,
        session: &mut S,
        aggregate: &ResultAggregate,
        sensors: &CompletionBarrier<Modality>,
        device_id: &str,
    ) -> Result<PublishOutcome, PublishError> {
        let required = SignalSet::<Modality>::all();
        let released = match self.config.sensor_timeout {
            None => sensors.wait(required, WaitMode::All, true).await,
            Some(timeout) => match sensors.wait_timeout(required, WaitMode::All, true, timeout).await {
                Some(released) => released,
                None => {
                    let missing = required.difference(sensors.raised()).iter().collect();
                    return Err(PublishError::SensorsIncomplete { missing });
                }
            },
        };

        let readings = aggregate.released(released);
        for modality in readings.unavailable() {
            warn!("{} has no reading, leaving it out of the message", modality);
        }

        let topic = telemetry_topic(device_id)?;
        let message = TelemetryMessage::from_readings(&readings);
        let payload = message.to_payload(self.config.max_payload)?;

        info!(
            "publishing reading [{}] to {} ({} bytes)",
            String::from_utf8_lossy(&payload),
            topic,
            payload.len()
        );
        session.publish(&topic, &payload, QoS::AtLeastOnce, false).await?;

        let drained = self.drain(session).await?;
        info!(
            "publish settled after {} polls ({} acknowledgments)",
            drained.polls, drained.acknowledgments
        );

        Ok(PublishOutcome::Delivered {
            topic: topic.as_str().to_owned(),
            message,
            polls: drained.polls,
            acknowledgments: drained.acknowledgments,
        })
    }

    async fn drain<S: Session + ?Sized>(&self, session: &mut S) -> Result<Drained, PublishError> {
        let mut acknowledgments = 0;

        for poll in 1..=self.config.max_polls {
            match session.poll(self.config.poll_timeout).await {
                Ok(SessionEvent::Idle) => {
                    return Ok(Drained {
                        polls: poll,
                        acknowledgments,
                    })
                }
                Ok(SessionEvent::Acknowledged { packet_id }) => {
                    info!("acknowledgment received for packet id {}", packet_id);
                    acknowledgments += 1;
                }
                Ok(SessionEvent::Progress) => debug!("poll {}: still in flight", poll),
                Err(e) if acknowledgments > 0 => {
                    warn!("event loop stopped after acknowledgment: {}", e);
                    return Ok(Drained {
                        polls: poll,
                        acknowledgments,
                    });
                }
                Err(e) => return Err(e),
            }

            if poll < self.config.max_polls {
                tokio::time::sleep(self.config.poll_delay).await;
            }
        }

        Err(PublishError::Unsettled {
            polls: self.config.max_polls,
        })
    }
}
