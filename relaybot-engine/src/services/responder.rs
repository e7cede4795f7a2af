use std::{sync::Arc, time::Duration};

use futures::StreamExt;
use metrics::counter;
use shared::{config::Config, llms::ResponseDelta, llms::ResponseDeltaStream};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::{
    errors::{EngineError, EngineResult},
    services::{
        accumulator::{ResponseAccumulator, ResponseState},
        publisher::ChunkedEventPublisher,
        throttle::CoalescingScheduler,
    },
    transport::ChatTransport,
};

/// How a turn ended.
#[derive(Debug, Default)]
pub struct TurnOutcome {
    /// Ids of the reply's events, first to last.
    pub event_ids: Vec<String>,
    pub canceled: bool,
    /// Publish failures that were reported to the room and then skipped.
    pub publish_errors: Vec<EngineError>,
}

/// Drives one reply: folds model deltas, throttles publishing and finishes
/// the continuation chain.
pub struct Responder {
    room_id: String,
    accumulator: Mutex<ResponseAccumulator>,
    publisher: Arc<ChunkedEventPublisher>,
    scheduler: CoalescingScheduler<ResponseState>,
    failures: Arc<Mutex<Vec<EngineError>>>,
}

impl Responder {
    pub fn from_config(transport: Arc<dyn ChatTransport>, room_id: &str, config: &Config) -> Self {
        let publisher = Arc::new(ChunkedEventPublisher::new(
            transport,
            room_id,
            &config.bot.agent_id,
            &config.publisher,
        ));
        Self::new(
            room_id,
            publisher,
            ResponseAccumulator::with_placeholder(&config.publisher.thinking_message),
            Duration::from_millis(config.publisher.throttle_ms),
        )
    }

    pub fn new(
        room_id: &str,
        publisher: Arc<ChunkedEventPublisher>,
        accumulator: ResponseAccumulator,
        throttle: Duration,
    ) -> Self {
        let failures = Arc::new(Mutex::new(Vec::new()));

        let flush_publisher = Arc::clone(&publisher);
        let flush_failures = Arc::clone(&failures);
        let scheduler = CoalescingScheduler::new(throttle, move |state: ResponseState| {
            let publisher = Arc::clone(&flush_publisher);
            let failures = Arc::clone(&flush_failures);
            async move {
                if let Err(err) = publisher.publish(&state).await {
                    warn!(error = %err, "publish failed, reporting it in the room");
                    publisher.send_error(&err).await;
                    failures.lock().await.push(err);
                }
            }
        });

        Self {
            room_id: room_id.to_string(),
            accumulator: Mutex::new(accumulator),
            publisher,
            scheduler,
            failures,
        }
    }

    /// Sends the opening event if it has not been sent yet.
    ///
    /// # Errors
    /// Returns [`EngineError::PublishTransport`] if the event cannot be sent.
    pub async fn initialize(&self) -> EngineResult<String> {
        self.publisher.ensure_opening_event_sent().await
    }

    /// Applies a delta and schedules a publish when it changed anything.
    pub async fn on_delta(&self, delta: &ResponseDelta) -> bool {
        let snapshot = {
            let mut accumulator = self.accumulator.lock().await;
            accumulator
                .apply(delta)
                .then(|| accumulator.state().clone())
        };

        match snapshot {
            Some(state) => {
                self.scheduler.schedule(state).await;
                true
            }
            None => false,
        }
    }

    /// Flags the turn as canceled. The next publish carries the flag.
    pub async fn cancel(&self) -> bool {
        self.accumulator.lock().await.cancel()
    }

    /// Stops publishing and replaces the reply with an error message.
    pub async fn on_error(&self, failure: &EngineError) {
        self.scheduler.close().await;
        self.publisher.send_error(failure).await;
    }

    /// Marks the turn finished and publishes the final state unthrottled.
    pub async fn finalize(&self) -> TurnOutcome {
        let state = {
            let mut accumulator = self.accumulator.lock().await;
            accumulator.update(None, None, None, true);
            accumulator.state().clone()
        };
        let canceled = state.is_canceled;

        if !self.scheduler.flush_now(state).await {
            debug!(room_id = %self.room_id, "turn already closed, skipping final publish");
        }

        let event_ids = self
            .publisher
            .cursors()
            .await
            .into_iter()
            .filter_map(|cursor| cursor.event_id)
            .collect();
        let publish_errors = std::mem::take(&mut *self.failures.lock().await);

        TurnOutcome {
            event_ids,
            canceled,
            publish_errors,
        }
    }

    /// Consumes the model's output for this turn until it finishes, fails or
    /// `cancel` fires.
    ///
    /// # Errors
    /// Returns an error if the opening event cannot be sent or the model
    /// stream fails. A model failure is reported in the room first.
    #[instrument(name = "relaybot.turn", skip_all, fields(room_id = %self.room_id))]
    pub async fn run(
        &self,
        mut deltas: ResponseDeltaStream,
        cancel: CancellationToken,
    ) -> EngineResult<TurnOutcome> {
        self.initialize().await?;

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    info!("turn canceled");
                    self.cancel().await;
                    break;
                }
                next = deltas.next() => {
                    match next {
                        Some(Ok(delta)) => {
                            let done = delta.finished;
                            self.on_delta(&delta).await;
                            if done {
                                break;
                            }
                        }
                        Some(Err(err)) => {
                            let err = EngineError::from(err);
                            error!(error = %err, "model stream failed");
                            counter!("relaybot_turns_total", "outcome" => "failed").increment(1);
                            self.on_error(&err).await;
                            return Err(err);
                        }
                        None => break,
                    }
                }
            }
        }
        drop(deltas);

        let outcome = self.finalize().await;
        let label = if outcome.canceled { "canceled" } else { "completed" };
        counter!("relaybot_turns_total", "outcome" => label).increment(1);
        debug!(
            events = outcome.event_ids.len(),
            publish_errors = outcome.publish_errors.len(),
            "turn finished"
        );
        Ok(outcome)
    }
}
