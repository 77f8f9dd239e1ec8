//! Event gateway: the only contact point with the order, fleet and
//! notification collaborators.
//!
//! Inbound work topics are consumed by [`EventGateway::run`]. Engine state
//! changes are applied in arrival order on the consumer loop; the resulting
//! outbound events are published from spawned tasks through [`emit`], which
//! retries `Unavailable` failures with exponential backoff and dead-letters
//! the event once attempts run out.

pub mod bus;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use backoff::future::retry;
use backoff::ExponentialBackoff;
use chrono::Utc;
use futures::stream::BoxStream;
use futures::StreamExt;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::engine::RideResolution;
use crate::error::DispatchError;
use crate::gateway::bus::WORK_TOPICS;
use crate::models::event::{DeadLetter, DispatchEvent, TOPIC_DEAD_LETTER};
use crate::models::order::MatchRequest;
use crate::state::AppState;

pub struct EventGateway {
    state: Arc<AppState>,
    inbound: BoxStream<'static, Result<DispatchEvent, BroadcastStreamRecvError>>,
}

impl EventGateway {
    /// Subscribes to the inbound topics immediately, so events published after
    /// this returns are never missed even if `run` starts later.
    pub fn subscribe(state: Arc<AppState>) -> Self {
        let streams = WORK_TOPICS
            .into_iter()
            .map(|topic| BroadcastStream::new(state.bus.subscribe(topic)));
        let inbound = futures::stream::select_all(streams).boxed();

        Self { state, inbound }
    }

    pub async fn run(mut self) {
        info!("event gateway started");

        while let Some(item) = self.inbound.next().await {
            match item {
                Ok(event) => handle_event(&self.state, event),
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    // Work topics refuse publishes when full, so this means a
                    // bus that does not apply backpressure.
                    error!(skipped, "event gateway lagged behind; inbound events dropped");
                }
            }
        }

        warn!("event gateway stopped: bus closed");
    }
}

pub fn handle_event(state: &Arc<AppState>, event: DispatchEvent) {
    match event {
        DispatchEvent::RideRequested(ride) => {
            let source = DispatchEvent::RideRequested(ride.clone());
            let request = MatchRequest::from(ride);
            let lead = state.config.gateway.scheduled_lead;

            match request.scheduled_at {
                Some(scheduled_at) if scheduled_at - lead > Utc::now() => {
                    let wait = (scheduled_at - lead - Utc::now())
                        .to_std()
                        .unwrap_or(Duration::ZERO);
                    info!(order_id = %request.order_id, wait_secs = wait.as_secs(), "deferring scheduled ride");
                    let state = state.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(wait).await;
                        process_ride_request(&state, &request, source);
                    });
                }
                _ => process_ride_request(state, &request, source),
            }
        }
        DispatchEvent::RideCancelled(cancelled) => {
            let report = state.dispatcher.cancel_order(cancelled.order_id);
            debug!(order_id = %cancelled.order_id, already_cancelled = report.already_cancelled, "ride cancellation applied");
        }
        DispatchEvent::DriverStatusChanged(changed) => {
            if let Err(err) = state
                .dispatcher
                .update_driver_status(changed.driver_id, &changed.update)
            {
                warn!(driver_id = %changed.driver_id, error = %err, "rejected driver status update");
            }
        }
        DispatchEvent::DriverAssigned(_)
        | DispatchEvent::MatchFailed(_)
        | DispatchEvent::DeadLettered(_) => {
            debug!("ignoring outbound event on an inbound topic");
        }
    }
}

/// Matches `request` now and publishes the outcome from a separate task, so a
/// broker outage never stalls the consumer loop.
pub fn process_ride_request(state: &Arc<AppState>, request: &MatchRequest, source: DispatchEvent) {
    let start = Instant::now();
    let resolution = state.dispatcher.dispatch(request);
    let outcome = resolution_label(&resolution);

    state
        .metrics
        .match_latency_seconds
        .with_label_values(&[outcome])
        .observe(start.elapsed().as_secs_f64());
    state.metrics.matches_total.with_label_values(&[outcome]).inc();

    let state = state.clone();
    tokio::spawn(async move {
        emit_resolution(&state, resolution, Some(source)).await;
    });
}

pub fn resolution_label(resolution: &RideResolution) -> &'static str {
    match resolution {
        RideResolution::Assigned(_) => "assigned",
        RideResolution::Listed(_) => "listed",
        RideResolution::Failed(_) => "failed",
        RideResolution::Duplicate => "duplicate",
    }
}

/// Publishes the event a resolution calls for, if any.
pub async fn emit_resolution(state: &AppState, resolution: RideResolution, source: Option<DispatchEvent>) {
    let event = match resolution {
        RideResolution::Assigned(assigned) => DispatchEvent::DriverAssigned(assigned),
        RideResolution::Failed(failed) => DispatchEvent::MatchFailed(failed),
        RideResolution::Listed(order) => {
            debug!(order_id = %order.order_id, "order awaiting grab");
            return;
        }
        RideResolution::Duplicate => return,
    };

    // A failed emission is recorded in the dead-letter store by `emit`.
    let _ = emit(state, event, source).await;
}

/// Publish with bounded retries. Only `Unavailable` is retried; anything else,
/// or running out of attempts, dead-letters the event.
pub async fn emit(
    state: &AppState,
    event: DispatchEvent,
    source: Option<DispatchEvent>,
) -> Result<(), DispatchError> {
    let max_attempts = state.config.gateway.max_delivery_attempts.max(1);
    let attempts = AtomicU32::new(0);
    let initial_interval = Duration::from_millis(state.config.gateway.retry_initial_ms);
    let policy = ExponentialBackoff {
        initial_interval,
        current_interval: initial_interval,
        max_interval: Duration::from_secs(2),
        max_elapsed_time: None,
        ..Default::default()
    };
    let topic = event.topic();

    let result = retry(policy, || async {
        let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
        match state.bus.publish(topic, event.clone()) {
            Ok(()) => Ok(()),
            Err(err) if err.is_transient() && attempt < max_attempts => {
                warn!(topic, attempt, error = %err, "publish failed, retrying");
                Err(backoff::Error::transient(err))
            }
            Err(err) => Err(backoff::Error::permanent(err)),
        }
    })
    .await;

    match result {
        Ok(()) => {
            state.metrics.events_emitted_total.with_label_values(&[topic]).inc();
            Ok(())
        }
        Err(err) => {
            dead_letter(state, event, source, &err, attempts.load(Ordering::SeqCst));
            Err(err)
        }
    }
}

fn dead_letter(
    state: &AppState,
    event: DispatchEvent,
    source: Option<DispatchEvent>,
    err: &DispatchError,
    attempts: u32,
) {
    let letter = DeadLetter {
        id: Uuid::new_v4(),
        event: Box::new(event),
        source: source.map(Box::new),
        error: err.to_string(),
        attempts,
        dead_lettered_at: Utc::now(),
    };

    error!(
        dead_letter_id = %letter.id,
        topic = letter.event.topic(),
        attempts,
        error = %err,
        "event dead-lettered"
    );
    state.metrics.dead_letters_total.inc();
    state.dead_letters.insert(letter.id, letter.clone());

    if let Err(publish_err) = state
        .bus
        .publish(TOPIC_DEAD_LETTER, DispatchEvent::DeadLettered(letter))
    {
        debug!(error = %publish_err, "dead-letter topic unreachable");
    }
}
