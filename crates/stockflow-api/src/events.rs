// Event streaming HTTP routes (SSE)
//
// Forwards the merchant's four progress-bus topics as named SSE events with
// a comment heartbeat every 15 seconds. No replay: reconnecting clients
// resume from "now" and are expected to poll workflow status for anything
// they missed.

use axum::{
    extract::{Path, State},
    response::sse::{Event as SseEvent, KeepAlive, Sse},
    routing::get,
    Router,
};
use futures::stream::Stream;
use std::convert::Infallible;
use std::time::Duration;
use uuid::Uuid;

use stockflow_queue::MerchantSubscription;

use crate::AppState;

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/api/events/:merchant_id", get(stream_events))
        .with_state(state)
}

/// GET /api/events/{merchant_id} - live progress stream
pub async fn stream_events(
    State(state): State<AppState>,
    Path(merchant_id): Path<Uuid>,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    tracing::info!(merchant_id = %merchant_id, "event stream opened");
    let subscription = state.bus.subscribe(merchant_id);

    let stream = futures::stream::unfold(subscription, |mut subscription| async move {
        let msg = subscription.next().await?;
        let event = SseEvent::default()
            .event(MerchantSubscription::event_name(&msg.topic))
            .data(msg.payload);
        Some((Ok(event), subscription))
    });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("heartbeat"),
    )
}
