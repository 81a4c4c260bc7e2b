//! SSE Bridge (C11).
//!
//! Bridges a bus [`Subscription`](crate::bus::Subscription) to a long-lived
//! `text/event-stream` response. Admission is checked once, at stream
//! open, exactly as listed in §4.11; revocation of an already-open
//! subscriber is allowed to close the stream at the next message boundary
//! rather than mid-event.

use std::convert::Infallible;
use std::time::Duration;

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::{self, Stream};

use crate::bus::Subscription;
use crate::envelope::EnvelopeWire;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Serializable wire form of a bus message for SSE framing (§6: `event:
/// <subject>\ndata: <json-encoded envelope>\n\n`).
fn to_wire(envelope: &crate::envelope::Envelope) -> EnvelopeWire {
    use base64::Engine;
    EnvelopeWire {
        producer: envelope.producer.clone(),
        subject: envelope.subject.clone(),
        payload: base64::engine::general_purpose::STANDARD.encode(&envelope.payload),
        timestamp: envelope.timestamp,
        labels: envelope.labels.clone(),
        signature: base64::engine::general_purpose::STANDARD.encode(envelope.signature),
    }
}

/// Build the axum SSE response for an already-admitted subscription.
/// Heartbeats are handled by axum's `KeepAlive`, matching the 15 s cadence
/// the wire format specifies.
pub fn stream_response(
    subscription: Subscription,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = stream::unfold(subscription, move |mut sub| async move {
        let message = sub.recv().await?;
        let wire = to_wire(&message.envelope);
        let data = serde_json::to_string(&wire).unwrap_or_default();
        let event = Event::default().event(message.subject.clone()).data(data);
        Some((Ok(event), sub))
    });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(HEARTBEAT_INTERVAL)
            .text("ping"),
    )
}
