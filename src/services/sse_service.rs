use std::{convert::Infallible, time::Duration};

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use tokio::sync::{
    broadcast::{self, error::RecvError},
    mpsc,
};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    dto::sse::{ServerEvent, StreamHandshake},
    error::ServiceError,
    services::{room_events::EVENT_STREAM_READY, session_service},
    state::SharedState,
};

/// Subscribe to the room of an existing session.
pub async fn subscribe_session(
    state: &SharedState,
    session_id: Uuid,
) -> Result<broadcast::Receiver<ServerEvent>, ServiceError> {
    session_service::get(state, session_id).await?;
    Ok(state.rooms().subscribe(session_id))
}

/// Convert a room receiver into an SSE response, forwarding events and
/// pruning the room once the client disconnects.
pub fn to_sse_stream(
    state: SharedState,
    session_id: Uuid,
    mut receiver: broadcast::Receiver<ServerEvent>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    // small bounded channel between forwarder and response
    let (tx, rx) = mpsc::channel::<Result<Event, Infallible>>(8);
    let handshake = StreamHandshake {
        session_id,
        degraded: state.is_degraded(),
    };

    tokio::spawn(async move {
        match ServerEvent::json(EVENT_STREAM_READY, &handshake) {
            Ok(event) => {
                if tx.send(Ok(to_sse_event(event))).await.is_err() {
                    drop(receiver);
                    state.rooms().prune_idle(session_id);
                    return;
                }
            }
            Err(err) => warn!(error = %err, "failed to serialize stream handshake"),
        }

        loop {
            tokio::select! {
                _ = tx.closed() => break,
                recv_result = receiver.recv() => {
                    match recv_result {
                        Ok(payload) => {
                            if tx.send(Ok(to_sse_event(payload))).await.is_err() {
                                break;
                            }
                        }
                        Err(RecvError::Closed) => break,
                        Err(RecvError::Lagged(_)) => {
                            // Skip lagged messages but keep the stream alive.
                            continue;
                        }
                    }
                }
            }
        }

        drop(receiver);
        state.rooms().prune_idle(session_id);
        info!(session_id = %session_id, "session SSE stream disconnected");
    });

    // response stream reads from mpsc; when client disconnects axum drops this stream
    let stream = ReceiverStream::new(rx);
    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}

fn to_sse_event(payload: ServerEvent) -> Event {
    Event::default()
        .event(payload.event)
        .data(payload.data.to_string())
}
