//! Realtime gateway: one WebSocket per client, multiplexing any number of session rooms.

use std::collections::HashMap;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use thiserror::Error;
use tokio::{
    sync::{broadcast::error::RecvError, mpsc},
    task::JoinHandle,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    dto::{
        sse::{
            ServerEvent, SessionExpiredEvent, SessionIdleEvent, SessionPausedEvent,
            SessionRecoveredEvent,
        },
        ws::{
            AnswerAck, AnswerRejected, ClientMessage, ErrorEvent, SessionRefPayload,
            StudentAnswerPayload, StudentJoinPayload, TeacherStartPayload,
        },
    },
    error::ServiceError,
    services::{
        answer_service::{self, AnswerSubmission},
        lifecycle_service,
        room_events::{
            EVENT_ANSWER_ACK, EVENT_ANSWER_REJECTED, EVENT_ERROR, EVENT_SESSION_EXPIRED,
            EVENT_SESSION_IDLE, EVENT_SESSION_PAUSED, EVENT_SESSION_RECOVERED,
        },
        session_service::{self, Recovery},
    },
    state::SharedState,
};

/// Error code sent when a frame cannot be parsed.
const INVALID_MESSAGE: &str = "invalid_message";

/// Failure while pushing a frame to the client.
#[derive(Debug, Error)]
enum GatewayError {
    /// Writer channel closed - connection should be terminated immediately.
    #[error("connection closed")]
    ConnectionClosed,
}

/// Per-socket bookkeeping: outbound channel plus one forwarder per joined room.
struct Connection {
    id: Uuid,
    tx: mpsc::UnboundedSender<Message>,
    rooms: HashMap<Uuid, JoinHandle<()>>,
}

impl Connection {
    fn new(tx: mpsc::UnboundedSender<Message>) -> Self {
        Self {
            id: Uuid::new_v4(),
            tx,
            rooms: HashMap::new(),
        }
    }

    /// Start forwarding a session's room events to this socket.
    fn attach(&mut self, state: &SharedState, session_id: Uuid) {
        if self
            .rooms
            .get(&session_id)
            .is_some_and(|forwarder| !forwarder.is_finished())
        {
            return;
        }

        let mut receiver = state.rooms().subscribe(session_id);
        let tx = self.tx.clone();
        let connection_id = self.id;
        let forwarder = tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(event) => match event.to_frame() {
                        Ok(frame) => {
                            if tx.send(Message::Text(frame.into())).is_err() {
                                break;
                            }
                        }
                        Err(err) => {
                            warn!(error = %err, event = %event.event, "failed to serialize room event")
                        }
                    },
                    Err(RecvError::Lagged(skipped)) => {
                        debug!(connection_id = %connection_id, skipped, "socket lagging behind room");
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });
        if let Some(previous) = self.rooms.insert(session_id, forwarder) {
            previous.abort();
        }
        debug!(connection_id = %self.id, session_id = %session_id, "joined room");
    }

    /// Stop forwarding a session's room events.
    async fn detach(&mut self, state: &SharedState, session_id: Uuid) {
        if let Some(forwarder) = self.rooms.remove(&session_id) {
            forwarder.abort();
            let _ = forwarder.await;
            state.rooms().prune_idle(session_id);
        }
    }

    async fn detach_all(&mut self, state: &SharedState) {
        let session_ids: Vec<Uuid> = self.rooms.keys().copied().collect();
        for session_id in session_ids {
            self.detach(state, session_id).await;
        }
    }

    fn send<T>(&self, event: &str, payload: &T) -> Result<(), GatewayError>
    where
        T: Serialize,
    {
        match ServerEvent::json(event, payload) {
            Ok(message) => send_message_to_websocket(&self.tx, &message),
            Err(err) => {
                warn!(event, error = %err, "failed to serialize reply");
                Ok(())
            }
        }
    }

    fn send_error(&self, session_id: Option<Uuid>, err: &ServiceError) -> Result<(), GatewayError> {
        self.send(
            EVENT_ERROR,
            &ErrorEvent {
                code: err.code().to_string(),
                message: err.to_string(),
                session_id,
            },
        )
    }
}

/// Handle the full lifecycle of a realtime client connection.
pub async fn handle_socket(state: SharedState, socket: WebSocket) {
    let (mut sender, mut receiver) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Message>();

    let writer_task = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            if sender.send(message).await.is_err() {
                break;
            }
        }
    });

    let mut connection = Connection::new(outbound_tx.clone());
    state.connections().insert(connection.id);
    info!(connection_id = %connection.id, "realtime client connected");

    while let Some(message) = receiver.next().await {
        match message {
            Ok(Message::Text(text)) => {
                let outcome = match ClientMessage::from_json_str(&text) {
                    Ok(message) => {
                        debug!(
                            connection_id = %connection.id,
                            session_id = ?message.session_id(),
                            "client message received"
                        );
                        dispatch(&state, &mut connection, message).await
                    }
                    Err(err) => {
                        warn!(connection_id = %connection.id, error = %err, "failed to parse or validate client message");
                        connection.send(
                            EVENT_ERROR,
                            &ErrorEvent {
                                code: INVALID_MESSAGE.to_string(),
                                message: err.to_string(),
                                session_id: None,
                            },
                        )
                    }
                };
                if let Err(GatewayError::ConnectionClosed) = outcome {
                    info!(connection_id = %connection.id, "writer closed, terminating");
                    break;
                }
            }
            Ok(Message::Ping(payload)) => {
                let _ = outbound_tx.send(Message::Pong(payload));
            }
            Ok(Message::Close(frame)) => {
                info!(connection_id = %connection.id, "realtime client closed");
                let _ = outbound_tx.send(Message::Close(frame));
                break;
            }
            Ok(Message::Binary(_)) => {}
            Ok(Message::Pong(_)) => {}
            Err(err) => {
                warn!(connection_id = %connection.id, error = %err, "websocket error");
                break;
            }
        }
    }

    connection.detach_all(&state).await;
    state.connections().remove(&connection.id);
    info!(connection_id = %connection.id, "realtime client disconnected");

    drop(connection);
    finalize(writer_task, outbound_tx).await;
}

async fn dispatch(
    state: &SharedState,
    connection: &mut Connection,
    message: ClientMessage,
) -> Result<(), GatewayError> {
    match message {
        ClientMessage::StudentJoin(payload) => handle_student_join(state, connection, payload).await,
        ClientMessage::StudentAnswer(payload) => handle_student_answer(state, connection, payload).await,
        ClientMessage::TeacherStart(TeacherStartPayload {
            session_id,
            duration_sec,
        }) => {
            connection.attach(state, session_id);
            let result = lifecycle_service::start(state, session_id, duration_sec, None).await;
            command_outcome(state, connection, session_id, result).await
        }
        ClientMessage::TeacherPause(SessionRefPayload { session_id }) => {
            connection.attach(state, session_id);
            let result = lifecycle_service::pause(state, session_id).await;
            command_outcome(state, connection, session_id, result).await
        }
        ClientMessage::TeacherResume(SessionRefPayload { session_id }) => {
            connection.attach(state, session_id);
            let result = lifecycle_service::resume(state, session_id).await;
            command_outcome(state, connection, session_id, result).await
        }
        ClientMessage::TeacherStop(SessionRefPayload { session_id }) => {
            connection.attach(state, session_id);
            let result = lifecycle_service::stop(state, session_id).await;
            command_outcome(state, connection, session_id, result).await
        }
        ClientMessage::TeacherReconnect(SessionRefPayload { session_id }) => {
            connection.attach(state, session_id);
            send_recovery(state, connection, session_id).await
        }
        ClientMessage::Unknown(event) => {
            debug!(connection_id = %connection.id, event = %event, "ignoring unknown event");
            Ok(())
        }
    }
}

async fn handle_student_join(
    state: &SharedState,
    connection: &mut Connection,
    payload: StudentJoinPayload,
) -> Result<(), GatewayError> {
    let StudentJoinPayload {
        session_id,
        student_id,
        name,
    } = payload;

    // Subscribe first so the joiner also sees its own participant:joined.
    connection.attach(state, session_id);
    match session_service::join(state, session_id, &student_id, &name).await {
        Ok(_) => send_recovery(state, connection, session_id).await,
        Err(err) => {
            warn!(session_id = %session_id, student_id = %student_id, error = %err, "join refused");
            connection.detach(state, session_id).await;
            connection.send_error(Some(session_id), &err)
        }
    }
}

async fn handle_student_answer(
    state: &SharedState,
    connection: &mut Connection,
    payload: StudentAnswerPayload,
) -> Result<(), GatewayError> {
    let question_id = payload.question_id.clone();
    let submission = AnswerSubmission {
        session_id: payload.session_id,
        student_id: payload.student_id,
        question_id: payload.question_id,
        answer: payload.answer,
        client_ts: payload.ts,
    };

    match answer_service::submit_answer(state, submission).await {
        Ok(_) => connection.send(EVENT_ANSWER_ACK, &AnswerAck { question_id }),
        Err(err) => {
            debug!(session_id = %payload.session_id, error = %err, "answer rejected");
            connection.send(
                EVENT_ANSWER_REJECTED,
                &AnswerRejected {
                    question_id,
                    code: err.code().to_string(),
                    message: err.to_string(),
                },
            )
        }
    }
}

/// Room broadcasts already carry the success; failures go back to the caller only.
async fn command_outcome<T>(
    state: &SharedState,
    connection: &mut Connection,
    session_id: Uuid,
    result: Result<T, ServiceError>,
) -> Result<(), GatewayError> {
    match result {
        Ok(_) => Ok(()),
        Err(err) => {
            warn!(session_id = %session_id, error = %err, "teacher command failed");
            if matches!(err, ServiceError::NotFound(_)) {
                connection.detach(state, session_id).await;
            }
            connection.send_error(Some(session_id), &err)
        }
    }
}

async fn send_recovery(
    state: &SharedState,
    connection: &Connection,
    session_id: Uuid,
) -> Result<(), GatewayError> {
    match session_service::recover(state, session_id).await {
        Ok(Recovery::Running { ends_at, remaining }) => connection.send(
            EVENT_SESSION_RECOVERED,
            &SessionRecoveredEvent {
                session_id,
                remaining,
                ends_at,
            },
        ),
        Ok(Recovery::Paused { remaining }) => connection.send(
            EVENT_SESSION_PAUSED,
            &SessionPausedEvent {
                session_id,
                remaining,
            },
        ),
        Ok(Recovery::Expired) => {
            connection.send(EVENT_SESSION_EXPIRED, &SessionExpiredEvent { session_id })
        }
        Ok(Recovery::Idle { status }) => connection.send(
            EVENT_SESSION_IDLE,
            &SessionIdleEvent { session_id, status },
        ),
        Err(err) => {
            warn!(session_id = %session_id, error = %err, "recovery failed");
            connection.send_error(Some(session_id), &err)
        }
    }
}

/// Serialize a payload and push it onto the provided WebSocket sender.
///
/// A serialization failure is logged and swallowed; a closed writer is
/// reported so the caller can terminate the connection.
fn send_message_to_websocket<T>(
    tx: &mpsc::UnboundedSender<Message>,
    value: &T,
) -> Result<(), GatewayError>
where
    T: ?Sized + Serialize + std::fmt::Debug,
{
    let payload = match serde_json::to_string(value) {
        Ok(payload) => payload,
        Err(err) => {
            warn!(error = %err, "failed to serialize message `{value:?}`");
            return Ok(());
        }
    };

    tx.send(Message::Text(payload.into()))
        .map_err(|_| GatewayError::ConnectionClosed)
}

/// Ensure the writer task winds down before we return from the socket handler.
async fn finalize(writer_task: JoinHandle<()>, outbound_tx: mpsc::UnboundedSender<Message>) {
    drop(outbound_tx);
    let _ = writer_task.await;
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use serde_json::Value;

    use super::*;
    use crate::{
        config::AppConfig,
        dao::session_store::{MemorySessionStore, SessionStore},
        services::room_events::{EVENT_PARTICIPANT_JOINED, EVENT_SESSION_STARTED},
        state::AppState,
    };

    async fn live_state() -> SharedState {
        let state = AppState::new(AppConfig::default());
        let store = Arc::new(MemorySessionStore::new());
        for quiz in state.config().quizzes() {
            SessionStore::save_quiz(store.as_ref(), quiz.clone())
                .await
                .unwrap();
        }
        state.install_store(store).await;
        state
    }

    fn socket() -> (Connection, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Connection::new(tx), rx)
    }

    /// Let forwarders run, then collect every frame written so far.
    async fn frames(rx: &mut mpsc::UnboundedReceiver<Message>) -> Vec<Value> {
        tokio::time::sleep(Duration::from_millis(10)).await;
        let mut frames = Vec::new();
        while let Ok(message) = rx.try_recv() {
            if let Message::Text(text) = message {
                frames.push(serde_json::from_str(text.as_str()).unwrap());
            }
        }
        frames
    }

    fn data<'a>(frames: &'a [Value], event: &str) -> &'a Value {
        frames
            .iter()
            .find(|frame| frame["event"] == event)
            .map(|frame| &frame["data"])
            .unwrap_or_else(|| panic!("no `{event}` frame in {frames:?}"))
    }

    fn join(session_id: Uuid) -> ClientMessage {
        ClientMessage::StudentJoin(StudentJoinPayload {
            session_id,
            student_id: "s1".into(),
            name: "Ada".into(),
        })
    }

    #[tokio::test(start_paused = true)]
    async fn join_before_launch_gets_idle_reply() {
        let state = live_state().await;
        let session = session_service::create(&state, "demo", "t").await.unwrap();
        let (mut connection, mut rx) = socket();

        dispatch(&state, &mut connection, join(session.id)).await.unwrap();

        let frames = frames(&mut rx).await;
        let joined = data(&frames, EVENT_PARTICIPANT_JOINED);
        assert_eq!(joined["studentId"], "s1");
        assert_eq!(joined["count"], 1);
        assert_eq!(data(&frames, EVENT_SESSION_IDLE)["status"], "ready");
    }

    #[tokio::test(start_paused = true)]
    async fn join_mid_countdown_gets_remaining_time() {
        let state = live_state().await;
        let session = session_service::create(&state, "demo", "t").await.unwrap();
        lifecycle_service::start(&state, session.id, Some(60), None)
            .await
            .unwrap();
        let (mut connection, mut rx) = socket();

        dispatch(&state, &mut connection, join(session.id)).await.unwrap();

        let frames = frames(&mut rx).await;
        assert_eq!(data(&frames, EVENT_PARTICIPANT_JOINED)["count"], 1);
        let recovered = data(&frames, EVENT_SESSION_RECOVERED);
        assert_eq!(recovered["remaining"], 60);
        assert_eq!(recovered["sessionId"], session.id.to_string());
    }

    #[tokio::test(start_paused = true)]
    async fn join_after_end_is_refused_and_detached() {
        let state = live_state().await;
        let session = session_service::create(&state, "demo", "t").await.unwrap();
        lifecycle_service::start(&state, session.id, Some(60), None)
            .await
            .unwrap();
        lifecycle_service::stop(&state, session.id).await.unwrap();
        let (mut connection, mut rx) = socket();

        dispatch(&state, &mut connection, join(session.id)).await.unwrap();

        let frames = frames(&mut rx).await;
        assert_eq!(data(&frames, EVENT_ERROR)["code"], "expired");
        assert!(!connection.rooms.contains_key(&session.id));
        assert_eq!(state.rooms().member_count(session.id), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn answer_after_time_is_up_is_rejected_as_expired() {
        let state = live_state().await;
        let session = session_service::create(&state, "demo", "t").await.unwrap();
        session_service::join(&state, session.id, "s1", "Ada")
            .await
            .unwrap();
        lifecycle_service::start(&state, session.id, Some(60), None)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(61)).await;
        let (mut connection, mut rx) = socket();

        let answer = ClientMessage::StudentAnswer(StudentAnswerPayload {
            session_id: session.id,
            student_id: "s1".into(),
            question_id: "q1".into(),
            answer: "42".into(),
            ts: None,
        });
        dispatch(&state, &mut connection, answer).await.unwrap();

        let frames = frames(&mut rx).await;
        let rejected = data(&frames, EVENT_ANSWER_REJECTED);
        assert_eq!(rejected["code"], "expired");
        assert_eq!(rejected["questionId"], "q1");
    }

    #[tokio::test(start_paused = true)]
    async fn teacher_command_on_unknown_session_detaches() {
        let state = live_state().await;
        let session_id = Uuid::new_v4();
        let (mut connection, mut rx) = socket();

        let pause = ClientMessage::TeacherPause(SessionRefPayload { session_id });
        dispatch(&state, &mut connection, pause).await.unwrap();

        let frames = frames(&mut rx).await;
        let error = data(&frames, EVENT_ERROR);
        assert_eq!(error["code"], "not_found");
        assert_eq!(error["sessionId"], session_id.to_string());
        assert!(connection.rooms.is_empty());
        assert_eq!(state.rooms().room_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn teacher_start_reaches_the_room_and_reconnect_recovers() {
        let state = live_state().await;
        let session = session_service::create(&state, "demo", "t").await.unwrap();
        let (mut connection, mut rx) = socket();

        let start = ClientMessage::TeacherStart(TeacherStartPayload {
            session_id: session.id,
            duration_sec: Some(90),
        });
        dispatch(&state, &mut connection, start).await.unwrap();
        let frames_after_start = frames(&mut rx).await;
        assert!(data(&frames_after_start, EVENT_SESSION_STARTED)["endsAt"].is_u64());

        let reconnect = ClientMessage::TeacherReconnect(SessionRefPayload {
            session_id: session.id,
        });
        dispatch(&state, &mut connection, reconnect).await.unwrap();
        let frames = frames(&mut rx).await;
        assert_eq!(data(&frames, EVENT_SESSION_RECOVERED)["remaining"], 90);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_to_ended_session_reports_expired() {
        let state = live_state().await;
        let session = session_service::create(&state, "demo", "t").await.unwrap();
        lifecycle_service::start(&state, session.id, Some(0), None)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        let (mut connection, mut rx) = socket();

        let reconnect = ClientMessage::TeacherReconnect(SessionRefPayload {
            session_id: session.id,
        });
        dispatch(&state, &mut connection, reconnect).await.unwrap();

        let frames = frames(&mut rx).await;
        assert_eq!(data(&frames, EVENT_SESSION_EXPIRED)["sessionId"], session.id.to_string());
    }
}
