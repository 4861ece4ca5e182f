use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI specification for the classroom live backend.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::sessions::create_session,
        crate::routes::sessions::list_sessions,
        crate::routes::sessions::get_session,
        crate::routes::sessions::launch_session,
        crate::routes::sessions::pause_session,
        crate::routes::sessions::resume_session,
        crate::routes::sessions::end_session,
        crate::routes::sessions::join_session,
        crate::routes::sessions::get_leaderboard,
        crate::routes::sessions::submit_attempt,
        crate::routes::sessions::list_attempts,
        crate::routes::sse::session_stream,
        crate::routes::websocket::ws_handler,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::session::CreateSessionRequest,
            crate::dto::session::CreateSessionResponse,
            crate::dto::session::LaunchRequest,
            crate::dto::session::LaunchResponse,
            crate::dto::session::TransitionResponse,
            crate::dto::session::JoinRequest,
            crate::dto::session::SessionView,
            crate::dto::session::ParticipantView,
            crate::dto::session::SubmitAttemptRequest,
            crate::dto::session::AttemptView,
            crate::dto::session::AnswerView,
            crate::dto::sse::StreamHandshake,
            crate::dto::sse::SessionStartedEvent,
            crate::dto::sse::SessionPausedEvent,
            crate::dto::sse::SessionResumedEvent,
            crate::dto::sse::SessionEndedEvent,
            crate::dto::sse::SessionRecoveredEvent,
            crate::dto::sse::SessionExpiredEvent,
            crate::dto::sse::SessionIdleEvent,
            crate::dto::sse::TimerTickEvent,
            crate::dto::sse::ParticipantJoinedEvent,
            crate::dto::sse::LeaderboardRowDto,
            crate::dto::sse::LeaderboardUpdateEvent,
            crate::dto::sse::EndReason,
            crate::dto::ws::StudentJoinPayload,
            crate::dto::ws::StudentAnswerPayload,
            crate::dto::ws::TeacherStartPayload,
            crate::dto::ws::SessionRefPayload,
            crate::dto::ws::AnswerAck,
            crate::dto::ws::AnswerRejected,
            crate::dto::ws::ErrorEvent,
            crate::state::state_machine::SessionStatus,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "sessions", description = "Session lifecycle, joins, leaderboards and attempts"),
        (name = "realtime", description = "WebSocket gateway and session event streams"),
    )
)]
pub struct ApiDoc;
