use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{get, post},
};
use axum_valid::Valid;
use uuid::Uuid;
use validator::Validate;

use crate::{
    dto::{
        session::{
            AttemptView, CreateSessionRequest, CreateSessionResponse, JoinRequest, LaunchRequest,
            LaunchResponse, SessionView, SubmitAttemptRequest, TransitionResponse,
        },
        sse::LeaderboardRowDto,
    },
    error::AppError,
    services::{answer_service, lifecycle_service, session_service},
    state::{SharedState, clock::from_epoch_millis},
};

/// Teacher and student control endpoints of live sessions.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new()
        .route("/sessions", get(list_sessions).post(create_session))
        .route("/sessions/join", post(join_session))
        .route("/sessions/{id}", get(get_session))
        .route("/sessions/{id}/launch", post(launch_session))
        .route("/sessions/{id}/pause", post(pause_session))
        .route("/sessions/{id}/resume", post(resume_session))
        .route("/sessions/{id}/end", post(end_session))
        .route("/sessions/{id}/leaderboard", get(get_leaderboard))
        .route("/sessions/{id}/submit", post(submit_attempt))
        .route("/sessions/{id}/attempts", get(list_attempts))
}

/// Open a live session for a quiz and hand out its join code.
#[utoipa::path(
    post,
    path = "/sessions",
    tag = "sessions",
    request_body = CreateSessionRequest,
    responses(
        (status = 200, description = "Session created", body = CreateSessionResponse),
        (status = 404, description = "Unknown quiz"),
        (status = 503, description = "Storage unavailable")
    )
)]
pub async fn create_session(
    State(state): State<SharedState>,
    Valid(Json(payload)): Valid<Json<CreateSessionRequest>>,
) -> Result<Json<CreateSessionResponse>, AppError> {
    let session = session_service::create(&state, &payload.quiz_id, &payload.teacher_id).await?;
    Ok(Json(CreateSessionResponse {
        session_id: session.id,
        join_code: session.join_code,
    }))
}

/// List sessions that have not ended.
#[utoipa::path(
    get,
    path = "/sessions",
    tag = "sessions",
    responses((status = 200, description = "Active sessions", body = [SessionView]))
)]
pub async fn list_sessions(
    State(state): State<SharedState>,
) -> Result<Json<Vec<SessionView>>, AppError> {
    let now = state.clock().now();
    let sessions = session_service::list_active(&state).await?;
    Ok(Json(
        sessions
            .iter()
            .map(|session| SessionView::new(session, now))
            .collect(),
    ))
}

#[utoipa::path(
    get,
    path = "/sessions/{id}",
    tag = "sessions",
    params(("id" = Uuid, Path, description = "Session identifier")),
    responses(
        (status = 200, description = "Session", body = SessionView),
        (status = 404, description = "Unknown session")
    )
)]
pub async fn get_session(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionView>, AppError> {
    let session = session_service::get(&state, id).await?;
    Ok(Json(SessionView::new(&session, state.clock().now())))
}

/// Start the countdown of a ready session.
#[utoipa::path(
    post,
    path = "/sessions/{id}/launch",
    tag = "sessions",
    params(("id" = Uuid, Path, description = "Session identifier")),
    request_body = LaunchRequest,
    responses(
        (status = 200, description = "Session running", body = LaunchResponse),
        (status = 400, description = "Duration or start time out of range"),
        (status = 409, description = "Session is not ready")
    )
)]
pub async fn launch_session(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    payload: Option<Json<LaunchRequest>>,
) -> Result<Json<LaunchResponse>, AppError> {
    let Json(payload) = payload.unwrap_or_default();
    payload.validate()?;
    let start_at = payload.start_at.map(from_epoch_millis);
    let session = lifecycle_service::start(&state, id, payload.duration_sec, start_at).await?;
    Ok(Json(LaunchResponse::from(&session)))
}

#[utoipa::path(
    post,
    path = "/sessions/{id}/pause",
    tag = "sessions",
    params(("id" = Uuid, Path, description = "Session identifier")),
    responses(
        (status = 200, description = "Session paused", body = TransitionResponse),
        (status = 409, description = "Session is not running")
    )
)]
pub async fn pause_session(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<TransitionResponse>, AppError> {
    let session = lifecycle_service::pause(&state, id).await?;
    Ok(Json(TransitionResponse::new(&session, state.clock().now())))
}

#[utoipa::path(
    post,
    path = "/sessions/{id}/resume",
    tag = "sessions",
    params(("id" = Uuid, Path, description = "Session identifier")),
    responses(
        (status = 200, description = "Session running again", body = TransitionResponse),
        (status = 409, description = "Session is not paused")
    )
)]
pub async fn resume_session(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<TransitionResponse>, AppError> {
    let session = lifecycle_service::resume(&state, id).await?;
    Ok(Json(TransitionResponse::new(&session, state.clock().now())))
}

/// End a running or paused session early.
#[utoipa::path(
    post,
    path = "/sessions/{id}/end",
    tag = "sessions",
    params(("id" = Uuid, Path, description = "Session identifier")),
    responses(
        (status = 200, description = "Session ended", body = TransitionResponse),
        (status = 409, description = "Session is not running or paused")
    )
)]
pub async fn end_session(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<TransitionResponse>, AppError> {
    let session = lifecycle_service::stop(&state, id).await?;
    Ok(Json(TransitionResponse::new(&session, state.clock().now())))
}

/// Join a session with the code shown to the class.
#[utoipa::path(
    post,
    path = "/sessions/join",
    tag = "sessions",
    request_body = JoinRequest,
    responses(
        (status = 200, description = "Joined", body = SessionView),
        (status = 404, description = "Unknown join code"),
        (status = 410, description = "Session is over")
    )
)]
pub async fn join_session(
    State(state): State<SharedState>,
    Valid(Json(payload)): Valid<Json<JoinRequest>>,
) -> Result<Json<SessionView>, AppError> {
    let session = session_service::join_by_code(
        &state,
        &payload.join_code,
        payload.student_id.trim(),
        payload.name.trim(),
    )
    .await?;
    Ok(Json(SessionView::new(&session, state.clock().now())))
}

#[utoipa::path(
    get,
    path = "/sessions/{id}/leaderboard",
    tag = "sessions",
    params(("id" = Uuid, Path, description = "Session identifier")),
    responses((status = 200, description = "Ranked rows", body = [LeaderboardRowDto]))
)]
pub async fn get_leaderboard(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<LeaderboardRowDto>>, AppError> {
    let rows = answer_service::leaderboard(&state, id).await?;
    Ok(Json(rows.into_iter().map(Into::into).collect()))
}

/// Turn in a student's attempt.
#[utoipa::path(
    post,
    path = "/sessions/{id}/submit",
    tag = "sessions",
    params(("id" = Uuid, Path, description = "Session identifier")),
    request_body = SubmitAttemptRequest,
    responses(
        (status = 200, description = "Attempt submitted", body = AttemptView),
        (status = 410, description = "Session is over")
    )
)]
pub async fn submit_attempt(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Valid(Json(payload)): Valid<Json<SubmitAttemptRequest>>,
) -> Result<Json<AttemptView>, AppError> {
    let attempt = answer_service::submit_attempt(&state, id, payload.student_id.trim()).await?;
    Ok(Json(AttemptView::from(&attempt)))
}

#[utoipa::path(
    get,
    path = "/sessions/{id}/attempts",
    tag = "sessions",
    params(("id" = Uuid, Path, description = "Session identifier")),
    responses((status = 200, description = "Attempts of the session", body = [AttemptView]))
)]
pub async fn list_attempts(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<AttemptView>>, AppError> {
    let attempts = answer_service::list_session_attempts(&state, id).await?;
    Ok(Json(attempts.iter().map(AttemptView::from).collect()))
}
