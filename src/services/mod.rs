/// Answer recording, attempts and leaderboard reads.
pub mod answer_service;
/// OpenAPI documentation generation.
pub mod documentation;
/// WebSocket connection and message handling service.
pub mod gateway_service;
/// Health check service.
pub mod health_service;
/// Session lifecycle transitions: start, pause, resume, stop, expire.
pub mod lifecycle_service;
/// Room event names and broadcast helpers.
pub mod room_events;
/// Session creation, joins and reconnect recovery.
pub mod session_service;
/// Server-Sent Events streaming of session rooms.
pub mod sse_service;
/// Storage connection supervisor with backoff and degraded mode.
pub mod storage_supervisor;
/// Countdown engine.
pub mod timer_service;
