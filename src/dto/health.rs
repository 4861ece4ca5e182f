use serde::Serialize;
use utoipa::ToSchema;

/// Health payload returned by the `/healthcheck` route.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// Health status ("ok" or "degraded").
    pub status: String,
    /// Sessions with a ticking countdown in this process.
    pub armed_timers: usize,
    /// Session rooms currently open.
    pub open_rooms: usize,
    /// Realtime sockets currently connected.
    pub connections: usize,
}

impl HealthResponse {
    /// Build a response from the degraded flag and live counters.
    pub fn new(degraded: bool, armed_timers: usize, open_rooms: usize, connections: usize) -> Self {
        Self {
            status: if degraded { "degraded" } else { "ok" }.to_string(),
            armed_timers,
            open_rooms,
            connections,
        }
    }
}
