use axum::http::HeaderMap;
use uuid::Uuid;

pub const TRACE_ID_HEADER: &str = "x-trace-id";

/// Trace id supplied by the client on the upgrade request, or a fresh one.
/// Recorded on the connection's span.
pub fn trace_id_from_headers(headers: &HeaderMap) -> String {
    headers
        .get(TRACE_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|trace_id| !trace_id.is_empty())
        .map(ToOwned::to_owned)
        .unwrap_or_else(generate_trace_id)
}

fn generate_trace_id() -> String {
    Uuid::new_v4().to_string()
}
