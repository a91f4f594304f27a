use crate::{error::AppError, state::AppState};
use actix_web::{web, HttpResponse};
use serde_json::json;

/// Current effective configuration. The pinning JWT is never echoed back.
pub async fn get_config(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let config = state.get_config();

    Ok(HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "config": {
            "server": {
                "host": config.server.host,
                "port": config.server.port
            },
            "recording": {
                "temp_dir": config.recording.temp_dir,
                "file_extension": config.recording.file_extension,
                "max_session_ms": config.recording.max_session_ms,
                "max_frame_bytes": config.recording.max_frame_bytes,
                "heartbeat_interval_secs": config.recording.heartbeat_interval_secs,
                "client_timeout_secs": config.recording.client_timeout_secs,
                "shutdown_drain_secs": config.recording.shutdown_drain_secs
            },
            "pinning": {
                "api_url": config.pinning.api_url,
                "gateway_url": config.pinning.gateway_url,
                "jwt": if config.pinning.jwt.is_empty() { "" } else { "***" },
                "request_timeout_secs": config.pinning.request_timeout_secs
            },
            "database": {
                "max_connections": config.database.max_connections
            },
            "auth": {
                "user_id_header": config.auth.user_id_header
            }
        }
    })))
}
