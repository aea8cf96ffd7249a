// Web Interface module root
pub mod routes;
pub mod web_server;

pub use web_server::WebServer;

/// API error payload
#[derive(serde::Serialize)]
pub(crate) struct ApiError {
    message: String,
}
