//! HTTP-layer plumbing: handlers, request extractors, and middleware.
pub mod handlers;
pub mod middleware;

/// Known DockerFlow endpoints, kept in sync with the routes registered in
/// `server::Server::with_settings`.
pub const DOCKER_FLOW_ENDPOINTS: [&str; 4] = [
    "/__heartbeat__",
    "/__lbheartbeat__",
    "/__version__",
    "/__error__",
];
