//! Operator HTTP API
//!
//! Bet placement, round lookup, webhook/outbox/audit listings and the live
//! event stream, all scoped to the operator named by `X-Operator-Key`.

pub mod errors;
pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod server;
pub mod stream;

pub use handlers::AppState;
pub use routes::create_router;
pub use server::ApiServer;
