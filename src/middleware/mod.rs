//! Request middleware wrapped around every route, including the websocket upgrade.

pub mod logging;
pub mod metrics;

pub use logging::RequestLogging;
pub use metrics::MetricsMiddleware;
