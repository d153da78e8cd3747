pub mod auth;
pub mod realtime_db;
pub mod retry;

pub use auth::{Authenticator, UserSession};
pub use realtime_db::RealtimeDb;
pub use retry::RetryPolicy;
