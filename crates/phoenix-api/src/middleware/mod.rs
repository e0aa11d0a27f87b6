pub mod auth;
pub mod rate_limit;
pub mod request_id;

pub use auth::{require_role, AgentIdentity, AuthUser};
pub use rate_limit::RateLimiter;
pub use request_id::{request_id_middleware, RequestId};
