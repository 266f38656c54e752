pub mod auth;
pub mod bootstrap;
pub mod bracket_tool_calls;
pub mod coordinator;
pub mod dialects;
pub mod engine;
pub mod error;
pub mod event_stream;
pub mod model_cache;
pub mod rate_limiter;
pub mod reconciler;
pub mod token_counter;
pub mod upstream_client;

pub use auth::{AuthManager, SharedAuthManager};
pub use engine::{ChatOutcome, Engine, EngineConfig, MessagesOutcome};
pub use error::{AuthError, GatewayError};
pub use model_cache::ModelCache;
pub use rate_limiter::RateLimiter;
pub use token_counter::{TokenCounter, TokenUsage};
pub use upstream_client::{RetryClient, RetryOutcome};
