pub mod middleware;
pub mod proxy;

pub use proxy::gateway_router;
