pub mod inbound_anthropic;
pub mod inbound_openai;
pub mod outbound_anthropic;
pub mod outbound_openai;
pub mod upstream_envelope;

pub use inbound_anthropic::from_anthropic_request;
pub use inbound_openai::from_openai_request;
pub use upstream_envelope::build_upstream_request;
