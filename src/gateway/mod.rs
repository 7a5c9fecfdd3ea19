pub mod callback;
pub mod client;
pub mod signature;

pub use callback::GatewayCallback;
pub use client::{GatewayClient, GATEWAY_DATETIME_FORMAT};
pub use signature::{DigestAlgorithm, SignatureAlgorithms, SignatureCodec};
