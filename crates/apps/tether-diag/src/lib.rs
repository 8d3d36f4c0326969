//! Diagnostic harness for tether gateways.
//!
//! Builds an [`InvocationGateway`](tether_rpc::InvocationGateway) over a
//! [`LoopbackTransport`](tether_rpc::LoopbackTransport) populated with
//! simulated clients described in a TOML file, so the call paths can be
//! exercised without a real push transport.

pub mod config;
pub mod harness;

pub use config::{ClientBehavior, ClientConfig, DiagConfig, DiagConfigError};
pub use harness::{parse_target, DiagHarness};
