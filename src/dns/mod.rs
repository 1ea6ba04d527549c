pub mod client;
pub mod reconciler;
pub mod verifier;

pub use client::CloudflareDnsClient;
pub use reconciler::reconcile;
pub use verifier::{verify, PropagationStatus, VerifierConfig};
