//! Cross-crate integration scenarios.

mod crypto_vectors;
mod ingress;
mod request_flow;
mod supervisor_flow;
