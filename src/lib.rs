pub mod artifact;
pub mod config;
pub mod confirm;
pub mod errors;
pub mod journal;
pub mod manifest;
pub mod network;
pub mod orchestrator;
pub mod phases;
pub mod plan;
pub mod retry;
pub mod signer;
pub mod types;
pub mod ui;
