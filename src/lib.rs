//! Order and payment orchestration for a notarization service: the intake
//! wizard, checkout sessions, delivered-file access grants and the
//! retention purge.

pub mod access;
pub mod catalog;
pub mod checkout;
pub mod config;
pub mod error;
pub mod pricing;
pub mod purge;
pub mod storage;
pub mod store;
pub mod submission;
pub mod telemetry;
pub mod utils;
pub mod wizard;

pub use error::NotaryError;
