//! Infrastructure layer: view storage, the spooler feeding views from the
//! event log, the concrete views, cross-aggregate removals and process
//! configuration.

pub mod config;
pub mod idp_removal;
pub mod projections;
pub mod read_model;
pub mod spooler;

pub use config::WardenConfig;
pub use idp_removal::IdpRemovals;

#[cfg(test)]
mod test_support;
