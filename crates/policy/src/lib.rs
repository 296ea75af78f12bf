//! `warden-policy`: password policies per org, with instance defaults.

pub mod kinds;
pub mod policy;
pub mod repository;

pub use kinds::{PasswordAgePolicy, PasswordComplexityPolicy, PasswordLockoutPolicy, PolicyDefaults};
pub use policy::{Policy, PolicyKind, policy_query};
pub use repository::PolicyEventstore;
