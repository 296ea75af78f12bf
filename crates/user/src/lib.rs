//! `warden-user`: human and machine users with a read-through cache.

pub mod repository;
pub mod user;

pub use repository::{LinkedExternalIdp, UserEventstore};
pub use user::{
    Address, Email, ExternalIdp, Human, Machine, MachineKey, MachineKeyType, Phone, Profile,
    USER_AGGREGATE, User, UserKind, UserState, user_by_id_query,
};
