//! `warden-org`: organisations with their domains, members, IDP
//! configurations and login policy.

pub mod config;
pub mod org;
pub mod repository;

pub use config::OrgConfig;
pub use org::{
    ORG_ACCESS_EVENTS, ORG_AGGREGATE, Org, OrgDomain, OrgState, UNIQUE_ORG_DOMAIN,
    org_by_id_query,
};
pub use repository::OrgEventstore;
