//! `warden-iam`: the IAM aggregate and the access-control model it shares
//! with orgs (members, IDP configurations, login policy).

pub mod access_control;
pub mod commands;
pub mod iam;
pub mod repository;

pub use access_control::{
    AccessControl, AccessControlEvents, HasAccessControl, IdpConfig, IdpConfigState,
    IdpProvider, IdpProviderType, IdpStylingType, LoginPolicy, Member, OidcIdpConfig,
    OidcMappingField,
};
pub use commands::{CascadeEffect, IdpConfigSource, idp_config_removal_effects};
pub use iam::{IAM_ACCESS_EVENTS, IAM_AGGREGATE, Iam, iam_by_id_query};
pub use repository::IamEventstore;
