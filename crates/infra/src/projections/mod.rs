//! Views fed by the spooler.
//!
//! Each view folds events into rows of a [`ViewStore`](crate::read_model::ViewStore).
//! Rows carry the sequence of the last event applied to them.

pub mod iam_members;
pub mod idp_configs;
pub mod users;

pub use iam_members::{IAM_MEMBERS_VIEW, IamMemberView, IamMembersView};
pub use idp_configs::{IDP_CONFIGS_VIEW, IdpConfigView, IdpConfigsView};
pub use users::{USERS_VIEW, UserType, UserView, UsersView};
