//! Removal of IDP configs and login-policy providers together with the
//! external identities users linked through them.

use tracing::info;

use warden_core::{Context, DomainResult};
use warden_events::Aggregate;
use warden_iam::{Iam, IamEventstore};
use warden_org::{Org, OrgEventstore};
use warden_user::UserEventstore;

/// Unlinks the affected users in the same push as the removal itself, so
/// either both happen or neither does.
#[derive(Clone)]
pub struct IdpRemovals {
    iam: IamEventstore,
    orgs: OrgEventstore,
    users: UserEventstore,
}

impl IdpRemovals {
    pub fn new(iam: IamEventstore, orgs: OrgEventstore, users: UserEventstore) -> Self {
        Self { iam, orgs, users }
    }

    pub fn remove_iam_idp_config(
        &self,
        ctx: &Context,
        iam_id: &str,
        idp_config_id: &str,
    ) -> DomainResult<Iam> {
        let unlinks = self.unlink_users(ctx, idp_config_id, None)?;
        let count = unlinks.len();
        let iam = self
            .iam
            .remove_idp_config_with(ctx, iam_id, idp_config_id, unlinks)?;
        info!(iam_id, idp_config_id, unlinked = count, "iam idp config removed");
        Ok(iam)
    }

    pub fn remove_org_idp_config(
        &self,
        ctx: &Context,
        org_id: &str,
        idp_config_id: &str,
    ) -> DomainResult<Org> {
        let unlinks = self.unlink_users(ctx, idp_config_id, None)?;
        let count = unlinks.len();
        let org = self
            .orgs
            .remove_idp_config_with(ctx, org_id, idp_config_id, unlinks)?;
        info!(org_id, idp_config_id, unlinked = count, "org idp config removed");
        Ok(org)
    }

    /// Only the org's own users lose their link; the config itself may
    /// still be offered elsewhere.
    pub fn remove_org_idp_provider(
        &self,
        ctx: &Context,
        org_id: &str,
        idp_config_id: &str,
    ) -> DomainResult<Org> {
        let unlinks = self.unlink_users(ctx, idp_config_id, Some(org_id))?;
        let count = unlinks.len();
        let org = self.orgs.remove_idp_provider_from_login_policy_with(
            ctx,
            org_id,
            idp_config_id,
            unlinks,
        )?;
        info!(org_id, idp_config_id, unlinked = count, "org idp provider removed");
        Ok(org)
    }

    fn unlink_users(
        &self,
        ctx: &Context,
        idp_config_id: &str,
        resource_owner: Option<&str>,
    ) -> DomainResult<Vec<Aggregate>> {
        self.users
            .external_idps_by_idp_config(ctx, idp_config_id)?
            .into_iter()
            .filter(|linked| resource_owner.is_none_or(|owner| linked.resource_owner == owner))
            .map(|linked| {
                self.users
                    .prepare_remove_external_idp(ctx, &linked.user_id, &linked.link, true)
            })
            .collect()
    }
}
