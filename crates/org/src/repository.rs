use std::sync::Arc;

use tracing::{debug, info};

use warden_core::{Context, DomainError, DomainResult, IdGenerator, require_changes};
use warden_events::{
    Aggregate, AggregateOption, Changes, Event, EventSourced, Eventstore, UniqueConstraint,
    changes_from_events, changes_query,
};
use warden_iam::commands::{self, IdpConfigSource};
use warden_iam::{
    IAM_ACCESS_EVENTS, IdpConfig, IdpProvider, IdpProviderType, LoginPolicy, Member,
    OidcIdpConfig,
};

use crate::config::OrgConfig;
use crate::org::{
    DomainPayload, ORG_ACCESS_EVENTS, ORG_ADDED, ORG_AGGREGATE, ORG_CHANGED, ORG_DEACTIVATED,
    ORG_DOMAIN_ADDED, ORG_DOMAIN_PRIMARY_SET, ORG_DOMAIN_REMOVED, ORG_DOMAIN_VERIFIED,
    ORG_REACTIVATED, ORG_VERSION, Org, OrgFields, OrgState, UNIQUE_ORG_DOMAIN, org_by_id_query,
};

/// Commands and reads on org aggregates.
#[derive(Clone)]
pub struct OrgEventstore {
    eventstore: Eventstore,
    id_generator: Arc<dyn IdGenerator>,
    config: OrgConfig,
}

fn domain_claim(domain: &str) -> UniqueConstraint {
    UniqueConstraint::add(
        UNIQUE_ORG_DOMAIN,
        domain,
        format!("domain {domain} is already claimed"),
    )
}

impl OrgEventstore {
    pub fn new(eventstore: Eventstore, id_generator: Arc<dyn IdGenerator>, config: OrgConfig) -> Self {
        Self {
            eventstore,
            id_generator,
            config,
        }
    }

    pub fn org_by_id(&self, ctx: &Context, id: &str) -> DomainResult<Org> {
        if id.is_empty() {
            return Err(DomainError::precondition_failed("org id missing"));
        }
        let mut org = Org::new(id);
        let found = self
            .eventstore
            .filter_and_fold(ctx, &org_by_id_query(id, 0), &mut org)?;
        if found == 0 {
            return Err(DomainError::not_found(format!("org {id} not found")));
        }
        Ok(org)
    }

    fn aggregate(&self, ctx: &Context, org: &Org) -> DomainResult<Aggregate> {
        self.eventstore.aggregate_creator().new_aggregate(
            ctx,
            &org.root.aggregate_id,
            ORG_AGGREGATE,
            ORG_VERSION,
            org.root.sequence,
            &[AggregateOption::OverwriteResourceOwner(
                org.root.aggregate_id.clone(),
            )],
        )
    }

    fn execute<F>(&self, ctx: &Context, org_id: &str, build: F) -> DomainResult<Org>
    where
        F: FnOnce(&mut Aggregate, &Org) -> DomainResult<()>,
    {
        self.execute_with(ctx, org_id, Vec::new(), build)
    }

    /// Pushes the org's aggregate together with `dependents`; only the org's
    /// own events are folded back.
    fn execute_with<F>(
        &self,
        ctx: &Context,
        org_id: &str,
        dependents: Vec<Aggregate>,
        build: F,
    ) -> DomainResult<Org>
    where
        F: FnOnce(&mut Aggregate, &Org) -> DomainResult<()>,
    {
        let mut org = self.org_by_id(ctx, org_id)?;
        let mut aggregate = self.aggregate(ctx, &org)?;
        build(&mut aggregate, &org)?;
        let mut aggregates = vec![aggregate];
        aggregates.extend(dependents);
        let events: Vec<Event> = self
            .eventstore
            .push_aggregates(ctx, aggregates)?
            .into_iter()
            .filter(|e| {
                e.aggregate_type.as_str() == ORG_AGGREGATE && e.aggregate_id == org.root.aggregate_id
            })
            .collect();
        org.append_events(&events)?;
        debug!(org_id, sequence = org.root.sequence, "org updated");
        Ok(org)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────────

    /// Creates an org with a verified primary domain derived from its name.
    pub fn create_org(&self, ctx: &Context, name: &str) -> DomainResult<Org> {
        if name.trim().is_empty() {
            return Err(DomainError::precondition_failed("org name missing"));
        }
        let domain = DomainPayload {
            domain: self.config.generated_domain(name)?,
        };
        let mut org = Org::new(self.id_generator.next_id()?);

        let mut aggregate = self.aggregate(ctx, &org)?;
        aggregate
            .append_event(
                ORG_ADDED,
                &OrgFields {
                    name: name.trim().to_string(),
                },
            )?
            .append_event(ORG_DOMAIN_ADDED, &domain)?
            .append_event(ORG_DOMAIN_VERIFIED, &domain)?
            .append_event(ORG_DOMAIN_PRIMARY_SET, &domain)?
            .add_unique_constraint(domain_claim(&domain.domain));

        let events = self.eventstore.push_aggregates(ctx, vec![aggregate])?;
        org.append_events(&events)?;
        info!(org_id = %org.root.aggregate_id, domain = %domain.domain, "org created");
        Ok(org)
    }

    pub fn change_org(&self, ctx: &Context, org_id: &str, name: &str) -> DomainResult<Org> {
        if name.trim().is_empty() {
            return Err(DomainError::precondition_failed("org name missing"));
        }
        self.execute(ctx, org_id, |agg, org| {
            let changes = require_changes(
                &OrgFields {
                    name: org.name.clone(),
                },
                &OrgFields {
                    name: name.trim().to_string(),
                },
            )?;
            agg.append_event(ORG_CHANGED, &changes)?;
            Ok(())
        })
    }

    pub fn deactivate_org(&self, ctx: &Context, org_id: &str) -> DomainResult<Org> {
        self.execute(ctx, org_id, |agg, org| {
            if org.state == OrgState::Inactive {
                return Err(DomainError::precondition_failed("org already inactive"));
            }
            agg.append_empty_event(ORG_DEACTIVATED)?;
            Ok(())
        })
    }

    pub fn reactivate_org(&self, ctx: &Context, org_id: &str) -> DomainResult<Org> {
        self.execute(ctx, org_id, |agg, org| {
            if org.state != OrgState::Inactive {
                return Err(DomainError::precondition_failed("org not inactive"));
            }
            agg.append_empty_event(ORG_REACTIVATED)?;
            Ok(())
        })
    }

    pub fn org_changes(
        &self,
        ctx: &Context,
        org_id: &str,
        last_sequence: u64,
        limit: u64,
        sort_ascending: bool,
    ) -> DomainResult<Changes> {
        let query = changes_query(ORG_AGGREGATE, org_id, last_sequence, limit, sort_ascending);
        let events = self.eventstore.filter_events(ctx, &query)?;
        changes_from_events(&events, last_sequence, limit, sort_ascending)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Domains
    // ─────────────────────────────────────────────────────────────────────────

    pub fn add_org_domain(&self, ctx: &Context, org_id: &str, domain: &str) -> DomainResult<Org> {
        if domain.is_empty() {
            return Err(DomainError::precondition_failed("domain missing"));
        }
        self.execute(ctx, org_id, |agg, org| {
            if org.domain(domain).is_some() {
                return Err(DomainError::already_exists(format!(
                    "domain {domain} already added"
                )));
            }
            agg.append_event(
                ORG_DOMAIN_ADDED,
                &DomainPayload {
                    domain: domain.to_string(),
                },
            )?;
            Ok(())
        })
    }

    /// Marks a domain verified once the caller proved ownership.
    ///
    /// A domain can only be verified by one org; the claim is enforced by the store.
    pub fn verify_org_domain(&self, ctx: &Context, org_id: &str, domain: &str) -> DomainResult<Org> {
        if domain.is_empty() {
            return Err(DomainError::precondition_failed("domain missing"));
        }
        self.execute(ctx, org_id, |agg, org| {
            let Some(existing) = org.domain(domain) else {
                return Err(DomainError::precondition_failed(format!(
                    "domain {domain} not existing on org"
                )));
            };
            if existing.verified {
                return Err(DomainError::precondition_failed("domain already verified"));
            }
            agg.append_event(
                ORG_DOMAIN_VERIFIED,
                &DomainPayload {
                    domain: domain.to_string(),
                },
            )?
            .add_unique_constraint(domain_claim(domain));
            Ok(())
        })
    }

    pub fn set_primary_org_domain(
        &self,
        ctx: &Context,
        org_id: &str,
        domain: &str,
    ) -> DomainResult<Org> {
        if domain.is_empty() {
            return Err(DomainError::precondition_failed("domain missing"));
        }
        self.execute(ctx, org_id, |agg, org| {
            let Some(existing) = org.domain(domain) else {
                return Err(DomainError::precondition_failed(format!(
                    "domain {domain} not existing on org"
                )));
            };
            if !existing.verified {
                return Err(DomainError::precondition_failed("domain not verified"));
            }
            if existing.primary {
                return Err(DomainError::precondition_failed("domain already primary"));
            }
            agg.append_event(
                ORG_DOMAIN_PRIMARY_SET,
                &DomainPayload {
                    domain: domain.to_string(),
                },
            )?;
            Ok(())
        })
    }

    /// Removes a non-primary domain and releases its claim.
    pub fn remove_org_domain(&self, ctx: &Context, org_id: &str, domain: &str) -> DomainResult<Org> {
        if domain.is_empty() {
            return Err(DomainError::precondition_failed("domain missing"));
        }
        self.execute(ctx, org_id, |agg, org| {
            let Some(existing) = org.domain(domain) else {
                return Err(DomainError::precondition_failed(format!(
                    "domain {domain} not existing on org"
                )));
            };
            if existing.primary {
                return Err(DomainError::precondition_failed(
                    "primary domain cannot be removed",
                ));
            }
            agg.append_event(
                ORG_DOMAIN_REMOVED,
                &DomainPayload {
                    domain: domain.to_string(),
                },
            )?;
            if existing.verified {
                agg.add_unique_constraint(UniqueConstraint::remove(UNIQUE_ORG_DOMAIN, domain));
            }
            Ok(())
        })
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Members
    // ─────────────────────────────────────────────────────────────────────────

    pub fn org_member_by_id(
        &self,
        ctx: &Context,
        org_id: &str,
        user_id: &str,
    ) -> DomainResult<Member> {
        if user_id.is_empty() {
            return Err(DomainError::precondition_failed("user id missing"));
        }
        let org = self.org_by_id(ctx, org_id)?;
        org.access
            .member(user_id)
            .cloned()
            .ok_or_else(|| DomainError::not_found(format!("user {user_id} is not a member")))
    }

    pub fn add_org_member(&self, ctx: &Context, org_id: &str, member: &Member) -> DomainResult<Org> {
        self.execute(ctx, org_id, |agg, org| {
            commands::add_member(agg, &ORG_ACCESS_EVENTS, &org.access, member)
        })
    }

    pub fn change_org_member(
        &self,
        ctx: &Context,
        org_id: &str,
        member: &Member,
    ) -> DomainResult<Org> {
        self.execute(ctx, org_id, |agg, org| {
            commands::change_member(agg, &ORG_ACCESS_EVENTS, &org.access, member)
        })
    }

    pub fn remove_org_member(&self, ctx: &Context, org_id: &str, user_id: &str) -> DomainResult<Org> {
        self.execute(ctx, org_id, |agg, org| {
            commands::remove_member(agg, &ORG_ACCESS_EVENTS, &org.access, user_id)
        })
    }

    // ─────────────────────────────────────────────────────────────────────────
    // IDP configurations
    // ─────────────────────────────────────────────────────────────────────────

    pub fn add_idp_config(
        &self,
        ctx: &Context,
        org_id: &str,
        config: IdpConfig,
    ) -> DomainResult<IdpConfig> {
        let mut config = config;
        config.idp_config_id = self.id_generator.next_id()?;
        let org = self.execute(ctx, org_id, |agg, _| {
            commands::add_idp_config(agg, &ORG_ACCESS_EVENTS, &config)
        })?;
        org_idp_config(&org, &config.idp_config_id)
    }

    pub fn change_idp_config(
        &self,
        ctx: &Context,
        org_id: &str,
        config: &IdpConfig,
    ) -> DomainResult<IdpConfig> {
        let org = self.execute(ctx, org_id, |agg, org| {
            commands::change_idp_config(agg, &ORG_ACCESS_EVENTS, &org.access, config)
        })?;
        org_idp_config(&org, &config.idp_config_id)
    }

    pub fn remove_idp_config(
        &self,
        ctx: &Context,
        org_id: &str,
        idp_config_id: &str,
    ) -> DomainResult<Org> {
        self.remove_idp_config_with(ctx, org_id, idp_config_id, Vec::new())
    }

    /// Removes the config and commits `dependents` in the same push.
    pub fn remove_idp_config_with(
        &self,
        ctx: &Context,
        org_id: &str,
        idp_config_id: &str,
        dependents: Vec<Aggregate>,
    ) -> DomainResult<Org> {
        self.execute_with(ctx, org_id, dependents, |agg, org| {
            commands::remove_idp_config(agg, &ORG_ACCESS_EVENTS, &org.access, idp_config_id)
                .map(|_| ())
        })
    }

    pub fn deactivate_idp_config(
        &self,
        ctx: &Context,
        org_id: &str,
        idp_config_id: &str,
    ) -> DomainResult<IdpConfig> {
        let org = self.execute(ctx, org_id, |agg, org| {
            commands::deactivate_idp_config(agg, &ORG_ACCESS_EVENTS, &org.access, idp_config_id)
        })?;
        org_idp_config(&org, idp_config_id)
    }

    pub fn reactivate_idp_config(
        &self,
        ctx: &Context,
        org_id: &str,
        idp_config_id: &str,
    ) -> DomainResult<IdpConfig> {
        let org = self.execute(ctx, org_id, |agg, org| {
            commands::reactivate_idp_config(agg, &ORG_ACCESS_EVENTS, &org.access, idp_config_id)
        })?;
        org_idp_config(&org, idp_config_id)
    }

    pub fn change_oidc_idp_config(
        &self,
        ctx: &Context,
        org_id: &str,
        oidc: &OidcIdpConfig,
    ) -> DomainResult<OidcIdpConfig> {
        let org = self.execute(ctx, org_id, |agg, org| {
            commands::change_oidc_config(agg, &ORG_ACCESS_EVENTS, &org.access, oidc)
        })?;
        org_idp_config(&org, &oidc.idp_config_id)?
            .oidc_config
            .ok_or_else(|| DomainError::internal("oidc config missing after change"))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Login policy
    // ─────────────────────────────────────────────────────────────────────────

    pub fn add_login_policy(
        &self,
        ctx: &Context,
        org_id: &str,
        policy: &LoginPolicy,
    ) -> DomainResult<Org> {
        self.execute(ctx, org_id, |agg, org| {
            commands::add_login_policy(agg, &ORG_ACCESS_EVENTS, &org.access, policy)
        })
    }

    pub fn change_login_policy(
        &self,
        ctx: &Context,
        org_id: &str,
        policy: &LoginPolicy,
    ) -> DomainResult<Org> {
        self.execute(ctx, org_id, |agg, org| {
            commands::change_login_policy(agg, &ORG_ACCESS_EVENTS, &org.access, policy)
        })
    }

    /// Drops the org's own policy; the IAM default applies again.
    pub fn remove_login_policy(&self, ctx: &Context, org_id: &str) -> DomainResult<Org> {
        self.execute(ctx, org_id, |agg, org| {
            commands::remove_login_policy(agg, &ORG_ACCESS_EVENTS, &org.access)
        })
    }

    /// Attaches an IDP config to the org's login policy.
    ///
    /// `System` providers point at IAM configs, `Org` providers at the org's own.
    pub fn add_idp_provider_to_login_policy(
        &self,
        ctx: &Context,
        org_id: &str,
        provider: &IdpProvider,
    ) -> DomainResult<Org> {
        self.execute(ctx, org_id, |agg, org| {
            let source = match provider.provider_type {
                IdpProviderType::System => IdpConfigSource {
                    events: &IAM_ACCESS_EVENTS,
                    aggregate_id: &self.config.iam_id,
                },
                IdpProviderType::Org => IdpConfigSource {
                    events: &ORG_ACCESS_EVENTS,
                    aggregate_id: &org.root.aggregate_id,
                },
            };
            commands::add_idp_provider(agg, &ORG_ACCESS_EVENTS, &org.access, provider, source)
        })
    }

    pub fn remove_idp_provider_from_login_policy(
        &self,
        ctx: &Context,
        org_id: &str,
        idp_config_id: &str,
    ) -> DomainResult<Org> {
        self.remove_idp_provider_from_login_policy_with(ctx, org_id, idp_config_id, Vec::new())
    }

    pub fn remove_idp_provider_from_login_policy_with(
        &self,
        ctx: &Context,
        org_id: &str,
        idp_config_id: &str,
        dependents: Vec<Aggregate>,
    ) -> DomainResult<Org> {
        self.execute_with(ctx, org_id, dependents, |agg, org| {
            commands::remove_idp_provider(agg, &ORG_ACCESS_EVENTS, &org.access, idp_config_id)
        })
    }
}

fn org_idp_config(org: &Org, idp_config_id: &str) -> DomainResult<IdpConfig> {
    org.access
        .idp_config(idp_config_id)
        .cloned()
        .ok_or_else(|| DomainError::internal("idp config missing after push"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_core::{NO_CHANGES, SequentialIdGenerator};
    use warden_iam::{IamEventstore, IdpConfigState};

    const IAM_ID: &str = "iam";

    fn ctx() -> Context {
        Context::new("admin-1", "management-api", "")
    }

    fn repos() -> (OrgEventstore, IamEventstore) {
        let store = Eventstore::in_memory("management-api");
        let orgs = OrgEventstore::new(
            store.clone(),
            Arc::new(SequentialIdGenerator::new("org")),
            OrgConfig::default(),
        );
        let iam = IamEventstore::new(store, Arc::new(SequentialIdGenerator::new("sys-idp")));
        (orgs, iam)
    }

    fn repo() -> OrgEventstore {
        repos().0
    }

    #[test]
    fn created_org_owns_itself_and_its_generated_domain() {
        let repo = repo();
        let org = repo.create_org(&ctx(), "ACME Corp").unwrap();

        assert_eq!(org.root.aggregate_id, "org-1");
        assert_eq!(org.root.resource_owner, "org-1");
        assert_eq!(org.name, "ACME Corp");
        assert_eq!(org.state, OrgState::Active);
        let primary = org.primary_domain().unwrap();
        assert_eq!(primary.domain, "acme-corp.warden.localhost");
        assert!(primary.verified);
        assert_eq!(org.root.sequence, 4);

        let loaded = repo.org_by_id(&ctx(), "org-1").unwrap();
        assert_eq!(loaded, org);
    }

    #[test]
    fn org_names_without_a_domain_slug_are_rejected() {
        let repo = repo();
        let err = repo.create_org(&ctx(), "!!!").unwrap_err();
        assert!(err.is_precondition_failed());
        // no id was spent on the rejected org
        let org = repo.create_org(&ctx(), "caos").unwrap();
        assert_eq!(org.root.aggregate_id, "org-1");
    }

    #[test]
    fn org_names_with_the_same_slug_collide_on_the_domain() {
        let repo = repo();
        repo.create_org(&ctx(), "ACME Corp").unwrap();
        let err = repo.create_org(&ctx(), "acme corp").unwrap_err();
        assert!(err.is_already_exists());
        assert!(repo.org_by_id(&ctx(), "org-2").unwrap_err().is_not_found());
    }

    #[test]
    fn org_input_is_validated() {
        let repo = repo();
        assert!(repo.create_org(&ctx(), "  ").unwrap_err().is_precondition_failed());
        assert!(repo.org_by_id(&ctx(), "").unwrap_err().is_precondition_failed());
        assert!(repo.org_by_id(&ctx(), "nope").unwrap_err().is_not_found());
    }

    #[test]
    fn renaming_to_the_same_name_has_no_changes() {
        let repo = repo();
        repo.create_org(&ctx(), "caos").unwrap();
        let err = repo.change_org(&ctx(), "org-1", "caos").unwrap_err();
        assert_eq!(err, DomainError::precondition_failed(NO_CHANGES));

        let org = repo.change_org(&ctx(), "org-1", "caos ag").unwrap();
        assert_eq!(org.name, "caos ag");
    }

    #[test]
    fn deactivation_cycle() {
        let repo = repo();
        repo.create_org(&ctx(), "caos").unwrap();
        assert!(repo.reactivate_org(&ctx(), "org-1").unwrap_err().is_precondition_failed());

        let org = repo.deactivate_org(&ctx(), "org-1").unwrap();
        assert_eq!(org.state, OrgState::Inactive);
        assert!(repo.deactivate_org(&ctx(), "org-1").unwrap_err().is_precondition_failed());

        let org = repo.reactivate_org(&ctx(), "org-1").unwrap();
        assert_eq!(org.state, OrgState::Active);
    }

    #[test]
    fn domain_lifecycle() {
        let repo = repo();
        repo.create_org(&ctx(), "caos").unwrap();

        let org = repo.add_org_domain(&ctx(), "org-1", "caos.ch").unwrap();
        assert!(!org.domain("caos.ch").unwrap().verified);
        assert!(
            repo.add_org_domain(&ctx(), "org-1", "caos.ch")
                .unwrap_err()
                .is_already_exists()
        );
        assert!(
            repo.set_primary_org_domain(&ctx(), "org-1", "caos.ch")
                .unwrap_err()
                .is_precondition_failed()
        );

        repo.verify_org_domain(&ctx(), "org-1", "caos.ch").unwrap();
        assert!(
            repo.verify_org_domain(&ctx(), "org-1", "caos.ch")
                .unwrap_err()
                .is_precondition_failed()
        );
        let org = repo.set_primary_org_domain(&ctx(), "org-1", "caos.ch").unwrap();
        assert_eq!(org.primary_domain().unwrap().domain, "caos.ch");
        assert!(!org.domain("caos.warden.localhost").unwrap().primary);

        assert!(
            repo.remove_org_domain(&ctx(), "org-1", "caos.ch")
                .unwrap_err()
                .is_precondition_failed()
        );
        let org = repo
            .remove_org_domain(&ctx(), "org-1", "caos.warden.localhost")
            .unwrap();
        assert_eq!(org.domains.len(), 1);
    }

    #[test]
    fn a_verified_domain_is_claimed_until_removed() {
        let repo = repo();
        repo.create_org(&ctx(), "first").unwrap();
        repo.create_org(&ctx(), "second").unwrap();
        for org_id in ["org-1", "org-2"] {
            repo.add_org_domain(&ctx(), org_id, "shared.ch").unwrap();
        }
        repo.verify_org_domain(&ctx(), "org-1", "shared.ch").unwrap();

        let err = repo.verify_org_domain(&ctx(), "org-2", "shared.ch").unwrap_err();
        assert!(err.is_already_exists());

        repo.remove_org_domain(&ctx(), "org-1", "shared.ch").unwrap();
        let org = repo.verify_org_domain(&ctx(), "org-2", "shared.ch").unwrap();
        assert!(org.domain("shared.ch").unwrap().verified);
    }

    #[test]
    fn members_are_scoped_to_the_org() {
        let repo = repo();
        repo.create_org(&ctx(), "caos").unwrap();
        repo.add_org_member(&ctx(), "org-1", &Member::new("U1", ["ORG_OWNER"]))
            .unwrap();

        let member = repo.org_member_by_id(&ctx(), "org-1", "U1").unwrap();
        assert_eq!(member.roles, vec!["ORG_OWNER".to_string()]);
        assert!(repo.org_member_by_id(&ctx(), "org-1", "U2").unwrap_err().is_not_found());

        repo.change_org_member(&ctx(), "org-1", &Member::new("U1", ["ORG_VIEWER"]))
            .unwrap();
        let org = repo.remove_org_member(&ctx(), "org-1", "U1").unwrap();
        assert!(org.access.member("U1").is_none());
    }

    #[test]
    fn org_idp_config_lifecycle() {
        let repo = repo();
        repo.create_org(&ctx(), "caos").unwrap();
        let config = repo
            .add_idp_config(&ctx(), "org-1", IdpConfig::new("Azure"))
            .unwrap();
        assert_eq!(config.idp_config_id, "org-2");

        let config = repo
            .deactivate_idp_config(&ctx(), "org-1", &config.idp_config_id)
            .unwrap();
        assert_eq!(config.state, IdpConfigState::Inactive);

        let mut renamed = config.clone();
        renamed.name = "Entra".into();
        let changed = repo.change_idp_config(&ctx(), "org-1", &renamed).unwrap();
        assert_eq!(changed.name, "Entra");

        let org = repo
            .remove_idp_config(&ctx(), "org-1", &config.idp_config_id)
            .unwrap();
        assert!(org.access.idp_configs.is_empty());
    }

    #[test]
    fn org_login_policy_takes_org_and_system_providers() {
        let (orgs, iam) = repos();
        let iam_ctx = Context::new("admin-1", "admin-api", IAM_ID);
        iam.start_setup(&iam_ctx, IAM_ID).unwrap();
        let system = iam
            .add_idp_config(&iam_ctx, IAM_ID, IdpConfig::new("Google"))
            .unwrap();

        orgs.create_org(&ctx(), "caos").unwrap();
        let own = orgs
            .add_idp_config(&ctx(), "org-1", IdpConfig::new("Azure"))
            .unwrap();
        orgs.add_login_policy(&ctx(), "org-1", &LoginPolicy::new(true, false, true))
            .unwrap();

        orgs.add_idp_provider_to_login_policy(
            &ctx(),
            "org-1",
            &IdpProvider::new(&system.idp_config_id, IdpProviderType::System),
        )
        .unwrap();
        let org = orgs
            .add_idp_provider_to_login_policy(
                &ctx(),
                "org-1",
                &IdpProvider::new(&own.idp_config_id, IdpProviderType::Org),
            )
            .unwrap();
        assert_eq!(org.access.login_policy.as_ref().unwrap().idp_providers.len(), 2);

        // unknown system configs fail at commit
        let err = orgs
            .add_idp_provider_to_login_policy(
                &ctx(),
                "org-1",
                &IdpProvider::new("missing", IdpProviderType::System),
            )
            .unwrap_err();
        assert!(err.is_precondition_failed());

        let org = orgs
            .remove_idp_config(&ctx(), "org-1", &own.idp_config_id)
            .unwrap();
        let providers = &org.access.login_policy.as_ref().unwrap().idp_providers;
        assert_eq!(providers.len(), 1);
        assert_eq!(providers[0].idp_config_id, system.idp_config_id);

        let org = orgs.remove_login_policy(&ctx(), "org-1").unwrap();
        assert!(org.access.login_policy.is_none());
    }

    #[test]
    fn org_changes_page_through_history() {
        let repo = repo();
        repo.create_org(&ctx(), "caos").unwrap();
        repo.change_org(&ctx(), "org-1", "caos ag").unwrap();

        let all = repo.org_changes(&ctx(), "org-1", 0, 0, true).unwrap();
        assert_eq!(all.changes.len(), 5);
        assert_eq!(all.last_sequence, 5);

        let newest = repo.org_changes(&ctx(), "org-1", 0, 2, false).unwrap();
        let sequences: Vec<u64> = newest.changes.iter().map(|c| c.sequence).collect();
        assert_eq!(sequences, vec![5, 4]);

        let older = repo.org_changes(&ctx(), "org-1", 4, 2, false).unwrap();
        let sequences: Vec<u64> = older.changes.iter().map(|c| c.sequence).collect();
        assert_eq!(sequences, vec![3, 2]);

        assert!(
            repo.org_changes(&ctx(), "org-1", 5, 0, true)
                .unwrap_err()
                .is_not_found()
        );
    }
}
