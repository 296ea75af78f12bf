use std::sync::Arc;

use tracing::debug;

use warden_core::{Context, DomainError, DomainResult, IdGenerator};
use warden_events::{Aggregate, Event, EventSourced, Eventstore};

use crate::access_control::{IdpConfig, IdpProvider, LoginPolicy, Member, OidcIdpConfig};
use crate::commands::{self, IdpConfigSource};
use crate::iam::{
    GLOBAL_ORG_SET, IAM_ACCESS_EVENTS, IAM_AGGREGATE, IAM_PROJECT_SET, IAM_VERSION, Iam,
    IamProjectSet, GlobalOrgSet, SETUP_DONE, SETUP_STARTED, iam_by_id_query,
};

/// Commands and reads on the IAM aggregate.
///
/// Every command loads the IAM, checks the command against the folded state,
/// pushes the resulting events and returns the state after the push.
#[derive(Clone)]
pub struct IamEventstore {
    eventstore: Eventstore,
    id_generator: Arc<dyn IdGenerator>,
}

impl IamEventstore {
    pub fn new(eventstore: Eventstore, id_generator: Arc<dyn IdGenerator>) -> Self {
        Self {
            eventstore,
            id_generator,
        }
    }

    pub fn iam_by_id(&self, ctx: &Context, id: &str) -> DomainResult<Iam> {
        if id.is_empty() {
            return Err(DomainError::precondition_failed("iam id missing"));
        }
        let mut iam = Iam::new(id);
        let found = self
            .eventstore
            .filter_and_fold(ctx, &iam_by_id_query(id, 0), &mut iam)?;
        if found == 0 {
            return Err(DomainError::not_found(format!("iam {id} not found")));
        }
        Ok(iam)
    }

    fn aggregate(&self, ctx: &Context, iam: &Iam) -> DomainResult<Aggregate> {
        self.eventstore.aggregate_creator().new_aggregate(
            ctx,
            &iam.root.aggregate_id,
            IAM_AGGREGATE,
            IAM_VERSION,
            iam.root.sequence,
            &[],
        )
    }

    /// Pushes the IAM's aggregate together with `dependents` and folds back
    /// only the IAM's own events.
    fn push(
        &self,
        ctx: &Context,
        mut iam: Iam,
        aggregate: Aggregate,
        dependents: Vec<Aggregate>,
    ) -> DomainResult<Iam> {
        let mut aggregates = vec![aggregate];
        aggregates.extend(dependents);
        let events: Vec<Event> = self
            .eventstore
            .push_aggregates(ctx, aggregates)?
            .into_iter()
            .filter(|e| {
                e.aggregate_type.as_str() == IAM_AGGREGATE
                    && e.aggregate_id == iam.root.aggregate_id
            })
            .collect();
        iam.append_events(&events)?;
        debug!(iam_id = %iam.root.aggregate_id, sequence = iam.root.sequence, "iam updated");
        Ok(iam)
    }

    /// Loads the IAM and lets `build` append events to a fresh aggregate.
    fn execute<F>(&self, ctx: &Context, iam_id: &str, build: F) -> DomainResult<Iam>
    where
        F: FnOnce(&mut Aggregate, &Iam) -> DomainResult<()>,
    {
        self.execute_with(ctx, iam_id, Vec::new(), build)
    }

    fn execute_with<F>(
        &self,
        ctx: &Context,
        iam_id: &str,
        dependents: Vec<Aggregate>,
        build: F,
    ) -> DomainResult<Iam>
    where
        F: FnOnce(&mut Aggregate, &Iam) -> DomainResult<()>,
    {
        let iam = self.iam_by_id(ctx, iam_id)?;
        let mut aggregate = self.aggregate(ctx, &iam)?;
        build(&mut aggregate, &iam)?;
        self.push(ctx, iam, aggregate, dependents)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Setup
    // ─────────────────────────────────────────────────────────────────────────

    /// Creates the IAM if needed and marks the setup as started.
    pub fn start_setup(&self, ctx: &Context, iam_id: &str) -> DomainResult<Iam> {
        let iam = match self.iam_by_id(ctx, iam_id) {
            Ok(iam) => iam,
            Err(err) if err.is_not_found() => Iam::new(iam_id),
            Err(err) => return Err(err),
        };
        if iam.setup_started {
            return Err(DomainError::precondition_failed("setup already started"));
        }
        let mut aggregate = self.aggregate(ctx, &iam)?;
        aggregate.append_empty_event(SETUP_STARTED)?;
        self.push(ctx, iam, aggregate, Vec::new())
    }

    pub fn setup_done(&self, ctx: &Context, iam_id: &str) -> DomainResult<Iam> {
        self.execute(ctx, iam_id, |agg, iam| {
            if !iam.setup_started {
                return Err(DomainError::precondition_failed("setup not started"));
            }
            if iam.setup_done {
                return Err(DomainError::precondition_failed("setup already done"));
            }
            agg.append_empty_event(SETUP_DONE)?;
            Ok(())
        })
    }

    pub fn set_global_org(&self, ctx: &Context, iam_id: &str, org_id: &str) -> DomainResult<Iam> {
        if org_id.is_empty() {
            return Err(DomainError::precondition_failed("global org id missing"));
        }
        self.execute(ctx, iam_id, |agg, _| {
            agg.append_event(
                GLOBAL_ORG_SET,
                &GlobalOrgSet {
                    global_org_id: org_id.to_string(),
                },
            )?;
            Ok(())
        })
    }

    pub fn set_iam_project(
        &self,
        ctx: &Context,
        iam_id: &str,
        project_id: &str,
    ) -> DomainResult<Iam> {
        if project_id.is_empty() {
            return Err(DomainError::precondition_failed("iam project id missing"));
        }
        self.execute(ctx, iam_id, |agg, _| {
            agg.append_event(
                IAM_PROJECT_SET,
                &IamProjectSet {
                    iam_project_id: project_id.to_string(),
                },
            )?;
            Ok(())
        })
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Members
    // ─────────────────────────────────────────────────────────────────────────

    pub fn add_iam_member(&self, ctx: &Context, iam_id: &str, member: &Member) -> DomainResult<Iam> {
        self.execute(ctx, iam_id, |agg, iam| {
            commands::add_member(agg, &IAM_ACCESS_EVENTS, &iam.access, member)
        })
    }

    pub fn change_iam_member(
        &self,
        ctx: &Context,
        iam_id: &str,
        member: &Member,
    ) -> DomainResult<Iam> {
        self.execute(ctx, iam_id, |agg, iam| {
            commands::change_member(agg, &IAM_ACCESS_EVENTS, &iam.access, member)
        })
    }

    pub fn remove_iam_member(&self, ctx: &Context, iam_id: &str, user_id: &str) -> DomainResult<Iam> {
        self.execute(ctx, iam_id, |agg, iam| {
            commands::remove_member(agg, &IAM_ACCESS_EVENTS, &iam.access, user_id)
        })
    }

    // ─────────────────────────────────────────────────────────────────────────
    // IDP configurations
    // ─────────────────────────────────────────────────────────────────────────

    pub fn idp_config_by_id(
        &self,
        ctx: &Context,
        iam_id: &str,
        idp_config_id: &str,
    ) -> DomainResult<IdpConfig> {
        let iam = self.iam_by_id(ctx, iam_id)?;
        iam.access
            .idp_config(idp_config_id)
            .cloned()
            .ok_or_else(|| DomainError::not_found(format!("idp config {idp_config_id} not found")))
    }

    /// Adds the config under a newly generated id and returns it.
    pub fn add_idp_config(
        &self,
        ctx: &Context,
        iam_id: &str,
        config: IdpConfig,
    ) -> DomainResult<IdpConfig> {
        let mut config = config;
        config.idp_config_id = self.id_generator.next_id()?;
        let iam = self.execute(ctx, iam_id, |agg, _| {
            commands::add_idp_config(agg, &IAM_ACCESS_EVENTS, &config)
        })?;
        added_idp_config(&iam, &config.idp_config_id)
    }

    pub fn change_idp_config(
        &self,
        ctx: &Context,
        iam_id: &str,
        config: &IdpConfig,
    ) -> DomainResult<IdpConfig> {
        let iam = self.execute(ctx, iam_id, |agg, iam| {
            commands::change_idp_config(agg, &IAM_ACCESS_EVENTS, &iam.access, config)
        })?;
        added_idp_config(&iam, &config.idp_config_id)
    }

    /// Removes the config; an attached login-policy provider is removed in the same push.
    pub fn remove_idp_config(
        &self,
        ctx: &Context,
        iam_id: &str,
        idp_config_id: &str,
    ) -> DomainResult<Iam> {
        self.remove_idp_config_with(ctx, iam_id, idp_config_id, Vec::new())
    }

    /// Like [`Self::remove_idp_config`], with `dependents` (typically users
    /// unlinking their external identities) committed in the same push.
    pub fn remove_idp_config_with(
        &self,
        ctx: &Context,
        iam_id: &str,
        idp_config_id: &str,
        dependents: Vec<Aggregate>,
    ) -> DomainResult<Iam> {
        self.execute_with(ctx, iam_id, dependents, |agg, iam| {
            let effects =
                commands::remove_idp_config(agg, &IAM_ACCESS_EVENTS, &iam.access, idp_config_id)?;
            debug!(idp_config_id, cascades = effects.len(), "removing idp config");
            Ok(())
        })
    }

    pub fn deactivate_idp_config(
        &self,
        ctx: &Context,
        iam_id: &str,
        idp_config_id: &str,
    ) -> DomainResult<IdpConfig> {
        let iam = self.execute(ctx, iam_id, |agg, iam| {
            commands::deactivate_idp_config(agg, &IAM_ACCESS_EVENTS, &iam.access, idp_config_id)
        })?;
        added_idp_config(&iam, idp_config_id)
    }

    pub fn reactivate_idp_config(
        &self,
        ctx: &Context,
        iam_id: &str,
        idp_config_id: &str,
    ) -> DomainResult<IdpConfig> {
        let iam = self.execute(ctx, iam_id, |agg, iam| {
            commands::reactivate_idp_config(agg, &IAM_ACCESS_EVENTS, &iam.access, idp_config_id)
        })?;
        added_idp_config(&iam, idp_config_id)
    }

    pub fn change_oidc_idp_config(
        &self,
        ctx: &Context,
        iam_id: &str,
        oidc: &OidcIdpConfig,
    ) -> DomainResult<OidcIdpConfig> {
        let iam = self.execute(ctx, iam_id, |agg, iam| {
            commands::change_oidc_config(agg, &IAM_ACCESS_EVENTS, &iam.access, oidc)
        })?;
        added_idp_config(&iam, &oidc.idp_config_id)?
            .oidc_config
            .ok_or_else(|| DomainError::internal("oidc config missing after change"))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Default login policy
    // ─────────────────────────────────────────────────────────────────────────

    pub fn add_login_policy(
        &self,
        ctx: &Context,
        iam_id: &str,
        policy: &LoginPolicy,
    ) -> DomainResult<LoginPolicy> {
        let iam = self.execute(ctx, iam_id, |agg, iam| {
            commands::add_login_policy(agg, &IAM_ACCESS_EVENTS, &iam.access, policy)
        })?;
        current_login_policy(iam)
    }

    pub fn change_login_policy(
        &self,
        ctx: &Context,
        iam_id: &str,
        policy: &LoginPolicy,
    ) -> DomainResult<LoginPolicy> {
        let iam = self.execute(ctx, iam_id, |agg, iam| {
            commands::change_login_policy(agg, &IAM_ACCESS_EVENTS, &iam.access, policy)
        })?;
        current_login_policy(iam)
    }

    pub fn add_idp_provider_to_login_policy(
        &self,
        ctx: &Context,
        iam_id: &str,
        provider: &IdpProvider,
    ) -> DomainResult<IdpProvider> {
        let iam = self.execute(ctx, iam_id, |agg, iam| {
            let source = IdpConfigSource {
                events: &IAM_ACCESS_EVENTS,
                aggregate_id: &iam.root.aggregate_id,
            };
            commands::add_idp_provider(agg, &IAM_ACCESS_EVENTS, &iam.access, provider, source)
        })?;
        iam.access
            .idp_provider(&provider.idp_config_id)
            .cloned()
            .ok_or_else(|| DomainError::internal("idp provider missing after push"))
    }

    pub fn remove_idp_provider_from_login_policy(
        &self,
        ctx: &Context,
        iam_id: &str,
        idp_config_id: &str,
    ) -> DomainResult<Iam> {
        self.execute(ctx, iam_id, |agg, iam| {
            commands::remove_idp_provider(agg, &IAM_ACCESS_EVENTS, &iam.access, idp_config_id)
        })
    }
}

fn added_idp_config(iam: &Iam, idp_config_id: &str) -> DomainResult<IdpConfig> {
    iam.access
        .idp_config(idp_config_id)
        .cloned()
        .ok_or_else(|| DomainError::internal("idp config missing after push"))
}

fn current_login_policy(iam: Iam) -> DomainResult<LoginPolicy> {
    iam.access
        .login_policy
        .ok_or_else(|| DomainError::internal("login policy missing after push"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access_control::{IdpConfigState, IdpProviderType};
    use crate::commands::{CascadeEffect, idp_config_removal_effects};
    use warden_core::{NO_CHANGES, SequentialIdGenerator};
    use warden_events::{EventRepository, InMemoryEventRepository, SearchQuery};

    const IAM_ID: &str = "iam";

    fn ctx() -> Context {
        Context::new("admin-1", "admin-api", IAM_ID)
    }

    fn repo_with(store: Eventstore) -> IamEventstore {
        IamEventstore::new(store, Arc::new(SequentialIdGenerator::new("idp")))
    }

    fn repo() -> IamEventstore {
        repo_with(Eventstore::in_memory("admin-api"))
    }

    fn started(repo: &IamEventstore) -> Iam {
        repo.start_setup(&ctx(), IAM_ID).unwrap()
    }

    fn with_login_policy_and_idp(repo: &IamEventstore) -> IdpConfig {
        started(repo);
        repo.add_login_policy(&ctx(), IAM_ID, &LoginPolicy::new(true, true, true))
            .unwrap();
        repo.add_idp_config(&ctx(), IAM_ID, IdpConfig::new("Google"))
            .unwrap()
    }

    fn count(store: &Eventstore) -> usize {
        store
            .filter_events(&ctx(), &SearchQuery::new().aggregate_type_filter([IAM_AGGREGATE]))
            .unwrap()
            .len()
    }

    #[test]
    fn iam_by_id_without_id_fails() {
        assert!(repo().iam_by_id(&ctx(), "").unwrap_err().is_precondition_failed());
    }

    #[test]
    fn iam_by_id_without_events_is_not_found() {
        assert!(repo().iam_by_id(&ctx(), IAM_ID).unwrap_err().is_not_found());
    }

    #[test]
    fn setup_cannot_start_twice() {
        let repo = repo();
        let iam = started(&repo);
        assert!(iam.setup_started);
        assert_eq!(iam.root.resource_owner, IAM_ID);

        let err = repo.start_setup(&ctx(), IAM_ID).unwrap_err();
        assert!(err.is_precondition_failed());
    }

    #[test]
    fn setup_done_on_missing_iam_is_not_found() {
        assert!(repo().setup_done(&ctx(), IAM_ID).unwrap_err().is_not_found());
    }

    #[test]
    fn setup_done_after_start() {
        let repo = repo();
        started(&repo);
        let iam = repo.setup_done(&ctx(), IAM_ID).unwrap();
        assert!(iam.setup_done);
        assert!(repo.setup_done(&ctx(), IAM_ID).unwrap_err().is_precondition_failed());
    }

    #[test]
    fn global_org_and_project_are_set() {
        let repo = repo();
        started(&repo);
        assert!(
            repo.set_global_org(&ctx(), IAM_ID, "")
                .unwrap_err()
                .is_precondition_failed()
        );
        repo.set_global_org(&ctx(), IAM_ID, "org-1").unwrap();
        let iam = repo.set_iam_project(&ctx(), IAM_ID, "project-1").unwrap();
        assert_eq!(iam.global_org_id, "org-1");
        assert_eq!(iam.iam_project_id, "project-1");
        assert!(
            repo.set_iam_project(&ctx(), "other", "project-1")
                .unwrap_err()
                .is_not_found()
        );
    }

    #[test]
    fn adding_a_member_advances_the_sequence_by_one() {
        let repo = repo();
        let before = started(&repo);
        let iam = repo
            .add_iam_member(&ctx(), IAM_ID, &Member::new("U1", ["R"]))
            .unwrap();

        assert_eq!(iam.root.sequence, before.root.sequence + 1);
        assert_eq!(iam.access.member("U1"), Some(&Member::new("U1", ["R"])));
    }

    #[test]
    fn re_adding_a_member_already_exists() {
        let repo = repo();
        started(&repo);
        repo.add_iam_member(&ctx(), IAM_ID, &Member::new("U1", ["R"])).unwrap();
        let store_len = count(&repo.eventstore);

        let err = repo
            .add_iam_member(&ctx(), IAM_ID, &Member::new("U1", ["R"]))
            .unwrap_err();
        assert!(err.is_already_exists());
        assert_eq!(count(&repo.eventstore), store_len);
    }

    #[test]
    fn member_input_is_validated() {
        let repo = repo();
        started(&repo);
        let no_user = Member::new("", ["R"]);
        let no_roles = Member::new("U1", Vec::<String>::new());
        assert!(repo.add_iam_member(&ctx(), IAM_ID, &no_user).unwrap_err().is_precondition_failed());
        assert!(repo.add_iam_member(&ctx(), IAM_ID, &no_roles).unwrap_err().is_precondition_failed());
        assert!(
            repo.add_iam_member(&ctx(), "missing", &Member::new("U1", ["R"]))
                .unwrap_err()
                .is_not_found()
        );
    }

    #[test]
    fn member_change_and_removal() {
        let repo = repo();
        started(&repo);
        repo.add_iam_member(&ctx(), IAM_ID, &Member::new("U1", ["R"])).unwrap();

        let err = repo
            .change_iam_member(&ctx(), IAM_ID, &Member::new("U1", ["R"]))
            .unwrap_err();
        assert_eq!(err, DomainError::precondition_failed(NO_CHANGES));

        let iam = repo
            .change_iam_member(&ctx(), IAM_ID, &Member::new("U1", ["R", "S"]))
            .unwrap();
        assert_eq!(iam.access.member("U1").unwrap().roles, vec!["R", "S"]);

        assert!(
            repo.change_iam_member(&ctx(), IAM_ID, &Member::new("U2", ["R"]))
                .unwrap_err()
                .is_not_found()
        );
        let iam = repo.remove_iam_member(&ctx(), IAM_ID, "U1").unwrap();
        assert!(iam.access.members.is_empty());
        assert!(repo.remove_iam_member(&ctx(), IAM_ID, "U1").unwrap_err().is_not_found());
    }

    #[test]
    fn idp_config_with_oidc_emits_two_events() {
        let repo = repo();
        started(&repo);
        let oidc = OidcIdpConfig {
            client_id: "client".into(),
            client_secret: "sealed".into(),
            issuer: "https://accounts.google.com".into(),
            scopes: vec!["openid".into()],
            ..OidcIdpConfig::default()
        };
        let before = count(&repo.eventstore);
        let config = repo
            .add_idp_config(&ctx(), IAM_ID, IdpConfig::new("Google").with_oidc(oidc))
            .unwrap();

        assert_eq!(config.idp_config_id, "idp-1");
        assert_eq!(config.oidc_config.as_ref().unwrap().idp_config_id, "idp-1");
        assert_eq!(count(&repo.eventstore), before + 2);
    }

    #[test]
    fn invalid_idp_config_is_rejected() {
        let repo = repo();
        started(&repo);
        let err = repo.add_idp_config(&ctx(), IAM_ID, IdpConfig::new("")).unwrap_err();
        assert!(err.is_precondition_failed());
    }

    #[test]
    fn idp_config_change_carries_only_the_delta() {
        let repo = repo();
        started(&repo);
        let config = repo.add_idp_config(&ctx(), IAM_ID, IdpConfig::new("Google")).unwrap();

        let unchanged = repo.change_idp_config(&ctx(), IAM_ID, &config).unwrap_err();
        assert!(unchanged.is_precondition_failed());

        let mut renamed = config.clone();
        renamed.name = "Google Workspace".into();
        let changed = repo.change_idp_config(&ctx(), IAM_ID, &renamed).unwrap();
        assert_eq!(changed.name, "Google Workspace");

        let last = repo
            .eventstore
            .filter_events(&ctx(), &iam_by_id_query(IAM_ID, 0).order_desc().set_limit(1))
            .unwrap();
        let payload = last[0].payload.as_ref().unwrap().as_object().unwrap();
        assert_eq!(payload.len(), 2);
        assert!(payload.contains_key("idpConfigId"));

        let mut missing = renamed;
        missing.idp_config_id = "unknown".into();
        assert!(
            repo.change_idp_config(&ctx(), IAM_ID, &missing)
                .unwrap_err()
                .is_precondition_failed()
        );
    }

    #[test]
    fn idp_config_deactivation_cycle() {
        let repo = repo();
        started(&repo);
        let config = repo.add_idp_config(&ctx(), IAM_ID, IdpConfig::new("Google")).unwrap();
        let id = config.idp_config_id.as_str();

        assert!(repo.reactivate_idp_config(&ctx(), IAM_ID, id).unwrap_err().is_precondition_failed());
        let inactive = repo.deactivate_idp_config(&ctx(), IAM_ID, id).unwrap();
        assert_eq!(inactive.state, IdpConfigState::Inactive);
        assert!(repo.deactivate_idp_config(&ctx(), IAM_ID, id).unwrap_err().is_precondition_failed());
        let active = repo.reactivate_idp_config(&ctx(), IAM_ID, id).unwrap();
        assert_eq!(active.state, IdpConfigState::Active);
        assert!(repo.deactivate_idp_config(&ctx(), IAM_ID, "").unwrap_err().is_precondition_failed());
    }

    #[test]
    fn oidc_change_keeps_the_secret_when_not_given() {
        let repo = repo();
        started(&repo);
        let oidc = OidcIdpConfig {
            client_id: "client".into(),
            client_secret: "sealed".into(),
            issuer: "https://issuer".into(),
            ..OidcIdpConfig::default()
        };
        let config = repo
            .add_idp_config(&ctx(), IAM_ID, IdpConfig::new("OIDC").with_oidc(oidc))
            .unwrap();
        let mut wanted = config.oidc_config.clone().unwrap();
        wanted.client_secret.clear();

        let err = repo.change_oidc_idp_config(&ctx(), IAM_ID, &wanted).unwrap_err();
        assert_eq!(err, DomainError::precondition_failed(NO_CHANGES));

        wanted.client_id = "client-2".into();
        let changed = repo.change_oidc_idp_config(&ctx(), IAM_ID, &wanted).unwrap();
        assert_eq!(changed.client_id, "client-2");
        assert_eq!(changed.client_secret, "sealed");
    }

    #[test]
    fn provider_for_unknown_idp_fails_at_commit() {
        let repo = repo();
        started(&repo);
        repo.add_login_policy(&ctx(), IAM_ID, &LoginPolicy::new(true, true, true))
            .unwrap();

        let err = repo
            .add_idp_provider_to_login_policy(
                &ctx(),
                IAM_ID,
                &IdpProvider::new("never-added", IdpProviderType::System),
            )
            .unwrap_err();
        assert!(err.is_precondition_failed());
        assert!(err.to_string().contains("not existing"));
    }

    #[test]
    fn adding_the_same_provider_twice_already_exists() {
        let repo = repo();
        let config = with_login_policy_and_idp(&repo);
        let provider = IdpProvider::new(&config.idp_config_id, IdpProviderType::System);

        let added = repo
            .add_idp_provider_to_login_policy(&ctx(), IAM_ID, &provider)
            .unwrap();
        assert_eq!(added, provider);
        let err = repo
            .add_idp_provider_to_login_policy(&ctx(), IAM_ID, &provider)
            .unwrap_err();
        assert!(err.is_already_exists());
    }

    #[test]
    fn removing_a_referenced_idp_config_cascades() {
        let repo = repo();
        let config = with_login_policy_and_idp(&repo);
        let id = config.idp_config_id.clone();
        repo.add_idp_provider_to_login_policy(
            &ctx(),
            IAM_ID,
            &IdpProvider::new(&id, IdpProviderType::System),
        )
        .unwrap();

        let loaded = repo.iam_by_id(&ctx(), IAM_ID).unwrap();
        assert_eq!(
            idp_config_removal_effects(&loaded.access, &id),
            vec![CascadeEffect::IdpProviderRemoved {
                idp_config_id: id.clone()
            }]
        );

        let before = count(&repo.eventstore);
        let iam = repo.remove_idp_config(&ctx(), IAM_ID, &id).unwrap();
        let events = repo
            .eventstore
            .filter_events(&ctx(), &iam_by_id_query(IAM_ID, loaded.root.sequence))
            .unwrap();

        assert_eq!(count(&repo.eventstore), before + 2);
        assert_eq!(events[0].event_type, IAM_ACCESS_EVENTS.idp_config_removed);
        assert_eq!(events[1].event_type, IAM_ACCESS_EVENTS.idp_provider_cascade_removed);
        assert!(iam.access.idp_config(&id).is_none());
        assert!(iam.access.idp_provider(&id).is_none());
    }

    #[test]
    fn removing_an_unreferenced_idp_config_emits_one_event() {
        let repo = repo();
        let config = with_login_policy_and_idp(&repo);
        let before = count(&repo.eventstore);
        repo.remove_idp_config(&ctx(), IAM_ID, &config.idp_config_id).unwrap();
        assert_eq!(count(&repo.eventstore), before + 1);
    }

    #[test]
    fn provider_removal_requires_the_provider() {
        let repo = repo();
        let config = with_login_policy_and_idp(&repo);
        let err = repo
            .remove_idp_provider_from_login_policy(&ctx(), IAM_ID, &config.idp_config_id)
            .unwrap_err();
        assert!(err.is_precondition_failed());
    }

    #[test]
    fn login_policy_lifecycle() {
        let repo = repo();
        started(&repo);
        let policy = LoginPolicy::new(true, false, false);
        assert!(
            repo.change_login_policy(&ctx(), IAM_ID, &policy)
                .unwrap_err()
                .is_precondition_failed()
        );
        repo.add_login_policy(&ctx(), IAM_ID, &policy).unwrap();
        assert!(repo.add_login_policy(&ctx(), IAM_ID, &policy).unwrap_err().is_already_exists());

        let err = repo.change_login_policy(&ctx(), IAM_ID, &policy).unwrap_err();
        assert_eq!(err, DomainError::precondition_failed(NO_CHANGES));

        let changed = repo
            .change_login_policy(&ctx(), IAM_ID, &LoginPolicy::new(true, true, false))
            .unwrap();
        assert!(changed.allow_register);
    }

    #[test]
    fn login_policy_precondition_catches_a_racing_add() {
        let store = Eventstore::in_memory("admin-api");
        let repo = repo_with(store.clone());
        let iam = started(&repo);

        // Two commands loaded the same state; the first one wins.
        let mut first = repo.aggregate(&ctx(), &iam).unwrap();
        commands::add_login_policy(
            &mut first,
            &IAM_ACCESS_EVENTS,
            &iam.access,
            &LoginPolicy::new(true, true, true),
        )
        .unwrap();
        let mut second = repo.aggregate(&ctx(), &iam).unwrap();
        commands::add_login_policy(
            &mut second,
            &IAM_ACCESS_EVENTS,
            &iam.access,
            &LoginPolicy::new(false, false, false),
        )
        .unwrap();

        store.push_aggregates(&ctx(), vec![first]).unwrap();
        let before = count(&store);
        let err = store.push_aggregates(&ctx(), vec![second]).unwrap_err();
        assert!(err.is_precondition_failed());
        assert_eq!(count(&store), before);
    }

    #[test]
    fn storage_failures_propagate_as_internal() {
        struct Broken;

        impl EventRepository for Broken {
            fn push(
                &self,
                _: &Context,
                _: Vec<Aggregate>,
            ) -> DomainResult<Vec<warden_events::Event>> {
                Err(DomainError::internal("disk on fire"))
            }

            fn filter(
                &self,
                _: &Context,
                _: &SearchQuery,
            ) -> DomainResult<Vec<warden_events::Event>> {
                Err(DomainError::internal("disk on fire"))
            }

            fn health(&self, _: &Context) -> DomainResult<()> {
                Err(DomainError::internal("disk on fire"))
            }
        }

        let repo = repo_with(Eventstore::new(Arc::new(Broken), "admin-api"));
        let err = repo.iam_by_id(&ctx(), IAM_ID).unwrap_err();
        assert_eq!(err, DomainError::internal("disk on fire"));
        assert!(repo.start_setup(&ctx(), IAM_ID).unwrap_err().is_internal());

        let healthy = Eventstore::new(Arc::new(InMemoryEventRepository::new()), "admin-api");
        assert!(healthy.health(&ctx()).is_ok());
    }
}
