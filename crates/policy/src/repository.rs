use tracing::debug;

use warden_core::{Context, DomainError, DomainResult, require_changes};
use warden_events::{Aggregate, AggregateOption, EventSourced, Eventstore, NoEvents};

use crate::kinds::PolicyDefaults;
use crate::policy::{Policy, PolicyKind, policy_query};

const POLICY_VERSION: &str = "v1";

/// Reads and writes the password policies of orgs.
#[derive(Debug, Clone)]
pub struct PolicyEventstore {
    eventstore: Eventstore,
    defaults: PolicyDefaults,
}

impl PolicyEventstore {
    pub fn new(eventstore: Eventstore, defaults: PolicyDefaults) -> Self {
        Self {
            eventstore,
            defaults,
        }
    }

    /// The org's policy, or the instance default when it has none.
    pub fn policy<P: PolicyKind>(&self, ctx: &Context, org_id: &str) -> DomainResult<Policy<P>> {
        if org_id.is_empty() {
            return Err(DomainError::precondition_failed("org id missing"));
        }
        let mut policy = Policy::<P>::new(org_id, &self.defaults);
        self.eventstore
            .filter_and_fold(ctx, &policy_query::<P>(org_id, 0), &mut policy)?;
        Ok(policy)
    }

    pub fn add_policy<P: PolicyKind>(
        &self,
        ctx: &Context,
        org_id: &str,
        policy: &P,
    ) -> DomainResult<Policy<P>> {
        policy.validate()?;
        let current = self.policy::<P>(ctx, org_id)?;
        if !current.is_default {
            return Err(DomainError::already_exists(format!(
                "{} already added",
                P::AGGREGATE_TYPE
            )));
        }
        self.push(ctx, current, |agg| {
            agg.append_event(P::ADDED, policy)?.set_precondition(
                policy_query::<P>(org_id, 0).event_types_filter([P::ADDED]),
                NoEvents(DomainError::precondition_failed(format!(
                    "{} already added",
                    P::AGGREGATE_TYPE
                ))),
            );
            Ok(())
        })
    }

    pub fn change_policy<P: PolicyKind>(
        &self,
        ctx: &Context,
        org_id: &str,
        policy: &P,
    ) -> DomainResult<Policy<P>> {
        policy.validate()?;
        let current = self.policy::<P>(ctx, org_id)?;
        if current.is_default {
            return Err(DomainError::precondition_failed(format!(
                "{} not existing",
                P::AGGREGATE_TYPE
            )));
        }
        let changes = require_changes(&current.policy, policy)?;
        self.push(ctx, current, |agg| {
            agg.append_event(P::CHANGED, &changes)?;
            Ok(())
        })
    }

    fn push<P: PolicyKind>(
        &self,
        ctx: &Context,
        mut current: Policy<P>,
        build: impl FnOnce(&mut Aggregate) -> DomainResult<()>,
    ) -> DomainResult<Policy<P>> {
        let org_id = current.root.aggregate_id.clone();
        let mut aggregate = self.eventstore.aggregate_creator().new_aggregate(
            ctx,
            &org_id,
            P::AGGREGATE_TYPE,
            POLICY_VERSION,
            current.root.sequence,
            &[AggregateOption::OverwriteResourceOwner(org_id.clone())],
        )?;
        build(&mut aggregate)?;
        let events = self.eventstore.push_aggregates(ctx, vec![aggregate])?;
        current.append_events(&events)?;
        debug!(policy = P::AGGREGATE_TYPE, org_id = %org_id, sequence = current.root.sequence, "policy updated");
        Ok(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kinds::{PasswordAgePolicy, PasswordComplexityPolicy, PasswordLockoutPolicy};
    use warden_core::NO_CHANGES;
    use warden_events::SearchQuery;

    const ORG: &str = "org-1";

    fn ctx() -> Context {
        Context::new("admin-1", "management-api", ORG)
    }

    fn repo() -> (PolicyEventstore, Eventstore) {
        let store = Eventstore::in_memory("management-api");
        (PolicyEventstore::new(store.clone(), PolicyDefaults::default()), store)
    }

    fn strict() -> PasswordComplexityPolicy {
        PasswordComplexityPolicy {
            description: "strict".into(),
            min_length: 12,
            has_symbol: true,
            ..PasswordComplexityPolicy::default()
        }
    }

    #[test]
    fn orgs_without_a_policy_get_the_default() {
        let (repo, _) = repo();
        let policy = repo.policy::<PasswordAgePolicy>(&ctx(), ORG).unwrap();
        assert!(policy.is_default);
        assert_eq!(policy.policy, PasswordAgePolicy::default());
        assert_eq!(policy.root.sequence, 0);
        assert!(
            repo.policy::<PasswordAgePolicy>(&ctx(), "")
                .unwrap_err()
                .is_precondition_failed()
        );
    }

    #[test]
    fn added_policy_replaces_the_default() {
        let (repo, _) = repo();
        let added = repo.add_policy(&ctx(), ORG, &strict()).unwrap();
        assert!(!added.is_default);
        assert_eq!(added.root.resource_owner, ORG);

        let loaded = repo.policy::<PasswordComplexityPolicy>(&ctx(), ORG).unwrap();
        assert_eq!(loaded.policy, strict());
        assert!(
            repo.add_policy(&ctx(), ORG, &strict())
                .unwrap_err()
                .is_already_exists()
        );
    }

    #[test]
    fn kinds_are_independent() {
        let (repo, _) = repo();
        repo.add_policy(&ctx(), ORG, &strict()).unwrap();
        let lockout = repo.policy::<PasswordLockoutPolicy>(&ctx(), ORG).unwrap();
        assert!(lockout.is_default);
    }

    #[test]
    fn changes_need_an_existing_policy_and_a_delta() {
        let (repo, store) = repo();
        assert!(
            repo.change_policy(&ctx(), ORG, &strict())
                .unwrap_err()
                .is_precondition_failed()
        );
        repo.add_policy(&ctx(), ORG, &strict()).unwrap();

        let err = repo.change_policy(&ctx(), ORG, &strict()).unwrap_err();
        assert_eq!(err, DomainError::precondition_failed(NO_CHANGES));

        let mut relaxed = strict();
        relaxed.has_symbol = false;
        let changed = repo.change_policy(&ctx(), ORG, &relaxed).unwrap();
        assert_eq!(changed.policy, relaxed);

        let events = store
            .filter_events(
                &ctx(),
                &SearchQuery::new().aggregate_type_filter([PasswordComplexityPolicy::AGGREGATE_TYPE]),
            )
            .unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(
            events[1].payload,
            Some(serde_json::json!({ "hasSymbol": false }))
        );
    }

    #[test]
    fn invalid_policies_are_not_stored() {
        let (repo, store) = repo();
        let invalid = PasswordComplexityPolicy {
            min_length: 0,
            ..strict()
        };
        assert!(matches!(
            repo.add_policy(&ctx(), ORG, &invalid),
            Err(DomainError::InvalidArgument(_))
        ));
        let missing = PasswordLockoutPolicy {
            description: String::new(),
            ..PasswordLockoutPolicy::default()
        };
        assert!(
            repo.add_policy(&ctx(), ORG, &missing)
                .unwrap_err()
                .is_precondition_failed()
        );
        assert!(
            store
                .filter_events(&ctx(), &SearchQuery::new().aggregate_id_filter([ORG]))
                .unwrap()
                .is_empty()
        );
    }

    #[test]
    fn racing_adds_fail_at_commit() {
        let (repo, store) = repo();
        let stale = repo.policy::<PasswordComplexityPolicy>(&ctx(), ORG).unwrap();
        repo.add_policy(&ctx(), ORG, &strict()).unwrap();

        // a writer that loaded before the first add
        let err = repo
            .push(&ctx(), stale, |agg| {
                agg.append_event(PasswordComplexityPolicy::ADDED, &strict())?
                    .set_precondition(
                        policy_query::<PasswordComplexityPolicy>(ORG, 0)
                            .event_types_filter([PasswordComplexityPolicy::ADDED]),
                        NoEvents(DomainError::precondition_failed("already added")),
                    );
                Ok(())
            })
            .unwrap_err();
        assert!(err.is_precondition_failed());
        assert_eq!(
            store
                .filter_events(&ctx(), &SearchQuery::new().aggregate_id_filter([ORG]))
                .unwrap()
                .len(),
            1
        );
    }
}
