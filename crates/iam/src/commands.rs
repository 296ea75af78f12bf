//! Command rules shared by the IAM and orgs.
//!
//! Each builder checks the command against the folded [`AccessControl`] and
//! appends the resulting events to the caller's aggregate. Rules that need
//! the log's state at commit time attach a precondition instead.

use warden_core::{DomainError, DomainResult, require_changes};
use warden_events::{Aggregate, Event, PreconditionValidator, SearchQuery};

use crate::access_control::{
    AccessControl, AccessControlEvents, IdpConfig, IdpConfigFields, IdpConfigId, IdpConfigState,
    IdpProvider, LoginPolicy, Member, MemberId, OidcIdpConfig,
};

/// Extra events a removal must emit in the same push.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CascadeEffect {
    /// The removed IDP config was attached to the login policy.
    IdpProviderRemoved { idp_config_id: String },
}

impl CascadeEffect {
    fn append_to(&self, agg: &mut Aggregate, events: &AccessControlEvents) -> DomainResult<()> {
        match self {
            Self::IdpProviderRemoved { idp_config_id } => {
                agg.append_event(
                    events.idp_provider_cascade_removed,
                    &IdpConfigId {
                        idp_config_id: idp_config_id.clone(),
                    },
                )?;
            }
        }
        Ok(())
    }
}

/// What else goes away with the IDP config.
pub fn idp_config_removal_effects(state: &AccessControl, idp_config_id: &str) -> Vec<CascadeEffect> {
    state
        .idp_provider(idp_config_id)
        .map(|provider| CascadeEffect::IdpProviderRemoved {
            idp_config_id: provider.idp_config_id.clone(),
        })
        .into_iter()
        .collect()
}

fn own_events_query(agg: &Aggregate) -> SearchQuery {
    SearchQuery::new()
        .aggregate_type_filter([agg.aggregate_type().clone()])
        .aggregate_id_filter([agg.id()])
}

// ─────────────────────────────────────────────────────────────────────────────
// Members
// ─────────────────────────────────────────────────────────────────────────────

pub fn add_member(
    agg: &mut Aggregate,
    events: &AccessControlEvents,
    state: &AccessControl,
    member: &Member,
) -> DomainResult<()> {
    if !member.is_valid() {
        return Err(DomainError::precondition_failed("member needs a user id and roles"));
    }
    if state.member(&member.user_id).is_some() {
        return Err(DomainError::already_exists(format!(
            "user {} is already a member",
            member.user_id
        )));
    }
    agg.append_event(events.member_added, member)?;
    Ok(())
}

pub fn change_member(
    agg: &mut Aggregate,
    events: &AccessControlEvents,
    state: &AccessControl,
    member: &Member,
) -> DomainResult<()> {
    if !member.is_valid() {
        return Err(DomainError::precondition_failed("member needs a user id and roles"));
    }
    let Some(existing) = state.member(&member.user_id) else {
        return Err(DomainError::not_found(format!(
            "user {} is not a member",
            member.user_id
        )));
    };
    require_changes(existing, member)?;
    agg.append_event(events.member_changed, member)?;
    Ok(())
}

pub fn remove_member(
    agg: &mut Aggregate,
    events: &AccessControlEvents,
    state: &AccessControl,
    user_id: &str,
) -> DomainResult<()> {
    if user_id.is_empty() {
        return Err(DomainError::precondition_failed("user id missing"));
    }
    if state.member(user_id).is_none() {
        return Err(DomainError::not_found(format!("user {user_id} is not a member")));
    }
    agg.append_event(
        events.member_removed,
        &MemberId {
            user_id: user_id.to_string(),
        },
    )?;
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// IDP configurations
// ─────────────────────────────────────────────────────────────────────────────

fn existing_idp_config<'a>(
    state: &'a AccessControl,
    idp_config_id: &str,
) -> DomainResult<&'a IdpConfig> {
    if idp_config_id.is_empty() {
        return Err(DomainError::precondition_failed("idp config id missing"));
    }
    state.idp_config(idp_config_id).ok_or_else(|| {
        DomainError::precondition_failed(format!("idp config {idp_config_id} not existing"))
    })
}

/// Appends the config and, when present, its OIDC settings.
///
/// `config.idp_config_id` must already be assigned.
pub fn add_idp_config(
    agg: &mut Aggregate,
    events: &AccessControlEvents,
    config: &IdpConfig,
) -> DomainResult<()> {
    if config.idp_config_id.is_empty() || !config.is_valid() {
        return Err(DomainError::precondition_failed("invalid idp config"));
    }
    let mut added = config.clone();
    added.state = IdpConfigState::Active;
    let oidc = added.oidc_config.take();
    agg.append_event(events.idp_config_added, &added)?;
    if let Some(mut oidc) = oidc {
        oidc.idp_config_id = config.idp_config_id.clone();
        agg.append_event(events.oidc_config_added, &oidc)?;
    }
    Ok(())
}

pub fn change_idp_config(
    agg: &mut Aggregate,
    events: &AccessControlEvents,
    state: &AccessControl,
    config: &IdpConfig,
) -> DomainResult<()> {
    if config.name.is_empty() {
        return Err(DomainError::precondition_failed("invalid idp config"));
    }
    let existing = existing_idp_config(state, &config.idp_config_id)?;
    let changes = require_changes(&IdpConfigFields::from(existing), &IdpConfigFields::from(config))?
        .with_key("idpConfigId", config.idp_config_id.clone());
    agg.append_event(events.idp_config_changed, &changes)?;
    Ok(())
}

/// Removes the config plus everything that references it.
pub fn remove_idp_config(
    agg: &mut Aggregate,
    events: &AccessControlEvents,
    state: &AccessControl,
    idp_config_id: &str,
) -> DomainResult<Vec<CascadeEffect>> {
    existing_idp_config(state, idp_config_id)?;
    agg.append_event(
        events.idp_config_removed,
        &IdpConfigId {
            idp_config_id: idp_config_id.to_string(),
        },
    )?;
    let effects = idp_config_removal_effects(state, idp_config_id);
    for effect in &effects {
        effect.append_to(agg, events)?;
    }
    Ok(effects)
}

pub fn deactivate_idp_config(
    agg: &mut Aggregate,
    events: &AccessControlEvents,
    state: &AccessControl,
    idp_config_id: &str,
) -> DomainResult<()> {
    let existing = existing_idp_config(state, idp_config_id)?;
    if existing.state == IdpConfigState::Inactive {
        return Err(DomainError::precondition_failed("idp config already inactive"));
    }
    agg.append_event(
        events.idp_config_deactivated,
        &IdpConfigId {
            idp_config_id: idp_config_id.to_string(),
        },
    )?;
    Ok(())
}

pub fn reactivate_idp_config(
    agg: &mut Aggregate,
    events: &AccessControlEvents,
    state: &AccessControl,
    idp_config_id: &str,
) -> DomainResult<()> {
    let existing = existing_idp_config(state, idp_config_id)?;
    if existing.state != IdpConfigState::Inactive {
        return Err(DomainError::precondition_failed("idp config not inactive"));
    }
    agg.append_event(
        events.idp_config_reactivated,
        &IdpConfigId {
            idp_config_id: idp_config_id.to_string(),
        },
    )?;
    Ok(())
}

/// An empty `client_secret` keeps the stored secret.
pub fn change_oidc_config(
    agg: &mut Aggregate,
    events: &AccessControlEvents,
    state: &AccessControl,
    oidc: &OidcIdpConfig,
) -> DomainResult<()> {
    if !oidc.is_valid() {
        return Err(DomainError::precondition_failed("invalid oidc config"));
    }
    let existing = existing_idp_config(state, &oidc.idp_config_id)?;
    let Some(current) = existing.oidc_config.as_ref() else {
        return Err(DomainError::precondition_failed(format!(
            "idp config {} has no oidc config",
            oidc.idp_config_id
        )));
    };
    let mut wanted = oidc.clone();
    if wanted.client_secret.is_empty() {
        wanted.client_secret = current.client_secret.clone();
    }
    let changes =
        require_changes(current, &wanted)?.with_key("idpConfigId", oidc.idp_config_id.clone());
    agg.append_event(events.oidc_config_changed, &changes)?;
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Login policy
// ─────────────────────────────────────────────────────────────────────────────

/// Rejects the push if the log already holds a login policy for the aggregate.
#[derive(Debug, Clone, Copy)]
pub struct LoginPolicyAbsent {
    pub events: AccessControlEvents,
}

impl PreconditionValidator for LoginPolicyAbsent {
    fn validate(&self, found: &[Event]) -> DomainResult<()> {
        let mut exists = false;
        for event in found {
            if event.is(self.events.login_policy_added) {
                exists = true;
            } else if event.is(self.events.login_policy_removed) {
                exists = false;
            }
        }
        if exists {
            return Err(DomainError::precondition_failed("login policy already exists"));
        }
        Ok(())
    }
}

/// Aggregate whose IDP configs a login-policy provider points at.
///
/// Orgs attach their own configs as well as the IAM's system-wide ones.
#[derive(Debug, Clone, Copy)]
pub struct IdpConfigSource<'a> {
    pub events: &'a AccessControlEvents,
    pub aggregate_id: &'a str,
}

/// Checks at commit time that the IDP config exists and is not attached yet.
#[derive(Debug, Clone)]
pub struct IdpProviderAddable {
    pub config_events: AccessControlEvents,
    pub provider_events: AccessControlEvents,
    pub idp_config_id: String,
}

impl PreconditionValidator for IdpProviderAddable {
    fn validate(&self, found: &[Event]) -> DomainResult<()> {
        let mut config_exists = false;
        let mut provider_exists = false;
        for event in found {
            if event.is(self.provider_events.login_policy_removed) {
                provider_exists = false;
                continue;
            }
            if event.decode::<IdpConfigId>()?.idp_config_id != self.idp_config_id {
                continue;
            }
            let t = event.event_type.as_str();
            if t == self.config_events.idp_config_added {
                config_exists = true;
            } else if t == self.config_events.idp_config_removed {
                config_exists = false;
            } else if t == self.provider_events.idp_provider_added {
                provider_exists = true;
            } else if t == self.provider_events.idp_provider_removed
                || t == self.provider_events.idp_provider_cascade_removed
            {
                provider_exists = false;
            }
        }

        if !config_exists {
            return Err(DomainError::precondition_failed(format!(
                "idp config {} not existing",
                self.idp_config_id
            )));
        }
        if provider_exists {
            return Err(DomainError::precondition_failed(format!(
                "idp provider {} already existing",
                self.idp_config_id
            )));
        }
        Ok(())
    }
}

pub fn add_login_policy(
    agg: &mut Aggregate,
    events: &AccessControlEvents,
    state: &AccessControl,
    policy: &LoginPolicy,
) -> DomainResult<()> {
    if state.login_policy.is_some() {
        return Err(DomainError::already_exists("login policy already exists"));
    }
    let query = own_events_query(agg).event_types_filter([
        events.login_policy_added,
        events.login_policy_removed,
    ]);
    agg.append_event(events.login_policy_added, &policy.flags())?
        .set_precondition(query, LoginPolicyAbsent { events: *events });
    Ok(())
}

pub fn change_login_policy(
    agg: &mut Aggregate,
    events: &AccessControlEvents,
    state: &AccessControl,
    policy: &LoginPolicy,
) -> DomainResult<()> {
    let Some(existing) = state.login_policy.as_ref() else {
        return Err(DomainError::precondition_failed("login policy not existing"));
    };
    let changes = require_changes(&existing.flags(), &policy.flags())?;
    agg.append_event(events.login_policy_changed, &changes)?;
    Ok(())
}

pub fn remove_login_policy(
    agg: &mut Aggregate,
    events: &AccessControlEvents,
    state: &AccessControl,
) -> DomainResult<()> {
    if state.login_policy.is_none() {
        return Err(DomainError::precondition_failed("login policy not existing"));
    }
    agg.append_empty_event(events.login_policy_removed)?;
    Ok(())
}

pub fn add_idp_provider(
    agg: &mut Aggregate,
    events: &AccessControlEvents,
    state: &AccessControl,
    provider: &IdpProvider,
    source: IdpConfigSource<'_>,
) -> DomainResult<()> {
    if provider.idp_config_id.is_empty() {
        return Err(DomainError::precondition_failed("invalid idp provider"));
    }
    if state.login_policy.is_none() {
        return Err(DomainError::precondition_failed("login policy not existing"));
    }
    if state.idp_provider(&provider.idp_config_id).is_some() {
        return Err(DomainError::already_exists(format!(
            "idp provider {} already on login policy",
            provider.idp_config_id
        )));
    }
    let query = SearchQuery::new()
        .aggregate_type_filter([agg.aggregate_type().as_str(), source.events.aggregate_type])
        .aggregate_id_filter([agg.id(), source.aggregate_id])
        .event_types_filter([
            source.events.idp_config_added,
            source.events.idp_config_removed,
            events.login_policy_removed,
            events.idp_provider_added,
            events.idp_provider_removed,
            events.idp_provider_cascade_removed,
        ]);
    agg.append_event(events.idp_provider_added, provider)?
        .set_precondition(
            query,
            IdpProviderAddable {
                config_events: *source.events,
                provider_events: *events,
                idp_config_id: provider.idp_config_id.clone(),
            },
        );
    Ok(())
}

pub fn remove_idp_provider(
    agg: &mut Aggregate,
    events: &AccessControlEvents,
    state: &AccessControl,
    idp_config_id: &str,
) -> DomainResult<()> {
    if idp_config_id.is_empty() {
        return Err(DomainError::precondition_failed("invalid idp provider"));
    }
    if state.idp_provider(idp_config_id).is_none() {
        return Err(DomainError::precondition_failed(format!(
            "idp provider {idp_config_id} not existing"
        )));
    }
    agg.append_event(
        events.idp_provider_removed,
        &IdpConfigId {
            idp_config_id: idp_config_id.to_string(),
        },
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iam::IAM_ACCESS_EVENTS as EV;
    use warden_core::Context;
    use warden_events::AggregateCreator;

    fn aggregate() -> Aggregate {
        AggregateCreator::new("test")
            .new_aggregate(&Context::new("u", "test", "iam"), "iam", "iam", "v1", 0, &[])
            .unwrap()
    }

    fn log(build: impl FnOnce(&mut Aggregate)) -> Vec<Event> {
        let mut agg = aggregate();
        build(&mut agg);
        agg.events()
            .iter()
            .cloned()
            .enumerate()
            .map(|(i, mut e)| {
                e.sequence = i as u64 + 1;
                e
            })
            .collect()
    }

    fn addable(id: &str) -> IdpProviderAddable {
        IdpProviderAddable {
            config_events: EV,
            provider_events: EV,
            idp_config_id: id.to_string(),
        }
    }

    #[test]
    fn provider_validator_follows_the_log() {
        let mut config = IdpConfig::new("Google");
        config.idp_config_id = "idp-1".into();
        let provider = IdpProvider::new("idp-1", Default::default());

        let only_config = log(|agg| {
            add_idp_config(agg, &EV, &config).unwrap();
        });
        assert!(addable("idp-1").validate(&only_config).is_ok());
        assert!(addable("idp-2").validate(&only_config).unwrap_err().is_precondition_failed());

        let attached = log(|agg| {
            add_idp_config(agg, &EV, &config).unwrap();
            agg.append_event(EV.idp_provider_added, &provider).unwrap();
        });
        assert!(addable("idp-1").validate(&attached).is_err());

        let cascaded = log(|agg| {
            add_idp_config(agg, &EV, &config).unwrap();
            agg.append_event(EV.idp_provider_added, &provider).unwrap();
            agg.append_event(
                EV.idp_provider_cascade_removed,
                &IdpConfigId {
                    idp_config_id: "idp-1".into(),
                },
            )
            .unwrap();
        });
        assert!(addable("idp-1").validate(&cascaded).is_ok());
    }

    #[test]
    fn login_policy_can_be_re_added_after_removal() {
        let validator = LoginPolicyAbsent { events: EV };
        let policy = LoginPolicy::new(true, true, true);

        let added = log(|agg| {
            agg.append_event(EV.login_policy_added, &policy).unwrap();
        });
        assert!(validator.validate(&added).is_err());

        let removed = log(|agg| {
            agg.append_event(EV.login_policy_added, &policy).unwrap();
            agg.append_empty_event(EV.login_policy_removed).unwrap();
        });
        assert!(validator.validate(&removed).is_ok());
    }

    #[test]
    fn removal_effects_are_empty_without_a_provider() {
        let mut state = AccessControl::default();
        state.idp_configs.push(IdpConfig {
            idp_config_id: "idp-1".into(),
            ..IdpConfig::new("Google")
        });
        assert!(idp_config_removal_effects(&state, "idp-1").is_empty());

        state.login_policy = Some(LoginPolicy {
            idp_providers: vec![IdpProvider::new("idp-1", Default::default())],
            ..LoginPolicy::default()
        });
        assert_eq!(idp_config_removal_effects(&state, "idp-1").len(), 1);
    }
}
