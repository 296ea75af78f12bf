use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use tracing::{debug, info};

use warden_core::{Context, DomainError, DomainResult, EntityCache, IdGenerator, require_changes};
use warden_events::{
    Aggregate, AggregateCreator, AggregateOption, AggregateStruct, Changes, Event, EventSourced,
    Eventstore, SearchQuery, UniqueConstraint, changes_from_events, changes_query,
};

use crate::user::{
    ADDRESS_CHANGED, Address, EMAIL_CHANGED, EMAIL_VERIFIED, EXTERNAL_IDP_ADDED,
    EXTERNAL_IDP_CASCADE_REMOVED, EXTERNAL_IDP_REMOVED, EmailChanged, ExternalIdp, HUMAN_ADDED, Human, HumanAdded, KeyId,
    MACHINE_ADDED, MACHINE_CHANGED, MACHINE_KEY_ADDED, MACHINE_KEY_REMOVED, Machine, MachineAdded,
    MachineFields, MachineKey, MachineKeyType, PHONE_CHANGED, PHONE_REMOVED, PHONE_VERIFIED,
    PROFILE_CHANGED, Phone, PhoneChanged, Profile, SIGNED_OUT, SignedOut, UNIQUE_EXTERNAL_IDP,
    UNIQUE_USER_NAME, USER_AGGREGATE, USER_DEACTIVATED, USER_LOCKED, USER_REACTIVATED,
    USER_UNLOCKED, USER_VERSION, User, UserState, Email, user_by_id_query,
};

fn user_name_claim(user_name: &str, resource_owner: &str) -> String {
    format!("{user_name}@{resource_owner}")
}

fn append_external_idp_removal(
    agg: &mut Aggregate,
    user: &User,
    link: &ExternalIdp,
    cascade: bool,
) -> DomainResult<()> {
    if user.require_human()?.external_idp(link).is_none() {
        return Err(DomainError::not_found("external idp not on user"));
    }
    let event_type = if cascade {
        EXTERNAL_IDP_CASCADE_REMOVED
    } else {
        EXTERNAL_IDP_REMOVED
    };
    agg.append_event(event_type, link)?
        .add_unique_constraint(UniqueConstraint::remove(
            UNIQUE_EXTERNAL_IDP,
            link.unique_field(),
        ));
    Ok(())
}

/// A user's link to an external identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkedExternalIdp {
    pub user_id: String,
    pub resource_owner: String,
    pub link: ExternalIdp,
}

fn default_key_expiration() -> DomainResult<DateTime<Utc>> {
    Utc.with_ymd_and_hms(9999, 1, 1, 0, 0, 0)
        .single()
        .ok_or_else(|| DomainError::internal("default key expiration out of range"))
}

/// Commands and reads on user aggregates.
///
/// Reads go through the entity cache, but a cached user is always topped up
/// with the events stored after its sequence before it is served.
#[derive(Clone)]
pub struct UserEventstore {
    eventstore: Eventstore,
    id_generator: Arc<dyn IdGenerator>,
    cache: Arc<dyn EntityCache<User>>,
}

impl UserEventstore {
    pub fn new(
        eventstore: Eventstore,
        id_generator: Arc<dyn IdGenerator>,
        cache: Arc<dyn EntityCache<User>>,
    ) -> Self {
        Self {
            eventstore,
            id_generator,
            cache,
        }
    }

    pub fn user_by_id(&self, ctx: &Context, id: &str) -> DomainResult<User> {
        if id.is_empty() {
            return Err(DomainError::precondition_failed("user id missing"));
        }
        let mut user = self.cache.get(id).unwrap_or_else(|| User::new(id));
        let cached_sequence = user.root.sequence;
        let found = self.eventstore.filter_and_fold(
            ctx,
            &user_by_id_query(id, cached_sequence),
            &mut user,
        )?;
        if found == 0 && cached_sequence == 0 {
            return Err(DomainError::not_found(format!("user {id} not found")));
        }
        if found > 0 {
            self.cache.put(id, user.clone());
        }
        Ok(user)
    }

    /// Raw events of the user after `sequence`.
    pub fn user_events_by_id(
        &self,
        ctx: &Context,
        id: &str,
        sequence: u64,
    ) -> DomainResult<Vec<Event>> {
        if id.is_empty() {
            return Err(DomainError::precondition_failed("user id missing"));
        }
        self.eventstore
            .filter_events(ctx, &user_by_id_query(id, sequence))
    }

    fn aggregate(&self, ctx: &Context, user: &User) -> DomainResult<Aggregate> {
        let options = if user.root.resource_owner.is_empty() {
            Vec::new()
        } else {
            vec![AggregateOption::OverwriteResourceOwner(
                user.root.resource_owner.clone(),
            )]
        };
        self.eventstore.aggregate_creator().new_aggregate(
            ctx,
            &user.root.aggregate_id,
            USER_AGGREGATE,
            USER_VERSION,
            user.root.sequence,
            &options,
        )
    }

    fn push(&self, ctx: &Context, mut user: User, aggregate: Aggregate) -> DomainResult<User> {
        let events = self.eventstore.push_aggregates(ctx, vec![aggregate])?;
        user.append_events(&events)?;
        self.cache.put(&user.root.aggregate_id, user.clone());
        debug!(user_id = %user.root.aggregate_id, sequence = user.root.sequence, "user updated");
        Ok(user)
    }

    fn execute<F>(&self, ctx: &Context, user_id: &str, build: F) -> DomainResult<User>
    where
        F: FnOnce(&mut Aggregate, &User) -> DomainResult<()>,
    {
        let user = self.user_by_id(ctx, user_id)?;
        let mut aggregate = self.aggregate(ctx, &user)?;
        build(&mut aggregate, &user)?;
        self.push(ctx, user, aggregate)
    }

    /// Generates an id and claims `user_name` within the resource owner.
    fn create(
        &self,
        ctx: &Context,
        user_name: &str,
        build: impl FnOnce(&mut Aggregate) -> DomainResult<()>,
    ) -> DomainResult<User> {
        let user = User::new(self.id_generator.next_id()?);
        let mut aggregate = self.aggregate(ctx, &user)?;
        build(&mut aggregate)?;
        let claim = user_name_claim(user_name, aggregate.resource_owner());
        aggregate.add_unique_constraint(UniqueConstraint::add(
            UNIQUE_USER_NAME,
            claim,
            format!("user name {user_name} is already taken"),
        ));
        let user = self.push(ctx, user, aggregate)?;
        info!(user_id = %user.root.aggregate_id, owner = %user.root.resource_owner, "user created");
        Ok(user)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Creation
    // ─────────────────────────────────────────────────────────────────────────

    pub fn create_human(&self, ctx: &Context, user_name: &str, human: &Human) -> DomainResult<User> {
        if user_name.is_empty() || !human.is_valid() {
            return Err(DomainError::precondition_failed("invalid human user"));
        }
        // Verification is recorded by its own events.
        let mut human = human.clone();
        human.external_idps.clear();
        let verified_email = std::mem::take(&mut human.email.verified);
        let verified_phone = human
            .phone
            .as_mut()
            .is_some_and(|p| std::mem::take(&mut p.verified));
        self.create(ctx, user_name, |agg| {
            agg.append_event(
                HUMAN_ADDED,
                &HumanAdded {
                    user_name: user_name.to_string(),
                    human,
                },
            )?;
            if verified_email {
                agg.append_empty_event(EMAIL_VERIFIED)?;
            }
            if verified_phone {
                agg.append_empty_event(PHONE_VERIFIED)?;
            }
            Ok(())
        })
    }

    pub fn create_machine(
        &self,
        ctx: &Context,
        user_name: &str,
        machine: &Machine,
    ) -> DomainResult<User> {
        if user_name.is_empty() || machine.name.is_empty() {
            return Err(DomainError::precondition_failed("invalid machine user"));
        }
        let machine = Machine::new(&machine.name, &machine.description);
        self.create(ctx, user_name, |agg| {
            agg.append_event(
                MACHINE_ADDED,
                &MachineAdded {
                    user_name: user_name.to_string(),
                    machine,
                },
            )?;
            Ok(())
        })
    }

    pub fn change_machine(&self, ctx: &Context, user_id: &str, machine: &Machine) -> DomainResult<User> {
        if machine.name.is_empty() {
            return Err(DomainError::precondition_failed("invalid machine user"));
        }
        self.execute(ctx, user_id, |agg, user| {
            let existing = user.require_machine()?;
            let changes =
                require_changes(&MachineFields::from(existing), &MachineFields::from(machine))?;
            agg.append_event(MACHINE_CHANGED, &changes)?;
            Ok(())
        })
    }

    // ─────────────────────────────────────────────────────────────────────────
    // State
    // ─────────────────────────────────────────────────────────────────────────

    fn transition(
        &self,
        ctx: &Context,
        user_id: &str,
        from: UserState,
        event_type: &'static str,
    ) -> DomainResult<User> {
        self.execute(ctx, user_id, |agg, user| {
            if user.state != from {
                return Err(DomainError::precondition_failed(format!(
                    "user is {:?}, expected {:?}",
                    user.state, from
                )));
            }
            agg.append_empty_event(event_type)?;
            Ok(())
        })
    }

    pub fn deactivate_user(&self, ctx: &Context, user_id: &str) -> DomainResult<User> {
        self.transition(ctx, user_id, UserState::Active, USER_DEACTIVATED)
    }

    pub fn reactivate_user(&self, ctx: &Context, user_id: &str) -> DomainResult<User> {
        self.transition(ctx, user_id, UserState::Inactive, USER_REACTIVATED)
    }

    pub fn lock_user(&self, ctx: &Context, user_id: &str) -> DomainResult<User> {
        self.transition(ctx, user_id, UserState::Active, USER_LOCKED)
    }

    pub fn unlock_user(&self, ctx: &Context, user_id: &str) -> DomainResult<User> {
        self.transition(ctx, user_id, UserState::Locked, USER_UNLOCKED)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Human data
    // ─────────────────────────────────────────────────────────────────────────

    pub fn change_profile(&self, ctx: &Context, user_id: &str, profile: &Profile) -> DomainResult<Profile> {
        if !profile.is_valid() {
            return Err(DomainError::precondition_failed("invalid profile"));
        }
        let user = self.execute(ctx, user_id, |agg, user| {
            let changes = require_changes(&user.require_human()?.profile, profile)?;
            agg.append_event(PROFILE_CHANGED, &changes)?;
            Ok(())
        })?;
        Ok(user.require_human()?.profile.clone())
    }

    /// Sets a new address; `email.verified` marks it verified in the same push.
    pub fn change_email(&self, ctx: &Context, user_id: &str, email: &Email) -> DomainResult<Email> {
        if email.email.is_empty() {
            return Err(DomainError::precondition_failed("email missing"));
        }
        let user = self.execute(ctx, user_id, |agg, user| {
            if user.require_human()?.email.email == email.email {
                return Err(DomainError::precondition_failed(warden_core::NO_CHANGES));
            }
            agg.append_event(
                EMAIL_CHANGED,
                &EmailChanged {
                    email: email.email.clone(),
                },
            )?;
            if email.verified {
                agg.append_empty_event(EMAIL_VERIFIED)?;
            }
            Ok(())
        })?;
        Ok(user.require_human()?.email.clone())
    }

    pub fn change_phone(&self, ctx: &Context, user_id: &str, phone: &Phone) -> DomainResult<Phone> {
        if phone.phone.is_empty() {
            return Err(DomainError::precondition_failed("phone missing"));
        }
        let user = self.execute(ctx, user_id, |agg, user| {
            let current = user.require_human()?.phone.as_ref();
            if current.is_some_and(|p| p.phone == phone.phone) {
                return Err(DomainError::precondition_failed(warden_core::NO_CHANGES));
            }
            agg.append_event(
                PHONE_CHANGED,
                &PhoneChanged {
                    phone: phone.phone.clone(),
                },
            )?;
            if phone.verified {
                agg.append_empty_event(PHONE_VERIFIED)?;
            }
            Ok(())
        })?;
        user.require_human()?
            .phone
            .clone()
            .ok_or_else(|| DomainError::internal("phone missing after change"))
    }

    pub fn remove_phone(&self, ctx: &Context, user_id: &str) -> DomainResult<User> {
        self.execute(ctx, user_id, |agg, user| {
            if user.require_human()?.phone.is_none() {
                return Err(DomainError::precondition_failed("user has no phone"));
            }
            agg.append_empty_event(PHONE_REMOVED)?;
            Ok(())
        })
    }

    pub fn change_address(&self, ctx: &Context, user_id: &str, address: &Address) -> DomainResult<Address> {
        let user = self.execute(ctx, user_id, |agg, user| {
            let changes = require_changes(&user.require_human()?.address, address)?;
            agg.append_event(ADDRESS_CHANGED, &changes)?;
            Ok(())
        })?;
        Ok(user.require_human()?.address.clone())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // External identities
    // ─────────────────────────────────────────────────────────────────────────

    /// Links an external identity; each identity belongs to one user at most.
    pub fn add_external_idp(
        &self,
        ctx: &Context,
        user_id: &str,
        link: &ExternalIdp,
    ) -> DomainResult<ExternalIdp> {
        if !link.is_valid() {
            return Err(DomainError::precondition_failed("invalid external idp"));
        }
        let user = self.execute(ctx, user_id, |agg, user| {
            if user.require_human()?.external_idp(link).is_some() {
                return Err(DomainError::already_exists("external idp already linked"));
            }
            agg.append_event(EXTERNAL_IDP_ADDED, link)?
                .add_unique_constraint(UniqueConstraint::add(
                    UNIQUE_EXTERNAL_IDP,
                    link.unique_field(),
                    "external identity already linked to another user",
                ));
            Ok(())
        })?;
        user.require_human()?
            .external_idp(link)
            .cloned()
            .ok_or_else(|| DomainError::internal("external idp missing after push"))
    }

    pub fn remove_external_idp(
        &self,
        ctx: &Context,
        user_id: &str,
        link: &ExternalIdp,
    ) -> DomainResult<User> {
        if !link.is_valid() {
            return Err(DomainError::precondition_failed("invalid external idp"));
        }
        self.execute(ctx, user_id, |agg, user| {
            append_external_idp_removal(agg, user, link, false)
        })
    }

    /// Builds the unlink of `link` without pushing it, so it can join the
    /// push of the IDP config or provider removal that caused it.
    pub fn prepare_remove_external_idp(
        &self,
        ctx: &Context,
        user_id: &str,
        link: &ExternalIdp,
        cascade: bool,
    ) -> DomainResult<Aggregate> {
        if !link.is_valid() {
            return Err(DomainError::precondition_failed("invalid external idp"));
        }
        let user = self.user_by_id(ctx, user_id)?;
        let mut aggregate = self.aggregate(ctx, &user)?;
        append_external_idp_removal(&mut aggregate, &user, link, cascade)?;
        Ok(aggregate)
    }

    /// Every current link to `idp_config_id`, across all users.
    pub fn external_idps_by_idp_config(
        &self,
        ctx: &Context,
        idp_config_id: &str,
    ) -> DomainResult<Vec<LinkedExternalIdp>> {
        if idp_config_id.is_empty() {
            return Err(DomainError::precondition_failed("idp config id missing"));
        }
        let query = SearchQuery::new()
            .aggregate_type_filter([USER_AGGREGATE])
            .event_types_filter([EXTERNAL_IDP_ADDED])
            .order_asc();
        let mut user_ids: Vec<String> = Vec::new();
        for event in self.eventstore.filter_events(ctx, &query)? {
            let added: ExternalIdp = event.decode()?;
            if added.idp_config_id == idp_config_id && !user_ids.contains(&event.aggregate_id) {
                user_ids.push(event.aggregate_id);
            }
        }

        let mut links = Vec::new();
        for user_id in user_ids {
            let user = self.user_by_id(ctx, &user_id)?;
            let Some(human) = user.human() else {
                continue;
            };
            links.extend(
                human
                    .external_idps
                    .iter()
                    .filter(|link| link.idp_config_id == idp_config_id)
                    .map(|link| LinkedExternalIdp {
                        user_id: user_id.clone(),
                        resource_owner: user.root.resource_owner.clone(),
                        link: link.clone(),
                    }),
            );
        }
        Ok(links)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Machine keys
    // ─────────────────────────────────────────────────────────────────────────

    /// Registers a key for a machine user. Without an expiration the key
    /// is valid until 9999-01-01.
    pub fn add_machine_key(
        &self,
        ctx: &Context,
        user_id: &str,
        key_type: MachineKeyType,
        expiration_date: Option<DateTime<Utc>>,
    ) -> DomainResult<MachineKey> {
        let expiration_date = match expiration_date {
            Some(date) => date,
            None => default_key_expiration()?,
        };
        if expiration_date < Utc::now() {
            return Err(DomainError::invalid_argument(
                "key expiration date is in the past",
            ));
        }
        let key = MachineKey {
            key_id: self.id_generator.next_id()?,
            key_type,
            expiration_date,
        };
        let user = self.execute(ctx, user_id, |agg, user| {
            user.require_machine()?;
            agg.append_event(MACHINE_KEY_ADDED, &key)?;
            Ok(())
        })?;
        user.require_machine()?
            .key(&key.key_id)
            .cloned()
            .ok_or_else(|| DomainError::internal("machine key missing after push"))
    }

    pub fn remove_machine_key(&self, ctx: &Context, user_id: &str, key_id: &str) -> DomainResult<User> {
        if key_id.is_empty() {
            return Err(DomainError::precondition_failed("key id missing"));
        }
        self.execute(ctx, user_id, |agg, user| {
            if user.require_machine()?.key(key_id).is_none() {
                return Err(DomainError::not_found(format!("machine key {key_id} not found")));
            }
            agg.append_event(
                MACHINE_KEY_REMOVED,
                &KeyId {
                    key_id: key_id.to_string(),
                },
            )?;
            Ok(())
        })
    }

    // ─────────────────────────────────────────────────────────────────────────
    // History and sessions
    // ─────────────────────────────────────────────────────────────────────────

    pub fn user_changes(
        &self,
        ctx: &Context,
        user_id: &str,
        last_sequence: u64,
        limit: u64,
        sort_ascending: bool,
    ) -> DomainResult<Changes> {
        let query = changes_query(USER_AGGREGATE, user_id, last_sequence, limit, sort_ascending);
        let events = self.eventstore.filter_events(ctx, &query)?;
        changes_from_events(&events, last_sequence, limit, sort_ascending)
    }

    /// Records the end of every session of `user_ids` on the user agent in one push.
    pub fn sign_out(&self, ctx: &Context, agent_id: &str, user_ids: &[&str]) -> DomainResult<()> {
        if agent_id.is_empty() || user_ids.is_empty() {
            return Err(DomainError::precondition_failed("agent id and users required"));
        }
        let users = user_ids
            .iter()
            .map(|id| self.user_by_id(ctx, id))
            .collect::<DomainResult<Vec<_>>>()?;
        let sign_outs: Vec<UserSignOut<'_>> = users
            .iter()
            .map(|user| UserSignOut { user, agent_id })
            .collect();
        let structs: Vec<&dyn AggregateStruct> = sign_outs
            .iter()
            .map(|s| s as &dyn AggregateStruct)
            .collect();
        let events = self.eventstore.push_aggregate_structs(ctx, &structs)?;
        debug!(agent_id, users = users.len(), events = events.len(), "users signed out");
        Ok(())
    }
}

/// Sign-out of one user, written on behalf of the user itself.
struct UserSignOut<'a> {
    user: &'a User,
    agent_id: &'a str,
}

impl AggregateStruct for UserSignOut<'_> {
    fn to_aggregate(&self, ctx: &Context, creator: &AggregateCreator) -> DomainResult<Aggregate> {
        let root = &self.user.root;
        let mut aggregate = creator.new_aggregate(
            ctx,
            &root.aggregate_id,
            USER_AGGREGATE,
            USER_VERSION,
            root.sequence,
            &[
                AggregateOption::OverwriteResourceOwner(root.resource_owner.clone()),
                AggregateOption::OverwriteEditorUser(root.aggregate_id.clone()),
            ],
        )?;
        aggregate.append_event(
            SIGNED_OUT,
            &SignedOut {
                user_agent_id: self.agent_id.to_string(),
            },
        )?;
        Ok(aggregate)
    }
}
