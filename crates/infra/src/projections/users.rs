//! Flat user rows for listing and lookup by user name.

use std::sync::OnceLock;

use anyhow::bail;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use warden_core::{DomainResult, apply_changes};
use warden_events::{Event, Reducers};
use warden_user::user::{
    EMAIL_CHANGED, EMAIL_VERIFIED, HUMAN_ADDED, MACHINE_ADDED, MACHINE_CHANGED, PHONE_CHANGED,
    PHONE_REMOVED, PHONE_VERIFIED, PROFILE_CHANGED, USER_DEACTIVATED, USER_LOCKED,
    USER_REACTIVATED, USER_UNLOCKED,
};
use warden_user::{Human, Machine, Profile, USER_AGGREGATE, UserState};

use crate::read_model::ViewStore;
use crate::spooler::ViewHandler;

pub const USERS_VIEW: &str = "users";

// ─────────────────────────────────────────────────────────────────────────────
// Read Model
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum UserType {
    #[default]
    Human,
    Machine,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserView {
    pub user_id: String,
    pub resource_owner: String,
    pub user_name: String,
    pub state: UserState,
    pub user_type: UserType,
    /// Human users only.
    pub profile: Option<Profile>,
    pub email: String,
    pub is_email_verified: bool,
    pub phone: String,
    pub is_phone_verified: bool,
    /// Machine users only.
    pub machine_name: String,
    pub machine_description: String,
    pub sequence: u64,
    pub creation_date: Option<DateTime<Utc>>,
    pub change_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HumanAdded {
    user_name: String,
    human: Human,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MachineAdded {
    user_name: String,
    machine: Machine,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MachineChange {
    name: Option<String>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EmailChanged {
    email: String,
}

#[derive(Debug, Deserialize)]
struct PhoneChanged {
    phone: String,
}

fn view_reducers() -> &'static Reducers<UserView> {
    static REDUCERS: OnceLock<Reducers<UserView>> = OnceLock::new();
    REDUCERS.get_or_init(|| {
        Reducers::new()
            .on(HUMAN_ADDED, |row: &mut UserView, e| {
                let added: HumanAdded = e.decode()?;
                row.user_type = UserType::Human;
                row.user_name = added.user_name;
                row.email = added.human.email.email;
                row.is_email_verified = added.human.email.verified;
                if let Some(phone) = added.human.phone {
                    row.phone = phone.phone;
                    row.is_phone_verified = phone.verified;
                }
                row.profile = Some(added.human.profile);
                Ok(())
            })
            .on(MACHINE_ADDED, |row: &mut UserView, e| {
                let added: MachineAdded = e.decode()?;
                row.user_type = UserType::Machine;
                row.user_name = added.user_name;
                row.machine_name = added.machine.name;
                row.machine_description = added.machine.description;
                Ok(())
            })
            .on(MACHINE_CHANGED, |row: &mut UserView, e| {
                let change: MachineChange = e.decode()?;
                if let Some(name) = change.name {
                    row.machine_name = name;
                }
                if let Some(description) = change.description {
                    row.machine_description = description;
                }
                Ok(())
            })
            .on(PROFILE_CHANGED, fold_profile_changed)
            .on(EMAIL_CHANGED, |row: &mut UserView, e| {
                let changed: EmailChanged = e.decode()?;
                row.email = changed.email;
                row.is_email_verified = false;
                Ok(())
            })
            .on(EMAIL_VERIFIED, |row: &mut UserView, _| {
                row.is_email_verified = true;
                Ok(())
            })
            .on(PHONE_CHANGED, |row: &mut UserView, e| {
                let changed: PhoneChanged = e.decode()?;
                row.phone = changed.phone;
                row.is_phone_verified = false;
                Ok(())
            })
            .on(PHONE_VERIFIED, |row: &mut UserView, _| {
                row.is_phone_verified = true;
                Ok(())
            })
            .on(PHONE_REMOVED, |row: &mut UserView, _| {
                row.phone.clear();
                row.is_phone_verified = false;
                Ok(())
            })
            .on(USER_DEACTIVATED, |row: &mut UserView, _| {
                row.state = UserState::Inactive;
                Ok(())
            })
            .on(USER_LOCKED, |row: &mut UserView, _| {
                row.state = UserState::Locked;
                Ok(())
            })
            .on(USER_REACTIVATED, |row: &mut UserView, _| {
                row.state = UserState::Active;
                Ok(())
            })
            .on(USER_UNLOCKED, |row: &mut UserView, _| {
                row.state = UserState::Active;
                Ok(())
            })
    })
}

fn fold_profile_changed(row: &mut UserView, event: &Event) -> DomainResult<()> {
    let delta = event.payload.clone().unwrap_or_default();
    let current = row.profile.take().unwrap_or_default();
    row.profile = Some(apply_changes(&current, &delta)?);
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// View
// ─────────────────────────────────────────────────────────────────────────────

/// Keeps one row per user, keyed by user id.
pub struct UsersView<S> {
    store: S,
}

impl<S> UsersView<S>
where
    S: ViewStore<String, UserView>,
{
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn user_by_id(&self, user_id: &str) -> Option<UserView> {
        self.store.get(&user_id.to_string())
    }

    pub fn user_by_user_name(&self, user_name: &str) -> Option<UserView> {
        self.store
            .list()
            .into_iter()
            .find(|u| u.user_name == user_name)
    }

    pub fn users_by_resource_owner(&self, resource_owner: &str) -> Vec<UserView> {
        let mut users: Vec<_> = self
            .store
            .list()
            .into_iter()
            .filter(|u| u.resource_owner == resource_owner)
            .collect();
        users.sort_by(|a, b| a.user_name.cmp(&b.user_name));
        users
    }
}

impl<S> ViewHandler for UsersView<S>
where
    S: ViewStore<String, UserView>,
{
    fn view_model(&self) -> &str {
        USERS_VIEW
    }

    fn aggregate_types(&self) -> &[&'static str] {
        &[USER_AGGREGATE]
    }

    fn reduce(&self, event: &Event) -> anyhow::Result<()> {
        let reducers = view_reducers();
        if !reducers.handles(event.event_type.as_str()) {
            return Ok(());
        }

        let creates = event.is(HUMAN_ADDED) || event.is(MACHINE_ADDED);
        let mut row = match self.store.get(&event.aggregate_id) {
            Some(row) => row,
            None if creates => UserView {
                user_id: event.aggregate_id.clone(),
                resource_owner: event.resource_owner.clone(),
                creation_date: Some(event.creation_date),
                ..UserView::default()
            },
            None => bail!(
                "user {} not in view for {} (sequence {})",
                event.aggregate_id,
                event.event_type,
                event.sequence
            ),
        };

        reducers.reduce(&mut row, event)?;
        row.sequence = event.sequence;
        row.change_date = Some(event.creation_date);
        self.store.put(event.aggregate_id.clone(), row)?;
        Ok(())
    }
}
