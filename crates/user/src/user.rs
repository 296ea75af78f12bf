//! Users: humans with profile and contact data, machines with keys.

use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use warden_core::{DomainError, DomainResult, apply_changes};
use warden_events::{Event, EventSourced, ObjectRoot, Reducers, SearchQuery};

pub const USER_AGGREGATE: &str = "user";
pub const USER_VERSION: &str = "v1";

pub const HUMAN_ADDED: &str = "user.human.added";
pub const MACHINE_ADDED: &str = "user.machine.added";
pub const MACHINE_CHANGED: &str = "user.machine.changed";
pub const USER_DEACTIVATED: &str = "user.deactivated";
pub const USER_REACTIVATED: &str = "user.reactivated";
pub const USER_LOCKED: &str = "user.locked";
pub const USER_UNLOCKED: &str = "user.unlocked";
pub const PROFILE_CHANGED: &str = "user.human.profile.changed";
pub const EMAIL_CHANGED: &str = "user.human.email.changed";
pub const EMAIL_VERIFIED: &str = "user.human.email.verified";
pub const PHONE_CHANGED: &str = "user.human.phone.changed";
pub const PHONE_VERIFIED: &str = "user.human.phone.verified";
pub const PHONE_REMOVED: &str = "user.human.phone.removed";
pub const ADDRESS_CHANGED: &str = "user.human.address.changed";
pub const EXTERNAL_IDP_ADDED: &str = "user.human.externalidp.added";
pub const EXTERNAL_IDP_REMOVED: &str = "user.human.externalidp.removed";
/// The link was dropped because its IDP config or login-policy provider went away.
pub const EXTERNAL_IDP_CASCADE_REMOVED: &str = "user.human.externalidp.cascade.removed";
pub const MACHINE_KEY_ADDED: &str = "user.machine.key.added";
pub const MACHINE_KEY_REMOVED: &str = "user.machine.key.removed";
pub const SIGNED_OUT: &str = "user.human.signed.out";

/// Unique-claim namespace for user names, scoped per resource owner.
pub const UNIQUE_USER_NAME: &str = "user_name";
/// Unique-claim namespace for links to external identities.
pub const UNIQUE_EXTERNAL_IDP: &str = "external_idp";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum UserState {
    #[default]
    Active,
    Inactive,
    Locked,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub first_name: String,
    pub last_name: String,
    pub nick_name: String,
    pub display_name: String,
    pub preferred_language: String,
}

impl Profile {
    pub fn new(first_name: impl Into<String>, last_name: impl Into<String>) -> Self {
        Self {
            first_name: first_name.into(),
            last_name: last_name.into(),
            ..Self::default()
        }
    }

    pub fn is_valid(&self) -> bool {
        !self.first_name.is_empty() && !self.last_name.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Email {
    pub email: String,
    pub verified: bool,
}

impl Email {
    pub fn new(email: impl Into<String>, verified: bool) -> Self {
        Self {
            email: email.into(),
            verified,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Phone {
    pub phone: String,
    pub verified: bool,
}

impl Phone {
    pub fn new(phone: impl Into<String>, verified: bool) -> Self {
        Self {
            phone: phone.into(),
            verified,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Address {
    pub country: String,
    pub locality: String,
    pub postal_code: String,
    pub region: String,
    pub street_address: String,
}

/// Link between the user and an identity at an external IDP.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalIdp {
    pub idp_config_id: String,
    /// The user's id at the external IDP.
    pub external_user_id: String,
    pub display_name: String,
}

impl ExternalIdp {
    pub fn new(idp_config_id: impl Into<String>, external_user_id: impl Into<String>) -> Self {
        Self {
            idp_config_id: idp_config_id.into(),
            external_user_id: external_user_id.into(),
            display_name: String::new(),
        }
    }

    pub fn is_valid(&self) -> bool {
        !self.idp_config_id.is_empty() && !self.external_user_id.is_empty()
    }

    pub(crate) fn unique_field(&self) -> String {
        format!("{}|{}", self.idp_config_id, self.external_user_id)
    }

    fn same_link(&self, other: &ExternalIdp) -> bool {
        self.idp_config_id == other.idp_config_id && self.external_user_id == other.external_user_id
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MachineKeyType {
    #[default]
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineKey {
    pub key_id: String,
    pub key_type: MachineKeyType,
    pub expiration_date: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Human {
    pub profile: Profile,
    pub email: Email,
    pub phone: Option<Phone>,
    pub address: Address,
    pub external_idps: Vec<ExternalIdp>,
}

impl Human {
    pub fn new(profile: Profile, email: Email) -> Self {
        Self {
            profile,
            email,
            ..Self::default()
        }
    }

    pub fn is_valid(&self) -> bool {
        self.profile.is_valid() && !self.email.email.is_empty()
    }

    pub fn external_idp(&self, link: &ExternalIdp) -> Option<&ExternalIdp> {
        self.external_idps.iter().find(|idp| idp.same_link(link))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Machine {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub keys: Vec<MachineKey>,
}

impl Machine {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            keys: Vec::new(),
        }
    }

    pub fn key(&self, key_id: &str) -> Option<&MachineKey> {
        self.keys.iter().find(|k| k.key_id == key_id)
    }
}

/// Changeable machine fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct MachineFields {
    pub name: String,
    pub description: String,
}

impl From<&Machine> for MachineFields {
    fn from(machine: &Machine) -> Self {
        Self {
            name: machine.name.clone(),
            description: machine.description.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum UserKind {
    Human(Human),
    Machine(Machine),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct HumanAdded {
    pub user_name: String,
    pub human: Human,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct MachineAdded {
    pub user_name: String,
    pub machine: Machine,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct EmailChanged {
    pub email: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PhoneChanged {
    pub phone: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct KeyId {
    pub key_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SignedOut {
    pub user_agent_id: String,
}

/// Folded user state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub root: ObjectRoot,
    pub user_name: String,
    pub state: UserState,
    pub kind: Option<UserKind>,
}

impl User {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            root: ObjectRoot::new(id),
            ..Self::default()
        }
    }

    pub fn human(&self) -> Option<&Human> {
        match &self.kind {
            Some(UserKind::Human(human)) => Some(human),
            _ => None,
        }
    }

    pub fn machine(&self) -> Option<&Machine> {
        match &self.kind {
            Some(UserKind::Machine(machine)) => Some(machine),
            _ => None,
        }
    }

    pub(crate) fn require_human(&self) -> DomainResult<&Human> {
        self.human()
            .ok_or_else(|| DomainError::precondition_failed("user is not human"))
    }

    pub(crate) fn require_machine(&self) -> DomainResult<&Machine> {
        self.machine()
            .ok_or_else(|| DomainError::precondition_failed("user is not a machine"))
    }

    fn human_mut(&mut self) -> DomainResult<&mut Human> {
        match &mut self.kind {
            Some(UserKind::Human(human)) => Ok(human),
            _ => Err(DomainError::internal("human event on a non-human user")),
        }
    }

    fn machine_mut(&mut self) -> DomainResult<&mut Machine> {
        match &mut self.kind {
            Some(UserKind::Machine(machine)) => Ok(machine),
            _ => Err(DomainError::internal("machine event on a non-machine user")),
        }
    }
}

pub fn user_by_id_query(id: &str, latest_sequence: u64) -> SearchQuery {
    SearchQuery::new()
        .aggregate_type_filter([USER_AGGREGATE])
        .aggregate_id_filter([id])
        .latest_sequence_filter(latest_sequence)
}

fn fold_profile_changed(user: &mut User, event: &Event) -> DomainResult<()> {
    let delta = event.payload.clone().unwrap_or_default();
    let human = user.human_mut()?;
    human.profile = apply_changes(&human.profile, &delta)?;
    Ok(())
}

fn fold_address_changed(user: &mut User, event: &Event) -> DomainResult<()> {
    let delta = event.payload.clone().unwrap_or_default();
    let human = user.human_mut()?;
    human.address = apply_changes(&human.address, &delta)?;
    Ok(())
}

fn fold_machine_changed(user: &mut User, event: &Event) -> DomainResult<()> {
    let delta = event.payload.clone().unwrap_or_default();
    let machine = user.machine_mut()?;
    let fields = apply_changes(&MachineFields::from(&*machine), &delta)?;
    machine.name = fields.name;
    machine.description = fields.description;
    Ok(())
}

fn fold_external_idp_removed(user: &mut User, event: &Event) -> DomainResult<()> {
    let removed: ExternalIdp = event.decode()?;
    user.human_mut()?
        .external_idps
        .retain(|idp| !idp.same_link(&removed));
    Ok(())
}

fn user_reducers() -> &'static Reducers<User> {
    static REDUCERS: OnceLock<Reducers<User>> = OnceLock::new();
    REDUCERS.get_or_init(|| {
        Reducers::new()
            .on(HUMAN_ADDED, |user: &mut User, e| {
                let added: HumanAdded = e.decode()?;
                user.user_name = added.user_name;
                user.kind = Some(UserKind::Human(added.human));
                Ok(())
            })
            .on(MACHINE_ADDED, |user: &mut User, e| {
                let added: MachineAdded = e.decode()?;
                user.user_name = added.user_name;
                user.kind = Some(UserKind::Machine(added.machine));
                Ok(())
            })
            .on(MACHINE_CHANGED, fold_machine_changed)
            .on(USER_DEACTIVATED, |user: &mut User, _| {
                user.state = UserState::Inactive;
                Ok(())
            })
            .on(USER_LOCKED, |user: &mut User, _| {
                user.state = UserState::Locked;
                Ok(())
            })
            .on(USER_REACTIVATED, |user: &mut User, _| {
                user.state = UserState::Active;
                Ok(())
            })
            .on(USER_UNLOCKED, |user: &mut User, _| {
                user.state = UserState::Active;
                Ok(())
            })
            .on(PROFILE_CHANGED, fold_profile_changed)
            .on(EMAIL_CHANGED, |user: &mut User, e| {
                let changed: EmailChanged = e.decode()?;
                user.human_mut()?.email = Email::new(changed.email, false);
                Ok(())
            })
            .on(EMAIL_VERIFIED, |user: &mut User, _| {
                user.human_mut()?.email.verified = true;
                Ok(())
            })
            .on(PHONE_CHANGED, |user: &mut User, e| {
                let changed: PhoneChanged = e.decode()?;
                user.human_mut()?.phone = Some(Phone::new(changed.phone, false));
                Ok(())
            })
            .on(PHONE_VERIFIED, |user: &mut User, _| {
                if let Some(phone) = user.human_mut()?.phone.as_mut() {
                    phone.verified = true;
                }
                Ok(())
            })
            .on(PHONE_REMOVED, |user: &mut User, _| {
                user.human_mut()?.phone = None;
                Ok(())
            })
            .on(ADDRESS_CHANGED, fold_address_changed)
            .on(EXTERNAL_IDP_ADDED, |user: &mut User, e| {
                let added: ExternalIdp = e.decode()?;
                user.human_mut()?.external_idps.push(added);
                Ok(())
            })
            .on(EXTERNAL_IDP_REMOVED, fold_external_idp_removed)
            .on(EXTERNAL_IDP_CASCADE_REMOVED, fold_external_idp_removed)
            .on(MACHINE_KEY_ADDED, |user: &mut User, e| {
                let key: MachineKey = e.decode()?;
                user.machine_mut()?.keys.push(key);
                Ok(())
            })
            .on(MACHINE_KEY_REMOVED, |user: &mut User, e| {
                let removed: KeyId = e.decode()?;
                user.machine_mut()?.keys.retain(|k| k.key_id != removed.key_id);
                Ok(())
            })
            .on(SIGNED_OUT, |_: &mut User, _| Ok(()))
    })
}

impl EventSourced for User {
    fn root(&self) -> &ObjectRoot {
        &self.root
    }

    fn root_mut(&mut self) -> &mut ObjectRoot {
        &mut self.root
    }

    fn reduce(&mut self, event: &Event) -> DomainResult<()> {
        user_reducers().reduce(self, event).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn event(event_type: &str, sequence: u64, payload: Option<serde_json::Value>) -> Event {
        Event {
            id: uuid::Uuid::from_u128(u128::from(sequence)),
            sequence,
            previous_sequence: sequence.saturating_sub(1),
            event_type: event_type.into(),
            payload,
            aggregate_id: "user-1".into(),
            aggregate_type: USER_AGGREGATE.into(),
            aggregate_version: USER_VERSION.into(),
            editor_user: "admin".into(),
            editor_service: "management".into(),
            resource_owner: "org-1".into(),
            creation_date: Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, sequence as u32).unwrap(),
        }
    }

    fn human_history() -> Vec<Event> {
        vec![
            event(
                HUMAN_ADDED,
                1,
                Some(json!({
                    "userName": "arya",
                    "human": {
                        "profile": { "firstName": "Arya", "lastName": "Stark", "nickName": "",
                                     "displayName": "", "preferredLanguage": "en" },
                        "email": { "email": "arya@winterfell.north", "verified": false },
                        "phone": null,
                        "address": { "country": "", "locality": "", "postalCode": "",
                                     "region": "", "streetAddress": "" },
                        "externalIdps": []
                    }
                })),
            ),
            event(PROFILE_CHANGED, 2, Some(json!({ "nickName": "No One" }))),
            event(EMAIL_VERIFIED, 3, None),
            event(PHONE_CHANGED, 4, Some(json!({ "phone": "+41 79 000 00 00" }))),
            event(USER_LOCKED, 5, None),
        ]
    }

    #[test]
    fn human_history_folds_into_the_current_user() {
        let mut user = User::new("user-1");
        user.append_events(&human_history()).unwrap();

        let human = user.human().unwrap();
        assert_eq!(user.user_name, "arya");
        assert_eq!(user.state, UserState::Locked);
        assert_eq!(human.profile.nick_name, "No One");
        assert_eq!(human.profile.first_name, "Arya");
        assert!(human.email.verified);
        assert_eq!(human.phone, Some(Phone::new("+41 79 000 00 00", false)));
        assert_eq!(user.root.sequence, 5);
        assert!(user.machine().is_none());
    }

    #[test]
    fn folding_twice_is_deterministic() {
        let mut first = User::new("user-1");
        let mut second = User::new("user-1");
        first.append_events(&human_history()).unwrap();
        second.append_events(&human_history()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn human_events_on_a_machine_are_rejected() {
        let mut user = User::new("user-1");
        user.append_events(&[event(
            MACHINE_ADDED,
            1,
            Some(json!({ "userName": "ci", "machine": { "name": "ci", "description": "" } })),
        )])
        .unwrap();
        let err = user
            .append_events(&[event(PHONE_REMOVED, 2, None)])
            .unwrap_err();
        assert!(err.is_internal());
        assert!(user.require_human().unwrap_err().is_precondition_failed());
    }
}
