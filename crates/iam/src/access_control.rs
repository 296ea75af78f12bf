//! Members, IDP configurations and the login policy.
//!
//! The IAM and every org carry the same access-control state. Only the event
//! tags differ, so the fold rules are written once against
//! [`HasAccessControl`] and registered per aggregate with its
//! [`AccessControlEvents`].

use serde::{Deserialize, Serialize};

use warden_core::DomainResult;
use warden_events::{Event, Reducers};

/// Event tags of one aggregate type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessControlEvents {
    pub aggregate_type: &'static str,
    pub member_added: &'static str,
    pub member_changed: &'static str,
    pub member_removed: &'static str,
    pub idp_config_added: &'static str,
    pub idp_config_changed: &'static str,
    pub idp_config_removed: &'static str,
    pub idp_config_deactivated: &'static str,
    pub idp_config_reactivated: &'static str,
    pub oidc_config_added: &'static str,
    pub oidc_config_changed: &'static str,
    pub login_policy_added: &'static str,
    pub login_policy_changed: &'static str,
    pub login_policy_removed: &'static str,
    pub idp_provider_added: &'static str,
    pub idp_provider_removed: &'static str,
    pub idp_provider_cascade_removed: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Member {
    pub user_id: String,
    pub roles: Vec<String>,
}

impl Member {
    pub fn new<I, R>(user_id: impl Into<String>, roles: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<String>,
    {
        Self {
            user_id: user_id.into(),
            roles: roles.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_valid(&self) -> bool {
        !self.user_id.is_empty() && !self.roles.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct MemberId {
    pub user_id: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum IdpConfigState {
    #[default]
    Active,
    Inactive,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum IdpStylingType {
    #[default]
    Unspecified,
    Google,
}

/// Which claim of the external IDP fills a local field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OidcMappingField {
    #[default]
    Unspecified,
    PreferredUsername,
    Email,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OidcIdpConfig {
    pub idp_config_id: String,
    pub client_id: String,
    /// Stored as handed in; callers encrypt before building the command.
    #[serde(default)]
    pub client_secret: String,
    pub issuer: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub idp_display_name_mapping: OidcMappingField,
    #[serde(default)]
    pub username_mapping: OidcMappingField,
}

impl OidcIdpConfig {
    pub fn is_valid(&self) -> bool {
        !self.client_id.is_empty() && !self.issuer.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdpConfig {
    pub idp_config_id: String,
    pub name: String,
    #[serde(default)]
    pub styling_type: IdpStylingType,
    #[serde(default)]
    pub state: IdpConfigState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oidc_config: Option<OidcIdpConfig>,
}

impl IdpConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_oidc(mut self, oidc: OidcIdpConfig) -> Self {
        self.oidc_config = Some(oidc);
        self
    }

    pub fn is_valid(&self) -> bool {
        !self.name.is_empty() && self.oidc_config.as_ref().is_none_or(OidcIdpConfig::is_valid)
    }
}

/// The fields of an IDP config a change event may touch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct IdpConfigFields<'a> {
    pub name: &'a str,
    pub styling_type: IdpStylingType,
}

impl<'a> From<&'a IdpConfig> for IdpConfigFields<'a> {
    fn from(config: &'a IdpConfig) -> Self {
        Self {
            name: &config.name,
            styling_type: config.styling_type,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct IdpConfigId {
    pub idp_config_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IdpConfigChange {
    idp_config_id: String,
    name: Option<String>,
    styling_type: Option<IdpStylingType>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OidcConfigChange {
    idp_config_id: String,
    client_id: Option<String>,
    client_secret: Option<String>,
    issuer: Option<String>,
    scopes: Option<Vec<String>>,
    idp_display_name_mapping: Option<OidcMappingField>,
    username_mapping: Option<OidcMappingField>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum IdpProviderType {
    /// Configured on the IAM and shared with every org.
    #[default]
    System,
    Org,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdpProvider {
    pub idp_config_id: String,
    #[serde(rename = "idpProviderType", default)]
    pub provider_type: IdpProviderType,
}

impl IdpProvider {
    pub fn new(idp_config_id: impl Into<String>, provider_type: IdpProviderType) -> Self {
        Self {
            idp_config_id: idp_config_id.into(),
            provider_type,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginPolicy {
    pub allow_username_password: bool,
    pub allow_register: bool,
    pub allow_external_idp: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub idp_providers: Vec<IdpProvider>,
}

impl LoginPolicy {
    pub fn new(allow_username_password: bool, allow_register: bool, allow_external_idp: bool) -> Self {
        Self {
            allow_username_password,
            allow_register,
            allow_external_idp,
            idp_providers: Vec::new(),
        }
    }

    /// The flags alone, as carried by added/changed events.
    pub(crate) fn flags(&self) -> Self {
        Self::new(
            self.allow_username_password,
            self.allow_register,
            self.allow_external_idp,
        )
    }

    pub fn idp_provider(&self, idp_config_id: &str) -> Option<&IdpProvider> {
        self.idp_providers
            .iter()
            .find(|p| p.idp_config_id == idp_config_id)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginPolicyChange {
    allow_username_password: Option<bool>,
    allow_register: Option<bool>,
    allow_external_idp: Option<bool>,
}

/// Access-control state folded from events.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessControl {
    pub members: Vec<Member>,
    pub idp_configs: Vec<IdpConfig>,
    pub login_policy: Option<LoginPolicy>,
}

impl AccessControl {
    pub fn member(&self, user_id: &str) -> Option<&Member> {
        self.members.iter().find(|m| m.user_id == user_id)
    }

    pub fn idp_config(&self, idp_config_id: &str) -> Option<&IdpConfig> {
        self.idp_configs
            .iter()
            .find(|c| c.idp_config_id == idp_config_id)
    }

    pub fn idp_provider(&self, idp_config_id: &str) -> Option<&IdpProvider> {
        self.login_policy
            .as_ref()
            .and_then(|p| p.idp_provider(idp_config_id))
    }

    fn idp_config_mut(&mut self, idp_config_id: &str) -> Option<&mut IdpConfig> {
        self.idp_configs
            .iter_mut()
            .find(|c| c.idp_config_id == idp_config_id)
    }

    fn remove_provider(&mut self, idp_config_id: &str) {
        if let Some(policy) = self.login_policy.as_mut() {
            policy.idp_providers.retain(|p| p.idp_config_id != idp_config_id);
        }
    }
}

/// Entities embedding [`AccessControl`].
pub trait HasAccessControl {
    fn access_control(&self) -> &AccessControl;
    fn access_control_mut(&mut self) -> &mut AccessControl;
}

impl AccessControlEvents {
    /// Registers the shared fold rules under this aggregate's tags.
    pub fn register<S: HasAccessControl>(&self, reducers: Reducers<S>) -> Reducers<S> {
        reducers
            .on(self.member_added, fold_member_added::<S>)
            .on(self.member_changed, fold_member_changed::<S>)
            .on(self.member_removed, fold_member_removed::<S>)
            .on(self.idp_config_added, fold_idp_config_added::<S>)
            .on(self.idp_config_changed, fold_idp_config_changed::<S>)
            .on(self.idp_config_removed, fold_idp_config_removed::<S>)
            .on(self.idp_config_deactivated, fold_idp_config_deactivated::<S>)
            .on(self.idp_config_reactivated, fold_idp_config_reactivated::<S>)
            .on(self.oidc_config_added, fold_oidc_config_added::<S>)
            .on(self.oidc_config_changed, fold_oidc_config_changed::<S>)
            .on(self.login_policy_added, fold_login_policy_added::<S>)
            .on(self.login_policy_changed, fold_login_policy_changed::<S>)
            .on(self.login_policy_removed, fold_login_policy_removed::<S>)
            .on(self.idp_provider_added, fold_idp_provider_added::<S>)
            .on(self.idp_provider_removed, fold_idp_provider_removed::<S>)
            .on(self.idp_provider_cascade_removed, fold_idp_provider_removed::<S>)
    }

    pub fn all(&self) -> [&'static str; 16] {
        [
            self.member_added,
            self.member_changed,
            self.member_removed,
            self.idp_config_added,
            self.idp_config_changed,
            self.idp_config_removed,
            self.idp_config_deactivated,
            self.idp_config_reactivated,
            self.oidc_config_added,
            self.oidc_config_changed,
            self.login_policy_added,
            self.login_policy_changed,
            self.login_policy_removed,
            self.idp_provider_added,
            self.idp_provider_removed,
            self.idp_provider_cascade_removed,
        ]
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Fold rules
// ─────────────────────────────────────────────────────────────────────────────

fn fold_member_added<S: HasAccessControl>(state: &mut S, event: &Event) -> DomainResult<()> {
    let member: Member = event.decode()?;
    let access = state.access_control_mut();
    access.members.retain(|m| m.user_id != member.user_id);
    access.members.push(member);
    Ok(())
}

fn fold_member_changed<S: HasAccessControl>(state: &mut S, event: &Event) -> DomainResult<()> {
    let changed: Member = event.decode()?;
    if let Some(member) = state
        .access_control_mut()
        .members
        .iter_mut()
        .find(|m| m.user_id == changed.user_id)
    {
        member.roles = changed.roles;
    }
    Ok(())
}

fn fold_member_removed<S: HasAccessControl>(state: &mut S, event: &Event) -> DomainResult<()> {
    let removed: MemberId = event.decode()?;
    state
        .access_control_mut()
        .members
        .retain(|m| m.user_id != removed.user_id);
    Ok(())
}

fn fold_idp_config_added<S: HasAccessControl>(state: &mut S, event: &Event) -> DomainResult<()> {
    let mut config: IdpConfig = event.decode()?;
    config.state = IdpConfigState::Active;
    let access = state.access_control_mut();
    access
        .idp_configs
        .retain(|c| c.idp_config_id != config.idp_config_id);
    access.idp_configs.push(config);
    Ok(())
}

fn fold_idp_config_changed<S: HasAccessControl>(state: &mut S, event: &Event) -> DomainResult<()> {
    let change: IdpConfigChange = event.decode()?;
    if let Some(config) = state.access_control_mut().idp_config_mut(&change.idp_config_id) {
        if let Some(name) = change.name {
            config.name = name;
        }
        if let Some(styling_type) = change.styling_type {
            config.styling_type = styling_type;
        }
    }
    Ok(())
}

fn fold_idp_config_removed<S: HasAccessControl>(state: &mut S, event: &Event) -> DomainResult<()> {
    let removed: IdpConfigId = event.decode()?;
    state
        .access_control_mut()
        .idp_configs
        .retain(|c| c.idp_config_id != removed.idp_config_id);
    Ok(())
}

fn set_idp_state<S: HasAccessControl>(
    state: &mut S,
    event: &Event,
    new_state: IdpConfigState,
) -> DomainResult<()> {
    let target: IdpConfigId = event.decode()?;
    if let Some(config) = state.access_control_mut().idp_config_mut(&target.idp_config_id) {
        config.state = new_state;
    }
    Ok(())
}

fn fold_idp_config_deactivated<S: HasAccessControl>(
    state: &mut S,
    event: &Event,
) -> DomainResult<()> {
    set_idp_state(state, event, IdpConfigState::Inactive)
}

fn fold_idp_config_reactivated<S: HasAccessControl>(
    state: &mut S,
    event: &Event,
) -> DomainResult<()> {
    set_idp_state(state, event, IdpConfigState::Active)
}

fn fold_oidc_config_added<S: HasAccessControl>(state: &mut S, event: &Event) -> DomainResult<()> {
    let oidc: OidcIdpConfig = event.decode()?;
    if let Some(config) = state.access_control_mut().idp_config_mut(&oidc.idp_config_id) {
        config.oidc_config = Some(oidc);
    }
    Ok(())
}

fn fold_oidc_config_changed<S: HasAccessControl>(
    state: &mut S,
    event: &Event,
) -> DomainResult<()> {
    let change: OidcConfigChange = event.decode()?;
    let Some(oidc) = state
        .access_control_mut()
        .idp_config_mut(&change.idp_config_id)
        .and_then(|c| c.oidc_config.as_mut())
    else {
        return Ok(());
    };
    if let Some(client_id) = change.client_id {
        oidc.client_id = client_id;
    }
    if let Some(client_secret) = change.client_secret {
        oidc.client_secret = client_secret;
    }
    if let Some(issuer) = change.issuer {
        oidc.issuer = issuer;
    }
    if let Some(scopes) = change.scopes {
        oidc.scopes = scopes;
    }
    if let Some(mapping) = change.idp_display_name_mapping {
        oidc.idp_display_name_mapping = mapping;
    }
    if let Some(mapping) = change.username_mapping {
        oidc.username_mapping = mapping;
    }
    Ok(())
}

fn fold_login_policy_added<S: HasAccessControl>(
    state: &mut S,
    event: &Event,
) -> DomainResult<()> {
    let policy: LoginPolicy = event.decode()?;
    state.access_control_mut().login_policy = Some(policy.flags());
    Ok(())
}

fn fold_login_policy_changed<S: HasAccessControl>(
    state: &mut S,
    event: &Event,
) -> DomainResult<()> {
    let change: LoginPolicyChange = event.decode()?;
    if let Some(policy) = state.access_control_mut().login_policy.as_mut() {
        if let Some(v) = change.allow_username_password {
            policy.allow_username_password = v;
        }
        if let Some(v) = change.allow_register {
            policy.allow_register = v;
        }
        if let Some(v) = change.allow_external_idp {
            policy.allow_external_idp = v;
        }
    }
    Ok(())
}

fn fold_login_policy_removed<S: HasAccessControl>(
    state: &mut S,
    _event: &Event,
) -> DomainResult<()> {
    state.access_control_mut().login_policy = None;
    Ok(())
}

fn fold_idp_provider_added<S: HasAccessControl>(
    state: &mut S,
    event: &Event,
) -> DomainResult<()> {
    let provider: IdpProvider = event.decode()?;
    if let Some(policy) = state.access_control_mut().login_policy.as_mut() {
        policy
            .idp_providers
            .retain(|p| p.idp_config_id != provider.idp_config_id);
        policy.idp_providers.push(provider);
    }
    Ok(())
}

fn fold_idp_provider_removed<S: HasAccessControl>(
    state: &mut S,
    event: &Event,
) -> DomainResult<()> {
    let removed: IdpConfigId = event.decode()?;
    state.access_control_mut().remove_provider(&removed.idp_config_id);
    Ok(())
}
