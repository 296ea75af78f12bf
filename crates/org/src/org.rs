//! Organisations: name, lifecycle, domains and their own access control.

use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

use warden_core::DomainResult;
use warden_events::{Event, EventSourced, ObjectRoot, Reducers, SearchQuery};
use warden_iam::{AccessControl, AccessControlEvents, HasAccessControl};

pub const ORG_AGGREGATE: &str = "org";
pub const ORG_VERSION: &str = "v1";

pub const ORG_ADDED: &str = "org.added";
pub const ORG_CHANGED: &str = "org.changed";
pub const ORG_DEACTIVATED: &str = "org.deactivated";
pub const ORG_REACTIVATED: &str = "org.reactivated";
pub const ORG_DOMAIN_ADDED: &str = "org.domain.added";
pub const ORG_DOMAIN_VERIFIED: &str = "org.domain.verified";
pub const ORG_DOMAIN_PRIMARY_SET: &str = "org.domain.primary.set";
pub const ORG_DOMAIN_REMOVED: &str = "org.domain.removed";

/// Unique-claim namespace for verified domains.
pub const UNIQUE_ORG_DOMAIN: &str = "org_domain";

pub const ORG_ACCESS_EVENTS: AccessControlEvents = AccessControlEvents {
    aggregate_type: ORG_AGGREGATE,
    member_added: "org.member.added",
    member_changed: "org.member.changed",
    member_removed: "org.member.removed",
    idp_config_added: "org.idp.config.added",
    idp_config_changed: "org.idp.config.changed",
    idp_config_removed: "org.idp.config.removed",
    idp_config_deactivated: "org.idp.config.deactivated",
    idp_config_reactivated: "org.idp.config.reactivated",
    oidc_config_added: "org.idp.oidc.config.added",
    oidc_config_changed: "org.idp.oidc.config.changed",
    login_policy_added: "org.policy.login.added",
    login_policy_changed: "org.policy.login.changed",
    login_policy_removed: "org.policy.login.removed",
    idp_provider_added: "org.policy.login.idpprovider.added",
    idp_provider_removed: "org.policy.login.idpprovider.removed",
    idp_provider_cascade_removed: "org.policy.login.idpprovider.cascade.removed",
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OrgState {
    #[default]
    Active,
    Inactive,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrgDomain {
    pub domain: String,
    pub verified: bool,
    pub primary: bool,
}

/// Changeable org fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct OrgFields {
    pub name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrgChange {
    name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct DomainPayload {
    pub domain: String,
}

/// Folded org state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Org {
    pub root: ObjectRoot,
    pub name: String,
    pub state: OrgState,
    pub domains: Vec<OrgDomain>,
    pub access: AccessControl,
}

impl Org {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            root: ObjectRoot::new(id),
            ..Self::default()
        }
    }

    pub fn domain(&self, domain: &str) -> Option<&OrgDomain> {
        self.domains.iter().find(|d| d.domain == domain)
    }

    pub fn primary_domain(&self) -> Option<&OrgDomain> {
        self.domains.iter().find(|d| d.primary)
    }

    fn domain_mut(&mut self, domain: &str) -> Option<&mut OrgDomain> {
        self.domains.iter_mut().find(|d| d.domain == domain)
    }
}

pub fn org_by_id_query(id: &str, latest_sequence: u64) -> SearchQuery {
    SearchQuery::new()
        .aggregate_type_filter([ORG_AGGREGATE])
        .aggregate_id_filter([id])
        .latest_sequence_filter(latest_sequence)
}

fn fold_domain_added(org: &mut Org, event: &Event) -> DomainResult<()> {
    let added: DomainPayload = event.decode()?;
    if org.domain(&added.domain).is_none() {
        org.domains.push(OrgDomain {
            domain: added.domain,
            ..OrgDomain::default()
        });
    }
    Ok(())
}

fn fold_domain_verified(org: &mut Org, event: &Event) -> DomainResult<()> {
    let verified: DomainPayload = event.decode()?;
    if let Some(domain) = org.domain_mut(&verified.domain) {
        domain.verified = true;
    }
    Ok(())
}

fn fold_domain_primary_set(org: &mut Org, event: &Event) -> DomainResult<()> {
    let primary: DomainPayload = event.decode()?;
    for domain in &mut org.domains {
        domain.primary = domain.domain == primary.domain;
    }
    Ok(())
}

fn fold_domain_removed(org: &mut Org, event: &Event) -> DomainResult<()> {
    let removed: DomainPayload = event.decode()?;
    org.domains.retain(|d| d.domain != removed.domain);
    Ok(())
}

fn org_reducers() -> &'static Reducers<Org> {
    static REDUCERS: OnceLock<Reducers<Org>> = OnceLock::new();
    REDUCERS.get_or_init(|| {
        let reducers = Reducers::new()
            .on(ORG_ADDED, |org: &mut Org, e| {
                org.name = e.decode::<OrgFields>()?.name;
                org.state = OrgState::Active;
                Ok(())
            })
            .on(ORG_CHANGED, |org: &mut Org, e| {
                if let Some(name) = e.decode::<OrgChange>()?.name {
                    org.name = name;
                }
                Ok(())
            })
            .on(ORG_DEACTIVATED, |org: &mut Org, _| {
                org.state = OrgState::Inactive;
                Ok(())
            })
            .on(ORG_REACTIVATED, |org: &mut Org, _| {
                org.state = OrgState::Active;
                Ok(())
            })
            .on(ORG_DOMAIN_ADDED, fold_domain_added)
            .on(ORG_DOMAIN_VERIFIED, fold_domain_verified)
            .on(ORG_DOMAIN_PRIMARY_SET, fold_domain_primary_set)
            .on(ORG_DOMAIN_REMOVED, fold_domain_removed);
        ORG_ACCESS_EVENTS.register(reducers)
    })
}

impl HasAccessControl for Org {
    fn access_control(&self) -> &AccessControl {
        &self.access
    }

    fn access_control_mut(&mut self) -> &mut AccessControl {
        &mut self.access
    }
}

impl EventSourced for Org {
    fn root(&self) -> &ObjectRoot {
        &self.root
    }

    fn root_mut(&mut self) -> &mut ObjectRoot {
        &mut self.root
    }

    fn reduce(&mut self, event: &Event) -> DomainResult<()> {
        org_reducers().reduce(self, event).map(|_| ())
    }
}
