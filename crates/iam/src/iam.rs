//! The IAM: the singleton aggregate owning instance-wide settings.

use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

use warden_core::DomainResult;
use warden_events::{Event, EventSourced, ObjectRoot, Reducers, SearchQuery};

use crate::access_control::{AccessControl, AccessControlEvents, HasAccessControl};

pub const IAM_AGGREGATE: &str = "iam";
pub const IAM_VERSION: &str = "v1";

pub const SETUP_STARTED: &str = "iam.setup.started";
pub const SETUP_DONE: &str = "iam.setup.done";
pub const GLOBAL_ORG_SET: &str = "iam.global.org.set";
pub const IAM_PROJECT_SET: &str = "iam.project.iam.set";

pub const IAM_ACCESS_EVENTS: AccessControlEvents = AccessControlEvents {
    aggregate_type: IAM_AGGREGATE,
    member_added: "iam.member.added",
    member_changed: "iam.member.changed",
    member_removed: "iam.member.removed",
    idp_config_added: "iam.idp.config.added",
    idp_config_changed: "iam.idp.config.changed",
    idp_config_removed: "iam.idp.config.removed",
    idp_config_deactivated: "iam.idp.config.deactivated",
    idp_config_reactivated: "iam.idp.config.reactivated",
    oidc_config_added: "iam.idp.oidc.config.added",
    oidc_config_changed: "iam.idp.oidc.config.changed",
    login_policy_added: "iam.policy.login.added",
    login_policy_changed: "iam.policy.login.changed",
    login_policy_removed: "iam.policy.login.removed",
    idp_provider_added: "iam.policy.login.idpprovider.added",
    idp_provider_removed: "iam.policy.login.idpprovider.removed",
    idp_provider_cascade_removed: "iam.policy.login.idpprovider.cascade.removed",
};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GlobalOrgSet {
    pub global_org_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct IamProjectSet {
    pub iam_project_id: String,
}

/// Folded IAM state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Iam {
    pub root: ObjectRoot,
    pub setup_started: bool,
    pub setup_done: bool,
    pub global_org_id: String,
    pub iam_project_id: String,
    pub access: AccessControl,
}

impl Iam {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            root: ObjectRoot::new(id),
            ..Self::default()
        }
    }
}

/// Events of the IAM with a sequence above `latest_sequence`.
pub fn iam_by_id_query(id: &str, latest_sequence: u64) -> SearchQuery {
    SearchQuery::new()
        .aggregate_type_filter([IAM_AGGREGATE])
        .aggregate_id_filter([id])
        .latest_sequence_filter(latest_sequence)
}

fn iam_reducers() -> &'static Reducers<Iam> {
    static REDUCERS: OnceLock<Reducers<Iam>> = OnceLock::new();
    REDUCERS.get_or_init(|| {
        let reducers = Reducers::new()
            .on(SETUP_STARTED, |iam: &mut Iam, _| {
                iam.setup_started = true;
                Ok(())
            })
            .on(SETUP_DONE, |iam: &mut Iam, _| {
                iam.setup_done = true;
                Ok(())
            })
            .on(GLOBAL_ORG_SET, |iam: &mut Iam, e| {
                iam.global_org_id = e.decode::<GlobalOrgSet>()?.global_org_id;
                Ok(())
            })
            .on(IAM_PROJECT_SET, |iam: &mut Iam, e| {
                iam.iam_project_id = e.decode::<IamProjectSet>()?.iam_project_id;
                Ok(())
            });
        IAM_ACCESS_EVENTS.register(reducers)
    })
}

impl HasAccessControl for Iam {
    fn access_control(&self) -> &AccessControl {
        &self.access
    }

    fn access_control_mut(&mut self) -> &mut AccessControl {
        &mut self.access
    }
}

impl EventSourced for Iam {
    fn root(&self) -> &ObjectRoot {
        &self.root
    }

    fn root_mut(&mut self) -> &mut ObjectRoot {
        &mut self.root
    }

    fn reduce(&mut self, event: &Event) -> DomainResult<()> {
        iam_reducers().reduce(self, event).map(|_| ())
    }
}
