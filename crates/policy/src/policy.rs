use std::fmt::Debug;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use warden_core::{DomainResult, apply_changes};
use warden_events::{Event, EventSourced, ObjectRoot, SearchQuery};

use crate::kinds::PolicyDefaults;

/// A kind of policy stored as its own aggregate type, keyed by org id.
pub trait PolicyKind:
    Serialize + DeserializeOwned + Clone + PartialEq + Debug + Send + Sync + 'static
{
    const AGGREGATE_TYPE: &'static str;
    const ADDED: &'static str;
    const CHANGED: &'static str;

    /// Applies when the org never added its own policy of this kind.
    fn fallback(defaults: &PolicyDefaults) -> Self;

    /// Checks description and numeric invariants.
    fn validate(&self) -> DomainResult<()>;
}

/// Folded policy of one org.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Policy<P> {
    pub root: ObjectRoot,
    pub policy: P,
    /// `true` while the instance default is in effect.
    pub is_default: bool,
}

impl<P: PolicyKind> Policy<P> {
    pub fn new(org_id: impl Into<String>, defaults: &PolicyDefaults) -> Self {
        Self {
            root: ObjectRoot::new(org_id),
            policy: P::fallback(defaults),
            is_default: true,
        }
    }
}

pub fn policy_query<P: PolicyKind>(org_id: &str, latest_sequence: u64) -> SearchQuery {
    SearchQuery::new()
        .aggregate_type_filter([P::AGGREGATE_TYPE])
        .aggregate_id_filter([org_id])
        .latest_sequence_filter(latest_sequence)
}

impl<P: PolicyKind> EventSourced for Policy<P> {
    fn root(&self) -> &ObjectRoot {
        &self.root
    }

    fn root_mut(&mut self) -> &mut ObjectRoot {
        &mut self.root
    }

    // Two event types per kind; a table would be one entry per const.
    fn reduce(&mut self, event: &Event) -> DomainResult<()> {
        if event.is(P::ADDED) {
            self.policy = event.decode()?;
            self.is_default = false;
        } else if event.is(P::CHANGED) {
            let delta = event.payload.clone().unwrap_or_default();
            self.policy = apply_changes(&self.policy, &delta)?;
        }
        Ok(())
    }
}
