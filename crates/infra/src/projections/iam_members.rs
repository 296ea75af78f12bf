//! Members of the IAM with their roles.

use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use warden_core::DomainResult;
use warden_events::{Event, Reducers};
use warden_iam::{IAM_ACCESS_EVENTS, IAM_AGGREGATE, Member};

use crate::read_model::ViewStore;
use crate::spooler::ViewHandler;

pub const IAM_MEMBERS_VIEW: &str = "iam_members";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IamMemberView {
    pub iam_id: String,
    pub user_id: String,
    pub roles: Vec<String>,
    pub sequence: u64,
    pub creation_date: DateTime<Utc>,
    pub change_date: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MemberKey {
    user_id: String,
}

/// Keyed by `(iam id, user id)`.
pub struct IamMembersView<S> {
    store: S,
}

impl<S> IamMembersView<S>
where
    S: ViewStore<(String, String), IamMemberView>,
{
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn member(&self, iam_id: &str, user_id: &str) -> Option<IamMemberView> {
        self.store.get(&(iam_id.to_string(), user_id.to_string()))
    }

    pub fn members(&self, iam_id: &str) -> Vec<IamMemberView> {
        let mut members: Vec<_> = self
            .store
            .list()
            .into_iter()
            .filter(|m| m.iam_id == iam_id)
            .collect();
        members.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        members
    }
}

fn view_reducers() -> &'static Reducers<IamMemberView> {
    static REDUCERS: OnceLock<Reducers<IamMemberView>> = OnceLock::new();
    REDUCERS.get_or_init(|| {
        Reducers::new()
            .on(IAM_ACCESS_EVENTS.member_added, fold_member)
            .on(IAM_ACCESS_EVENTS.member_changed, fold_member)
    })
}

fn fold_member(row: &mut IamMemberView, event: &Event) -> DomainResult<()> {
    let member: Member = event.decode()?;
    row.roles = member.roles;
    Ok(())
}

impl<S> ViewHandler for IamMembersView<S>
where
    S: ViewStore<(String, String), IamMemberView>,
{
    fn view_model(&self) -> &str {
        IAM_MEMBERS_VIEW
    }

    fn aggregate_types(&self) -> &[&'static str] {
        &[IAM_AGGREGATE]
    }

    fn reduce(&self, event: &Event) -> anyhow::Result<()> {
        if event.is(IAM_ACCESS_EVENTS.member_removed) {
            let removed: MemberKey = event.decode()?;
            self.store
                .delete(&(event.aggregate_id.clone(), removed.user_id))?;
            return Ok(());
        }
        let reducers = view_reducers();
        if !reducers.handles(event.event_type.as_str()) {
            return Ok(());
        }

        let target: MemberKey = event.decode()?;
        let key = (event.aggregate_id.clone(), target.user_id);
        let mut row = self.store.get(&key).unwrap_or_else(|| IamMemberView {
            iam_id: key.0.clone(),
            user_id: key.1.clone(),
            roles: Vec::new(),
            sequence: event.sequence,
            creation_date: event.creation_date,
            change_date: event.creation_date,
        });

        reducers.reduce(&mut row, event)?;
        row.sequence = event.sequence;
        row.change_date = event.creation_date;
        self.store.put(key, row)?;
        Ok(())
    }
}
