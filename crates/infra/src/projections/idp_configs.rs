//! IDP configurations of the IAM and of every org in one table.

use std::sync::OnceLock;

use anyhow::bail;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use warden_core::{DomainError, DomainResult, apply_changes};
use warden_events::{Event, Reducers};
use warden_iam::{
    AccessControlEvents, IAM_ACCESS_EVENTS, IAM_AGGREGATE, IdpConfig, IdpConfigState,
    IdpProviderType, OidcIdpConfig,
};
use warden_org::{ORG_ACCESS_EVENTS, ORG_AGGREGATE};

use crate::read_model::ViewStore;
use crate::spooler::ViewHandler;

pub const IDP_CONFIGS_VIEW: &str = "idp_configs";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdpConfigView {
    pub config: IdpConfig,
    /// The IAM or org owning the configuration.
    pub aggregate_id: String,
    pub provider_type: IdpProviderType,
    pub sequence: u64,
    pub creation_date: DateTime<Utc>,
    pub change_date: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IdpConfigId {
    idp_config_id: String,
}

/// Keyed by IDP config id; ids are unique across IAM and orgs.
pub struct IdpConfigsView<S> {
    store: S,
}

impl<S> IdpConfigsView<S>
where
    S: ViewStore<String, IdpConfigView>,
{
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn idp_config_by_id(&self, idp_config_id: &str) -> Option<IdpConfigView> {
        self.store.get(&idp_config_id.to_string())
    }

    pub fn idp_configs_by_aggregate(&self, aggregate_id: &str) -> Vec<IdpConfigView> {
        let mut rows: Vec<_> = self
            .store
            .list()
            .into_iter()
            .filter(|row| row.aggregate_id == aggregate_id)
            .collect();
        rows.sort_by(|a, b| a.config.name.cmp(&b.config.name));
        rows
    }
}

fn access_tags(aggregate_type: &str) -> Option<(&'static AccessControlEvents, IdpProviderType)> {
    match aggregate_type {
        IAM_AGGREGATE => Some((&IAM_ACCESS_EVENTS, IdpProviderType::System)),
        ORG_AGGREGATE => Some((&ORG_ACCESS_EVENTS, IdpProviderType::Org)),
        _ => None,
    }
}

fn view_reducers() -> &'static Reducers<IdpConfigView> {
    static REDUCERS: OnceLock<Reducers<IdpConfigView>> = OnceLock::new();
    REDUCERS.get_or_init(|| {
        let reducers = register_row_folds(Reducers::new(), &IAM_ACCESS_EVENTS);
        register_row_folds(reducers, &ORG_ACCESS_EVENTS)
    })
}

fn register_row_folds(
    reducers: Reducers<IdpConfigView>,
    tags: &AccessControlEvents,
) -> Reducers<IdpConfigView> {
    reducers
        .on(tags.idp_config_added, |row: &mut IdpConfigView, e| {
            let mut config: IdpConfig = e.decode()?;
            config.state = IdpConfigState::Active;
            row.config = config;
            Ok(())
        })
        .on(tags.idp_config_changed, |row: &mut IdpConfigView, e| {
            row.config = apply_changes(&row.config, &payload(e))?;
            Ok(())
        })
        .on(tags.idp_config_deactivated, |row: &mut IdpConfigView, _| {
            row.config.state = IdpConfigState::Inactive;
            Ok(())
        })
        .on(tags.idp_config_reactivated, |row: &mut IdpConfigView, _| {
            row.config.state = IdpConfigState::Active;
            Ok(())
        })
        .on(tags.oidc_config_added, |row: &mut IdpConfigView, e| {
            row.config.oidc_config = Some(e.decode::<OidcIdpConfig>()?);
            Ok(())
        })
        .on(tags.oidc_config_changed, fold_oidc_config_changed)
}

fn payload(event: &Event) -> serde_json::Value {
    event.payload.clone().unwrap_or_default()
}

fn fold_oidc_config_changed(row: &mut IdpConfigView, event: &Event) -> DomainResult<()> {
    let oidc = row.config.oidc_config.as_ref().ok_or_else(|| {
        DomainError::precondition_failed(format!(
            "idp config {} has no oidc part",
            row.config.idp_config_id
        ))
    })?;
    row.config.oidc_config = Some(apply_changes(oidc, &payload(event))?);
    Ok(())
}

impl<S> ViewHandler for IdpConfigsView<S>
where
    S: ViewStore<String, IdpConfigView>,
{
    fn view_model(&self) -> &str {
        IDP_CONFIGS_VIEW
    }

    fn aggregate_types(&self) -> &[&'static str] {
        &[IAM_AGGREGATE, ORG_AGGREGATE]
    }

    fn reduce(&self, event: &Event) -> anyhow::Result<()> {
        let Some((tags, provider_type)) = access_tags(event.aggregate_type.as_str()) else {
            return Ok(());
        };

        if event.is(tags.idp_config_removed) {
            let target: IdpConfigId = event.decode()?;
            self.store.delete(&target.idp_config_id)?;
            return Ok(());
        }
        let reducers = view_reducers();
        if !reducers.handles(event.event_type.as_str()) {
            return Ok(());
        }

        let target: IdpConfigId = event.decode()?;
        let mut row = match self.store.get(&target.idp_config_id) {
            Some(row) => row,
            None if event.is(tags.idp_config_added) => IdpConfigView {
                config: IdpConfig::default(),
                aggregate_id: event.aggregate_id.clone(),
                provider_type,
                sequence: event.sequence,
                creation_date: event.creation_date,
                change_date: event.creation_date,
            },
            None => bail!(
                "idp config {} not in view for {} (sequence {})",
                target.idp_config_id,
                event.event_type,
                event.sequence
            ),
        };

        reducers.reduce(&mut row, event)?;
        row.sequence = event.sequence;
        row.change_date = event.creation_date;
        self.store.put(target.idp_config_id, row)?;
        Ok(())
    }
}
