use serde::{Deserialize, Serialize};

use warden_core::{DomainError, DomainResult};

/// Settings the org repository needs from the instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrgConfig {
    /// Suffix of the domain generated for every new org.
    pub iam_domain: String,
    /// Aggregate id of the IAM owning the system-wide IDP configs.
    pub iam_id: String,
}

impl Default for OrgConfig {
    fn default() -> Self {
        Self {
            iam_domain: "warden.localhost".to_string(),
            iam_id: "iam".to_string(),
        }
    }
}

impl OrgConfig {
    /// `ACME Corp` becomes `acme-corp.<iam_domain>`. A name without a single
    /// ASCII letter or digit has no domain.
    pub fn generated_domain(&self, org_name: &str) -> DomainResult<String> {
        let mut slug = String::with_capacity(org_name.len());
        for c in org_name.trim().chars().flat_map(char::to_lowercase) {
            if c.is_ascii_alphanumeric() {
                slug.push(c);
            } else if !slug.ends_with('-') {
                slug.push('-');
            }
        }
        let slug = slug.trim_matches('-');
        if slug.is_empty() {
            return Err(DomainError::precondition_failed(format!(
                "org name {org_name:?} yields no domain"
            )));
        }
        Ok(format!("{slug}.{}", self.iam_domain))
    }
}
