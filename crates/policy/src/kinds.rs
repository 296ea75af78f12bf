//! The concrete password policies and their instance-wide defaults.

use serde::{Deserialize, Serialize};

use warden_core::{DomainError, DomainResult};

use crate::policy::PolicyKind;

fn require_description(description: &str) -> DomainResult<()> {
    if description.is_empty() {
        return Err(DomainError::precondition_failed("policy description missing"));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PasswordComplexityPolicy {
    pub description: String,
    pub min_length: u64,
    pub has_lowercase: bool,
    pub has_uppercase: bool,
    pub has_number: bool,
    pub has_symbol: bool,
}

impl Default for PasswordComplexityPolicy {
    fn default() -> Self {
        Self {
            description: "default complexity".to_string(),
            min_length: 8,
            has_lowercase: true,
            has_uppercase: true,
            has_number: true,
            has_symbol: false,
        }
    }
}

impl PolicyKind for PasswordComplexityPolicy {
    const AGGREGATE_TYPE: &'static str = "policy.password.complexity";
    const ADDED: &'static str = "policy.password.complexity.added";
    const CHANGED: &'static str = "policy.password.complexity.changed";

    fn fallback(defaults: &PolicyDefaults) -> Self {
        defaults.password_complexity.clone()
    }

    fn validate(&self) -> DomainResult<()> {
        require_description(&self.description)?;
        if self.min_length == 0 {
            return Err(DomainError::invalid_argument("min length must be at least 1"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PasswordAgePolicy {
    pub description: String,
    /// 0 disables expiry.
    pub max_age_days: u64,
    pub expire_warn_days: u64,
}

impl Default for PasswordAgePolicy {
    fn default() -> Self {
        Self {
            description: "default age".to_string(),
            max_age_days: 0,
            expire_warn_days: 0,
        }
    }
}

impl PolicyKind for PasswordAgePolicy {
    const AGGREGATE_TYPE: &'static str = "policy.password.age";
    const ADDED: &'static str = "policy.password.age.added";
    const CHANGED: &'static str = "policy.password.age.changed";

    fn fallback(defaults: &PolicyDefaults) -> Self {
        defaults.password_age.clone()
    }

    fn validate(&self) -> DomainResult<()> {
        require_description(&self.description)?;
        if self.max_age_days > 0 && self.expire_warn_days > self.max_age_days {
            return Err(DomainError::invalid_argument(
                "expiry warning must not precede the password age",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PasswordLockoutPolicy {
    pub description: String,
    /// 0 never locks.
    pub max_attempts: u64,
    pub show_lockout_failures: bool,
}

impl Default for PasswordLockoutPolicy {
    fn default() -> Self {
        Self {
            description: "default lockout".to_string(),
            max_attempts: 0,
            show_lockout_failures: true,
        }
    }
}

impl PolicyKind for PasswordLockoutPolicy {
    const AGGREGATE_TYPE: &'static str = "policy.password.lockout";
    const ADDED: &'static str = "policy.password.lockout.added";
    const CHANGED: &'static str = "policy.password.lockout.changed";

    fn fallback(defaults: &PolicyDefaults) -> Self {
        defaults.password_lockout.clone()
    }

    fn validate(&self) -> DomainResult<()> {
        require_description(&self.description)
    }
}

/// Policies in effect for orgs without their own.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyDefaults {
    pub password_complexity: PasswordComplexityPolicy,
    pub password_age: PasswordAgePolicy,
    pub password_lockout: PasswordLockoutPolicy,
}
