//! Response views over a confirmed grant set
//!
//! Both views are pure reshapes of the grants an enumeration produced. An
//! empty grant set is reported as [`GrantError::NotFound`], never as an empty
//! success, so callers can tell "no access" apart from "could not decide".

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::error::{GrantError, Result};
use crate::types::Grant;

/// One entry of a user's access list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessEntry {
    pub resource_type: String,
    pub action: String,
    pub domain: String,
    pub resource_id: String,
}

/// Everything one user can do
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessList {
    pub user: String,
    pub access: Vec<AccessEntry>,
}

impl AccessList {
    /// Shape by-subject grants, keeping enumeration order
    pub fn from_grants(user: impl Into<String>, grants: Vec<Grant>) -> Result<Self> {
        if grants.is_empty() {
            return Err(GrantError::NotFound("no access for user".to_string()));
        }

        let access = grants
            .into_iter()
            .map(|grant| AccessEntry {
                resource_type: grant.resource_type,
                action: grant.action,
                domain: grant.domain,
                resource_id: grant.resource_id,
            })
            .collect();

        Ok(Self {
            user: user.into(),
            access,
        })
    }
}

/// Everyone who can act on a resource, grouped by domain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessByDomain {
    pub resource_type: String,
    pub action: String,
    pub resource_id: String,
    pub access_by_domain: BTreeMap<String, BTreeSet<String>>,
}

impl AccessByDomain {
    /// Shape by-resource grants into domain -> users
    pub fn from_grants(
        resource_type: impl Into<String>,
        action: impl Into<String>,
        resource_id: impl Into<String>,
        grants: Vec<Grant>,
    ) -> Result<Self> {
        let mut access_by_domain: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for grant in grants {
            access_by_domain
                .entry(grant.domain)
                .or_default()
                .insert(grant.user);
        }

        if access_by_domain.is_empty() {
            return Err(GrantError::NotFound("no access to resource".to_string()));
        }

        Ok(Self {
            resource_type: resource_type.into(),
            action: action.into(),
            resource_id: resource_id.into(),
            access_by_domain,
        })
    }

    /// Users admitted in `domain`, if any
    pub fn users_in(&self, domain: &str) -> Option<&BTreeSet<String>> {
        self.access_by_domain.get(domain)
    }
}
