//! Core grant enumeration types

use serde::{Deserialize, Serialize};
use std::fmt;

/// Resource id that stands for every instance of a resource type
pub const WILDCARD: &str = "*";

fn wildcard() -> String {
    WILDCARD.to_string()
}

/// Stored permission of a role within a domain
///
/// Reads as "`role` may perform `action` on `resource_type[/resource_id]`
/// within `domain`".
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PolicyRule {
    /// Role granted the permission
    pub role: String,

    /// Domain (tenant, organisation) the permission lives in
    pub domain: String,

    /// Resource type (e.g. "property", "invoice")
    pub resource_type: String,

    /// Action name (read, write, delete, etc.)
    pub action: String,

    /// Specific resource instance, `"*"` for all of them
    #[serde(default = "wildcard")]
    pub resource_id: String,
}

impl PolicyRule {
    /// Create a rule covering every instance of the resource type
    pub fn new(
        role: impl Into<String>,
        domain: impl Into<String>,
        resource_type: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        Self {
            role: role.into(),
            domain: domain.into(),
            resource_type: resource_type.into(),
            action: action.into(),
            resource_id: wildcard(),
        }
    }

    /// Narrow the rule to one resource instance
    pub fn with_resource_id(mut self, resource_id: impl Into<String>) -> Self {
        self.resource_id = resource_id.into();
        self
    }

    /// Whether the rule applies to every instance of its type
    pub fn is_wildcard(&self) -> bool {
        self.resource_id == WILDCARD
    }
}

/// Stored binding of a user to a role within a domain
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RoleAssignment {
    /// User (or, for role inheritance, a role) holding the role
    pub user: String,

    /// Role held
    pub role: String,

    /// Domain the binding applies to
    pub domain: String,
}

impl RoleAssignment {
    pub fn new(
        user: impl Into<String>,
        role: impl Into<String>,
        domain: impl Into<String>,
    ) -> Self {
        Self {
            user: user.into(),
            role: role.into(),
            domain: domain.into(),
        }
    }
}

/// Fully-qualified question put to the decision oracle
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccessTuple {
    pub user: String,
    pub domain: String,
    pub resource_type: String,
    pub action: String,
    pub resource_id: String,
}

impl AccessTuple {
    pub fn new(
        user: impl Into<String>,
        domain: impl Into<String>,
        resource_type: impl Into<String>,
        action: impl Into<String>,
        resource_id: impl Into<String>,
    ) -> Self {
        Self {
            user: user.into(),
            domain: domain.into(),
            resource_type: resource_type.into(),
            action: action.into(),
            resource_id: resource_id.into(),
        }
    }
}

impl fmt::Display for AccessTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({}, {}, {}, {}, {})",
            self.user, self.domain, self.resource_type, self.action, self.resource_id
        )
    }
}

/// Enumeration query
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GrantQuery {
    /// Everything one user can do
    BySubject { user: String },

    /// Everyone who can perform `action` on a resource
    ByResource {
        resource_type: String,
        action: String,
        resource_id: String,
    },
}

impl GrantQuery {
    pub fn by_subject(user: impl Into<String>) -> Self {
        GrantQuery::BySubject { user: user.into() }
    }

    /// Query a resource type; `resource_id` defaults to `"*"`
    pub fn by_resource(
        resource_type: impl Into<String>,
        action: impl Into<String>,
        resource_id: Option<String>,
    ) -> Self {
        GrantQuery::ByResource {
            resource_type: resource_type.into(),
            action: action.into(),
            resource_id: resource_id.unwrap_or_else(wildcard),
        }
    }
}

/// Confirmed grant: the oracle admitted exactly this tuple
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Grant {
    pub user: String,
    pub domain: String,
    pub resource_type: String,
    pub action: String,
    pub resource_id: String,
}

impl Grant {
    /// The tuple that re-confirms this grant with one oracle call
    pub fn as_tuple(&self) -> AccessTuple {
        AccessTuple {
            user: self.user.clone(),
            domain: self.domain.clone(),
            resource_type: self.resource_type.clone(),
            action: self.action.clone(),
            resource_id: self.resource_id.clone(),
        }
    }
}

impl From<AccessTuple> for Grant {
    fn from(tuple: AccessTuple) -> Self {
        Self {
            user: tuple.user,
            domain: tuple.domain,
            resource_type: tuple.resource_type,
            action: tuple.action,
            resource_id: tuple.resource_id,
        }
    }
}
