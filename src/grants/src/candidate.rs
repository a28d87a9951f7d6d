//! Candidate space construction
//!
//! The oracle cannot list what it knows, so the values worth probing are
//! derived from the stored tuples. A space is built per request from one
//! snapshot and dropped with it.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};

use crate::error::{GrantError, Result};
use crate::store::Snapshot;
use crate::types::WILDCARD;

/// Ordered (resource type, action) pairs probed in by-subject mode
///
/// Supplied by configuration; the engine never discovers resource types on its own.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceCatalog {
    entries: Vec<(String, String)>,
}

impl ResourceCatalog {
    /// Build a catalog; repeated pairs keep their first position
    pub fn new<I, T, A>(entries: I) -> Self
    where
        I: IntoIterator<Item = (T, A)>,
        T: Into<String>,
        A: Into<String>,
    {
        let mut seen = HashSet::new();
        let entries = entries
            .into_iter()
            .map(|(t, a)| (t.into(), a.into()))
            .filter(|pair| seen.insert(pair.clone()))
            .collect();

        Self { entries }
    }

    /// Parse `type:action` pairs separated by commas, e.g. `property:read,property:write`
    pub fn parse(list: &str) -> Result<Self> {
        let mut pairs = Vec::new();

        for item in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let (resource_type, action) = item
                .split_once(':')
                .map(|(t, a)| (t.trim(), a.trim()))
                .filter(|(t, a)| !t.is_empty() && !a.is_empty())
                .ok_or_else(|| {
                    GrantError::InvalidInput(format!(
                        "invalid catalog entry `{}` (expected \"type:action\")",
                        item
                    ))
                })?;
            pairs.push((resource_type.to_string(), action.to_string()));
        }

        Ok(Self::new(pairs))
    }

    /// Distinct concrete (type, action) pairs named by the policy rules, sorted
    ///
    /// Rules whose type or action is a pattern are skipped.
    pub fn from_policies(snapshot: &Snapshot) -> Self {
        let pairs: BTreeSet<(String, String)> = snapshot
            .policies
            .iter()
            .filter(|rule| !rule.resource_type.contains('*') && !rule.action.contains('*'))
            .map(|rule| (rule.resource_type.clone(), rule.action.clone()))
            .collect();

        Self::new(pairs)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(t, a)| (t.as_str(), a.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Finite search space for one enumeration request
#[derive(Debug, Clone, Default)]
pub struct CandidateSpace {
    domains: BTreeSet<String>,
    resource_ids: BTreeMap<String, BTreeSet<String>>,
    subjects: BTreeSet<String>,
}

impl CandidateSpace {
    /// Derive the space from a tuple snapshot
    pub fn build(snapshot: &Snapshot) -> Self {
        let mut space = Self::default();

        // Domains come from where permissions exist, not from where roles are held.
        for rule in &snapshot.policies {
            space.domains.insert(rule.domain.clone());

            if rule.resource_id != WILDCARD {
                space
                    .resource_ids
                    .entry(rule.resource_type.clone())
                    .or_default()
                    .insert(rule.resource_id.clone());
            }
        }

        // Role-to-role inheritance is stored as an assignment whose holder
        // is itself a role; only end users are subjects.
        let roles: HashSet<&str> = snapshot
            .policies
            .iter()
            .map(|rule| rule.role.as_str())
            .chain(snapshot.role_assignments.iter().map(|a| a.role.as_str()))
            .collect();

        for assignment in &snapshot.role_assignments {
            if !roles.contains(assignment.user.as_str()) {
                space.subjects.insert(assignment.user.clone());
            }
        }

        space
    }

    /// Distinct policy domains, sorted
    pub fn domains(&self) -> impl Iterator<Item = &str> {
        self.domains.iter().map(String::as_str)
    }

    /// Concrete resource ids named for `resource_type`, sorted
    pub fn resource_ids_for(&self, resource_type: &str) -> impl Iterator<Item = &str> {
        self.resource_ids
            .get(resource_type)
            .into_iter()
            .flat_map(|ids| ids.iter().map(String::as_str))
    }

    /// Distinct end users holding any role, sorted
    pub fn subjects(&self) -> impl Iterator<Item = &str> {
        self.subjects.iter().map(String::as_str)
    }

    pub fn domain_count(&self) -> usize {
        self.domains.len()
    }

    pub fn subject_count(&self) -> usize {
        self.subjects.len()
    }

    /// No domain means nothing to probe
    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }
}
