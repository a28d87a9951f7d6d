//! Decision oracle adapter
//!
//! The oracle is the only component that evaluates policy. The enumeration
//! engine treats it as a black box answering admit/deny for one fully
//! qualified [`AccessTuple`], and assumes every call is expensive.

use async_trait::async_trait;
use regex::Regex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use crate::error::{GrantError, Result};
use crate::store::Snapshot;
use crate::types::{AccessTuple, PolicyRule, WILDCARD};

/// Maximum role-to-role inheritance depth followed by [`RbacOracle`]
pub const MAX_ROLE_DEPTH: usize = 10;

/// Pointwise admit/deny capability
///
/// Must be deterministic for a fixed tuple snapshot and free of side effects.
/// Failing with [`GrantError::OracleUnavailable`](crate::GrantError::OracleUnavailable)
/// aborts the enumeration that issued the call.
#[async_trait]
pub trait DecisionOracle: Send + Sync {
    async fn admits(&self, tuple: &AccessTuple) -> Result<bool>;
}

/// Adapter turning a synchronous decision function into an oracle
///
/// Each call runs on the blocking pool, so slow or blocking functions
/// still overlap under the enumerator's concurrency bound.
pub struct FnOracle<F> {
    decide: Arc<F>,
}

#[async_trait]
impl<F> DecisionOracle for FnOracle<F>
where
    F: Fn(&AccessTuple) -> Result<bool> + Send + Sync + 'static,
{
    async fn admits(&self, tuple: &AccessTuple) -> Result<bool> {
        let decide = self.decide.clone();
        let tuple = tuple.clone();

        tokio::task::spawn_blocking(move || decide(&tuple))
            .await
            .map_err(|e| GrantError::OracleUnavailable(format!("decision function failed: {}", e)))?
    }
}

/// Wrap a decision function as a shared oracle
pub fn from_fn<F>(decide: F) -> Arc<dyn DecisionOracle>
where
    F: Fn(&AccessTuple) -> Result<bool> + Send + Sync + 'static,
{
    Arc::new(FnOracle {
        decide: Arc::new(decide),
    })
}

/// Field matcher: `*` matches anything, `prefix*`-style globs match by pattern
#[derive(Debug, Clone)]
enum Pattern {
    Any,
    Exact(String),
    Glob(Regex),
}

impl Pattern {
    fn compile(pattern: &str) -> Self {
        if pattern == WILDCARD {
            return Pattern::Any;
        }

        if pattern.contains('*') {
            let regex_pattern = regex::escape(pattern).replace(r"\*", ".*");
            if let Ok(regex) = Regex::new(&format!("^{}$", regex_pattern)) {
                return Pattern::Glob(regex);
            }
        }

        Pattern::Exact(pattern.to_string())
    }

    fn matches(&self, value: &str) -> bool {
        match self {
            Pattern::Any => true,
            Pattern::Exact(expected) => expected == value,
            Pattern::Glob(regex) => regex.is_match(value),
        }
    }
}

#[derive(Debug, Clone)]
struct CompiledRule {
    resource_type: Pattern,
    action: Pattern,
    resource_id: Pattern,
}

impl CompiledRule {
    fn new(rule: &PolicyRule) -> Self {
        Self {
            resource_type: Pattern::compile(&rule.resource_type),
            action: Pattern::compile(&rule.action),
            resource_id: Pattern::compile(&rule.resource_id),
        }
    }

    fn matches(&self, tuple: &AccessTuple) -> bool {
        self.resource_type.matches(&tuple.resource_type)
            && self.action.matches(&tuple.action)
            && self.resource_id.matches(&tuple.resource_id)
    }
}

/// Reference oracle: role-based access control with domains
///
/// Admits `(user, domain, type, action, id)` when a role the user holds in
/// `domain`, directly or through roles assigned to roles in that domain, has
/// a policy rule in `domain` matching the type, action and id. A rule id of
/// `"*"` covers every concrete id; a concrete rule id never covers a `"*"` probe.
#[derive(Debug, Clone, Default)]
pub struct RbacOracle {
    /// (holder, domain) -> roles
    assignments: HashMap<(String, String), Vec<String>>,

    /// (role, domain) -> rules
    rules: HashMap<(String, String), Vec<CompiledRule>>,
}

impl RbacOracle {
    /// Index a tuple snapshot
    pub fn from_snapshot(snapshot: &Snapshot) -> Self {
        let mut oracle = Self::default();

        for assignment in &snapshot.role_assignments {
            oracle
                .assignments
                .entry((assignment.user.clone(), assignment.domain.clone()))
                .or_default()
                .push(assignment.role.clone());
        }

        for rule in &snapshot.policies {
            oracle
                .rules
                .entry((rule.role.clone(), rule.domain.clone()))
                .or_default()
                .push(CompiledRule::new(rule));
        }

        oracle
    }

    /// Roles reachable from `holder` in `domain`, breadth first
    fn roles_of(&self, holder: &str, domain: &str) -> Vec<String> {
        let mut reached = Vec::new();
        let mut visited: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<(String, usize)> = VecDeque::new();
        queue.push_back((holder.to_string(), 0));

        while let Some((current, depth)) = queue.pop_front() {
            if depth >= MAX_ROLE_DEPTH {
                continue;
            }

            let key = (current, domain.to_string());
            let Some(roles) = self.assignments.get(&key) else {
                continue;
            };

            for role in roles {
                if visited.insert(role.clone()) {
                    reached.push(role.clone());
                    queue.push_back((role.clone(), depth + 1));
                }
            }
        }

        reached
    }

    fn decide(&self, tuple: &AccessTuple) -> bool {
        self.roles_of(&tuple.user, &tuple.domain).into_iter().any(|role| {
            self.rules
                .get(&(role, tuple.domain.clone()))
                .map(|rules| rules.iter().any(|rule| rule.matches(tuple)))
                .unwrap_or(false)
        })
    }
}

#[async_trait]
impl DecisionOracle for RbacOracle {
    async fn admits(&self, tuple: &AccessTuple) -> Result<bool> {
        Ok(self.decide(tuple))
    }
}
