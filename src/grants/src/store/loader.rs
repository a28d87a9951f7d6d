//! Tuple file loading
//!
//! Two formats are accepted:
//!
//! - JSON: `{ "policies": [...], "role_assignments": [...] }`
//! - Casbin-style CSV, one tuple per line:
//!
//! ```text
//! # role, domain, resource type, action[, resource id]
//! p, editor, org1, property, write
//! p, auditor, org1, invoice, read, inv-42
//! # user, role, domain
//! g, alice, editor, org1
//! ```

use std::path::Path;

use super::Snapshot;
use crate::error::{GrantError, Result};
use crate::types::{PolicyRule, RoleAssignment};

/// Load a tuple file, picking the format from the extension (`.json` or anything else as CSV)
pub fn load_path(path: &Path) -> Result<Snapshot> {
    let contents = std::fs::read_to_string(path)?;

    let snapshot = match path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => load_json(&contents)?,
        _ => load_casbin_csv(&contents)?,
    };

    tracing::info!(
        path = %path.display(),
        policies = snapshot.policies.len(),
        role_assignments = snapshot.role_assignments.len(),
        "Loaded tuple file"
    );

    Ok(snapshot)
}

/// Parse a JSON tuple document
pub fn load_json(contents: &str) -> Result<Snapshot> {
    let snapshot: Snapshot = serde_json::from_str(contents)
        .map_err(|e| GrantError::InvalidPolicy(format!("invalid tuple JSON: {}", e)))?;

    for rule in &snapshot.policies {
        check_fields(&[
            rule.role.as_str(),
            rule.domain.as_str(),
            rule.resource_type.as_str(),
            rule.action.as_str(),
            rule.resource_id.as_str(),
        ])?;
    }
    for assignment in &snapshot.role_assignments {
        check_fields(&[
            assignment.user.as_str(),
            assignment.role.as_str(),
            assignment.domain.as_str(),
        ])?;
    }

    Ok(snapshot)
}

/// Parse Casbin-style `p` / `g` lines
pub fn load_casbin_csv(contents: &str) -> Result<Snapshot> {
    let mut snapshot = Snapshot::default();

    for (index, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let fields: Vec<&str> = line.split(',').map(str::trim).collect();
        let line_no = index + 1;

        match fields.as_slice() {
            ["p", role, domain, resource_type, action] => {
                check_line(line_no, &fields[1..])?;
                snapshot
                    .policies
                    .push(PolicyRule::new(*role, *domain, *resource_type, *action));
            }
            ["p", role, domain, resource_type, action, resource_id] => {
                check_line(line_no, &fields[1..])?;
                snapshot.policies.push(
                    PolicyRule::new(*role, *domain, *resource_type, *action)
                        .with_resource_id(*resource_id),
                );
            }
            ["g", user, role, domain] => {
                check_line(line_no, &fields[1..])?;
                snapshot
                    .role_assignments
                    .push(RoleAssignment::new(*user, *role, *domain));
            }
            _ => {
                return Err(GrantError::InvalidPolicy(format!(
                    "line {}: unrecognised tuple `{}`",
                    line_no, line
                )));
            }
        }
    }

    Ok(snapshot)
}

fn check_line(line_no: usize, fields: &[&str]) -> Result<()> {
    check_fields(fields).map_err(|e| GrantError::InvalidPolicy(format!("line {}: {}", line_no, e)))
}

fn check_fields(fields: &[&str]) -> Result<()> {
    if fields.iter().any(|f| f.trim().is_empty()) {
        return Err(GrantError::InvalidPolicy("empty tuple field".to_string()));
    }
    Ok(())
}
