//! Policy expansion.
//!
//! Collects every statement that applies to a principal and flattens it into
//! the set of catalog actions the principal may invoke. Globbed `Action`
//! entries are expanded against the API catalog; Allow statements union in,
//! and a Deny subtracts only when it is action-only, meaning its Resource is
//! (or contains) `"*"` and it carries no Condition. Narrower Denies cannot
//! remove an action from the "possible at all" set, so they are ignored at
//! this granularity.

use anyhow::{bail, Context, Result};
use regex::RegexBuilder;
use std::collections::HashSet;
use tracing::warn;

use super::actions::cloudtrail_to_iam;
use super::catalog::ApiCatalog;
use super::iam::{AccountIam, PolicyDocument, RoleDetail, Statement, UserDetail};

/// Accumulates the policy statements granted to one principal.
pub struct Privileges<'a> {
    stmts: Vec<&'a Statement>,
    catalog: &'a ApiCatalog,
}

impl<'a> Privileges<'a> {
    pub fn new(catalog: &'a ApiCatalog) -> Self {
        Self {
            stmts: Vec::new(),
            catalog,
        }
    }

    /// Add a statement from an IAM policy.
    pub fn add_stmt(&mut self, stmt: &'a Statement) {
        if stmt.action.is_none() {
            if stmt.not_action.is_some() {
                warn!(
                    "NotAction statements are not supported and will be ignored; \
                     the report may under-approximate grants"
                );
            }
            return;
        }
        self.stmts.push(stmt);
    }

    fn add_document(&mut self, document: &'a PolicyDocument) {
        for stmt in document.statement.iter() {
            self.add_stmt(stmt);
        }
    }

    /// Expand one statement's action patterns against the catalog.
    ///
    /// Catalog entries are converted to their IAM names before matching so
    /// the result set is keyed the way policies spell actions.
    pub fn get_actions_from_statement(&self, stmt: &Statement) -> Result<HashSet<String>> {
        let mut actions = HashSet::new();

        let Some(patterns) = &stmt.action else {
            return Ok(actions);
        };

        for pattern in patterns.iter() {
            let regex = glob_to_regex(pattern)?;
            for catalog_action in &self.catalog.api_list {
                let candidate = cloudtrail_to_iam(catalog_action);
                if regex.is_match(&candidate) {
                    actions.insert(candidate);
                }
            }
        }

        Ok(actions)
    }

    /// Resolve the added statements into the flat set of allowed actions.
    pub fn determine_allowed(&self) -> Result<HashSet<String>> {
        let mut allowed = HashSet::new();

        for stmt in &self.stmts {
            match stmt.effect.as_str() {
                "Allow" => allowed.extend(self.get_actions_from_statement(stmt)?),
                "Deny" => {}
                other => bail!("Statement has unknown Effect: {}", other),
            }
        }

        for stmt in &self.stmts {
            if stmt.effect != "Deny" {
                continue;
            }
            let unrestricted_resource = stmt
                .resource
                .as_ref()
                .map(|resource| resource.contains("*"))
                .unwrap_or(false);
            if !unrestricted_resource || stmt.condition.is_some() {
                continue;
            }
            for action in self.get_actions_from_statement(stmt)? {
                allowed.remove(&action);
            }
        }

        Ok(allowed)
    }
}

/// Translate an IAM action glob into an anchored, case-insensitive regex.
fn glob_to_regex(pattern: &str) -> Result<regex::Regex> {
    let mut translated = String::with_capacity(pattern.len() + 8);
    translated.push('^');
    for ch in pattern.chars() {
        match ch {
            '*' => translated.push_str(".*"),
            '?' => translated.push('.'),
            ch => translated.push_str(&regex::escape(&ch.to_string())),
        }
    }
    translated.push('$');
    RegexBuilder::new(&translated)
        .case_insensitive(true)
        .build()
        .with_context(|| format!("Invalid action pattern: {}", pattern))
}

/// The privileges granted to a user, via groups, attached managed policies,
/// and inline policies.
pub fn get_user_allowed_actions(
    catalog: &ApiCatalog,
    user: &UserDetail,
    account_iam: &AccountIam,
) -> Result<HashSet<String>> {
    let mut privileges = Privileges::new(catalog);

    for group_name in &user.group_list {
        let Some(group) = account_iam.group(group_name) else {
            warn!("User {} belongs to unknown group {}", user.user_name, group_name);
            continue;
        };
        for managed in &group.attached_managed_policies {
            match account_iam.default_policy_document(&managed.policy_arn) {
                Some(document) => privileges.add_document(document),
                None => warn!("Managed policy {} not found in snapshot", managed.policy_arn),
            }
        }
        for inline in &group.group_policy_list {
            privileges.add_document(&inline.policy_document);
        }
    }

    for managed in &user.attached_managed_policies {
        match account_iam.default_policy_document(&managed.policy_arn) {
            Some(document) => privileges.add_document(document),
            None => warn!("Managed policy {} not found in snapshot", managed.policy_arn),
        }
    }

    for inline in &user.user_policy_list {
        privileges.add_document(&inline.policy_document);
    }

    privileges.determine_allowed()
}

/// The privileges granted to a role by its attached and inline policies.
pub fn get_role_allowed_actions(
    catalog: &ApiCatalog,
    role: &RoleDetail,
    account_iam: &AccountIam,
) -> Result<HashSet<String>> {
    let mut privileges = Privileges::new(catalog);

    for managed in &role.attached_managed_policies {
        match account_iam.default_policy_document(&managed.policy_arn) {
            Some(document) => privileges.add_document(document),
            None => warn!("Managed policy {} not found in snapshot", managed.policy_arn),
        }
    }

    for inline in &role.role_policy_list {
        privileges.add_document(&inline.policy_document);
    }

    privileges.determine_allowed()
}
