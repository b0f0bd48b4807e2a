//! IAM account snapshot.
//!
//! Deserializes the output of `aws iam get-account-authorization-details`
//! into four indexed collections (users, roles, groups, managed policies).
//! Users refer to groups by name and groups to managed policies by ARN;
//! references are resolved on access, never materialized as object graphs.
//! The snapshot is read once per run and treated as immutable.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

/// A policy field that IAM serializes as either a scalar or a sequence.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum StringOrVec {
    One(String),
    Many(Vec<String>),
}

impl StringOrVec {
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        match self {
            StringOrVec::One(value) => std::slice::from_ref(value).iter(),
            StringOrVec::Many(values) => values.iter(),
        }
        .map(String::as_str)
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.iter().any(|value| value == needle)
    }
}

/// `Statement` itself may also be one-or-many in a policy document.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> OneOrMany<T> {
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        match self {
            OneOrMany::One(value) => std::slice::from_ref(value).iter(),
            OneOrMany::Many(values) => values.iter(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Statement {
    #[serde(default)]
    pub sid: Option<String>,
    pub effect: String,
    #[serde(default)]
    pub action: Option<StringOrVec>,
    #[serde(default)]
    pub not_action: Option<serde_json::Value>,
    #[serde(default)]
    pub resource: Option<StringOrVec>,
    #[serde(default)]
    pub condition: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PolicyDocument {
    #[serde(default)]
    pub version: Option<String>,
    pub statement: OneOrMany<Statement>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct InlinePolicy {
    pub policy_name: String,
    pub policy_document: PolicyDocument,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AttachedManagedPolicy {
    #[serde(default)]
    pub policy_name: Option<String>,
    pub policy_arn: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UserDetail {
    pub user_name: String,
    pub arn: String,
    #[serde(default)]
    pub create_date: Option<String>,
    #[serde(default)]
    pub group_list: Vec<String>,
    #[serde(default)]
    pub attached_managed_policies: Vec<AttachedManagedPolicy>,
    #[serde(default)]
    pub user_policy_list: Vec<InlinePolicy>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RoleDetail {
    pub role_name: String,
    pub arn: String,
    #[serde(default)]
    pub create_date: Option<String>,
    #[serde(default)]
    pub attached_managed_policies: Vec<AttachedManagedPolicy>,
    #[serde(default)]
    pub role_policy_list: Vec<InlinePolicy>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GroupDetail {
    pub group_name: String,
    #[serde(default)]
    pub attached_managed_policies: Vec<AttachedManagedPolicy>,
    #[serde(default)]
    pub group_policy_list: Vec<InlinePolicy>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PolicyVersion {
    pub document: PolicyDocument,
    #[serde(default)]
    pub is_default_version: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ManagedPolicyDetail {
    pub arn: String,
    #[serde(default)]
    pub policy_version_list: Vec<PolicyVersion>,
}

/// The full account authorization snapshot.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AccountIam {
    #[serde(default)]
    pub user_detail_list: Vec<UserDetail>,
    #[serde(default)]
    pub role_detail_list: Vec<RoleDetail>,
    #[serde(default)]
    pub group_detail_list: Vec<GroupDetail>,
    #[serde(default)]
    pub policies: Vec<ManagedPolicyDetail>,
}

impl AccountIam {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read IAM file {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse IAM file {}", path.display()))
    }

    pub fn user_names(&self) -> Vec<String> {
        self.user_detail_list
            .iter()
            .map(|user| user.user_name.clone())
            .collect()
    }

    pub fn role_names(&self) -> Vec<String> {
        self.role_detail_list
            .iter()
            .map(|role| role.role_name.clone())
            .collect()
    }

    pub fn user(&self, name: &str) -> Result<&UserDetail> {
        self.user_detail_list
            .iter()
            .find(|user| user.user_name == name)
            .with_context(|| format!("Unknown user named {}", name))
    }

    pub fn role(&self, name: &str) -> Result<&RoleDetail> {
        self.role_detail_list
            .iter()
            .find(|role| role.role_name == name)
            .with_context(|| format!("Unknown role named {}", name))
    }

    pub fn group(&self, name: &str) -> Option<&GroupDetail> {
        self.group_detail_list
            .iter()
            .find(|group| group.group_name == name)
    }

    /// The default version document of a managed policy, if the snapshot has
    /// it. IAM dumps can be inconsistent, so absence is not fatal.
    pub fn default_policy_document(&self, arn: &str) -> Option<&PolicyDocument> {
        self.policies
            .iter()
            .find(|policy| policy.arn == arn)?
            .policy_version_list
            .iter()
            .find(|version| version.is_default_version)
            .map(|version| &version.document)
    }
}
