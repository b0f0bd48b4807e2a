//! The AWS API catalog.
//!
//! Two newline-delimited lists ship with the binary: every `service:event`
//! pair AWS knows about, and the subset of those that CloudTrail records.
//! Policy globs are expanded against the first; the second decides whether a
//! granted-but-unseen action is reported as unused or as unknowable.

use std::collections::HashSet;
use tracing::warn;

use super::actions::normalize_api_call;

const AWS_API_LIST: &str = include_str!("../../data/aws_api_list.txt");
const CLOUDTRAIL_SUPPORTED_ACTIONS: &str =
    include_str!("../../data/cloudtrail_supported_actions.txt");

/// All known AWS API actions, plus the subset CloudTrail records.
/// Loaded once per run and never mutated; threaded by reference everywhere.
#[derive(Debug, Clone)]
pub struct ApiCatalog {
    pub api_list: HashSet<String>,
    pub cloudtrail_supported: HashSet<String>,
}

impl ApiCatalog {
    pub fn load() -> Self {
        Self {
            api_list: parse_action_list(AWS_API_LIST),
            cloudtrail_supported: parse_action_list(CLOUDTRAIL_SUPPORTED_ACTIONS),
        }
    }

    /// Would CloudTrail have recorded this action if it had been performed?
    pub fn is_recorded_by_cloudtrail(&self, action: &str) -> bool {
        self.cloudtrail_supported.contains(action)
    }
}

fn parse_action_list(raw: &str) -> HashSet<String> {
    let mut actions = HashSet::new();
    for line in raw.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match line.split_once(':') {
            Some((service, event)) => {
                actions.insert(normalize_api_call(service, event));
            }
            None => warn!("Skipping malformed API list line: {}", line),
        }
    }
    actions
}
