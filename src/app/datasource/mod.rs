//! CloudTrail datasources.
//!
//! The evaluator only needs a handful of distinct-value queries over the
//! trail: who acted, and what a given principal did, including through
//! role-assumption chains. Two stores can answer those queries — Athena over
//! the raw S3 logs and an Elasticsearch index of the same events — and this
//! trait is the seam that keeps their differences out of the evaluator.

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::HashSet;

pub mod athena;
pub mod es;

/// The console writes this placeholder username when someone attempts a
/// login with a wrong username; it is never a real principal.
pub const HIDDEN_USERNAME_SENTINEL: &str = "HIDDEN_DUE_TO_SECURITY_REASONS";

/// Inclusive date range a query is restricted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self> {
        if start > end {
            bail!("Start date {} is after end date {}", start, end);
        }
        Ok(Self { start, end })
    }
}

/// Queries the evaluator makes against a CloudTrail store.
///
/// All results are canonical action names (lowercased, service-renamed), and
/// only successful calls count; records carrying an error code are filtered
/// out at the store.
#[async_trait]
pub trait CloudTrailDatasource {
    /// Distinct IAM usernames that performed any action in the date range.
    async fn performed_users(&self) -> Result<HashSet<String>>;

    /// Distinct role names (session issuers) that performed any action.
    async fn performed_roles(&self) -> Result<HashSet<String>>;

    /// Distinct actions performed directly by the user with this ARN.
    async fn actions_by_user(&self, user_arn: &str) -> Result<HashSet<String>>;

    /// Distinct actions performed under sessions issued by this role.
    async fn actions_by_role(&self, role_arn: &str) -> Result<HashSet<String>>;

    /// Distinct actions the user performed after assuming the given role.
    async fn actions_by_user_in_role(
        &self,
        user_arn: &str,
        dest_role_arn: &str,
    ) -> Result<HashSet<String>>;

    /// Distinct actions a role performed after assuming another role.
    async fn actions_by_role_in_role(
        &self,
        src_role_arn: &str,
        dest_role_arn: &str,
    ) -> Result<HashSet<String>>;
}

/// The service part of an event source hostname: `s3.amazonaws.com` -> `s3`.
pub(crate) fn service_from_event_source(event_source: &str) -> &str {
    event_source.split('.').next().unwrap_or(event_source)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn date_range_rejects_inverted_bounds() {
        let start = NaiveDate::from_ymd_opt(2018, 3, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2018, 1, 1).unwrap();
        assert!(DateRange::new(start, end).is_err());
        assert!(DateRange::new(end, start).is_ok());
    }

    #[test]
    fn event_source_strips_domain() {
        assert_eq!(service_from_event_source("s3.amazonaws.com"), "s3");
        assert_eq!(service_from_event_source("monitoring.amazonaws.com"), "monitoring");
        assert_eq!(service_from_event_source("sts"), "sts");
    }
}
