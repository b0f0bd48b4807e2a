//! CloudTracker - CloudTrail vs. IAM Privilege Auditor
//!
//! CloudTracker finds over-privileged IAM users and roles by comparing the
//! API actions a principal is granted by its policies against the actions it
//! has actually performed, as recorded in CloudTrail.
//!
//! # How It Works
//!
//! - **Granted side**: a snapshot of the account's IAM (the output of
//!   `aws iam get-account-authorization-details`) is expanded into a flat set
//!   of API actions per principal, honouring Allow/Deny composition and
//!   action globs against a shipped catalog of AWS APIs
//!   ([`app::privileges`], [`app::catalog`]).
//! - **Performed side**: a CloudTrail store is queried for the distinct
//!   actions the principal invoked in a date range, either through Athena
//!   over the raw S3 logs or through an Elasticsearch index
//!   ([`app::datasource`]).
//! - **Report**: the two sets are diffed and printed per action: used,
//!   unused, performed-but-not-granted, or granted-but-unknowable because
//!   CloudTrail does not record it ([`app::report`]).
//!
//! Role-assumption chains are followed as well: `--user X --destrole Y`
//! reports what X did with the credentials it obtained by assuming Y.
//!
//! # Scope
//!
//! The evaluation is action-granular. Resource constraints, conditions,
//! permission boundaries, SCPs, and `NotAction` statements are out of scope;
//! a Deny only subtracts when it applies to every resource unconditionally.

#![warn(clippy::all, rust_2018_idioms)]

pub mod app;
