//! Command-line surface.

use chrono::NaiveDate;
use clap::{ArgGroup, Parser, ValueEnum};
use std::fmt;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "lowercase")]
pub enum ListTarget {
    Users,
    Roles,
}

impl fmt::Display for ListTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListTarget::Users => write!(f, "users"),
            ListTarget::Roles => write!(f, "roles"),
        }
    }
}

#[derive(Debug, Parser)]
#[command(
    name = "cloudtracker",
    version,
    about = "Find over-privileged IAM users and roles by comparing CloudTrail logs \
             with current IAM policies"
)]
#[command(group(ArgGroup::new("principal").required(true).args(["list", "user", "role"])))]
pub struct Args {
    /// List 'users' or 'roles' that have been active
    #[arg(long, value_enum)]
    pub list: Option<ListTarget>,

    /// User to investigate
    #[arg(long)]
    pub user: Option<String>,

    /// Role to investigate
    #[arg(long)]
    pub role: Option<String>,

    /// Account name or 12-digit id from the config file
    #[arg(long)]
    pub account: String,

    /// Role assumed into
    #[arg(long)]
    pub destrole: Option<String>,

    /// Account assumed into (if different)
    #[arg(long)]
    pub destaccount: Option<String>,

    /// Start of date range (ex. 2018-01-21). Defaults to one year ago.
    #[arg(long)]
    pub start: Option<NaiveDate>,

    /// End of date range (ex. 2018-01-21). Defaults to today.
    #[arg(long)]
    pub end: Option<NaiveDate>,

    /// Only show privileges that were used
    #[arg(long = "show-used")]
    pub show_used: bool,

    /// Don't show actions that aren't likely to be sensitive, such as ones
    /// that won't exfil data or modify resources
    #[arg(long = "ignore-benign")]
    pub ignore_benign: bool,

    /// Don't show granted privileges that aren't recorded in CloudTrail, as
    /// we don't know if they are used
    #[arg(long = "ignore-unknown")]
    pub ignore_unknown: bool,

    /// Don't use color codes in output
    #[arg(long = "no-color")]
    pub no_color: bool,

    /// For Athena, don't create or test for the tables
    #[arg(long = "skip-setup")]
    pub skip_setup: bool,

    /// Config file name
    #[arg(long, default_value = "config.yaml")]
    pub config: PathBuf,

    /// Override the account's IAM file from `aws iam get-account-authorization-details`
    #[arg(long)]
    pub iam: Option<PathBuf>,
}
