//! Core application modules for CloudTracker.
//!
//! Each submodule handles one stage of the audit: parsing what a principal
//! was granted, querying what it actually did, and diffing the two.
//!
//! # Module Organization
//!
//! ## Privilege Evaluation
//! - [`actions`] - Canonical action names and the CloudTrail/IAM rename tables
//! - [`catalog`] - The shipped AWS API catalog and CloudTrail-recorded subset
//! - [`iam`] - The account authorization snapshot and principal lookups
//! - [`privileges`] - Policy statement collection and glob expansion
//!
//! ## CloudTrail Access
//! - [`datasource`] - The datasource trait and its Athena and Elasticsearch
//!   implementations
//!
//! ## Front End
//! - [`args`] - Command-line flags
//! - [`config`] - The YAML configuration file
//! - [`report`] - Diff rendering

pub mod actions;
pub mod args;
pub mod catalog;
pub mod config;
pub mod datasource;
pub mod iam;
pub mod privileges;
pub mod report;

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use tracing::debug;

use self::args::{Args, ListTarget};
use self::catalog::ApiCatalog;
use self::config::Config;
use self::datasource::athena::AthenaDatasource;
use self::datasource::es::EsDatasource;
use self::datasource::{CloudTrailDatasource, DateRange};
use self::iam::AccountIam;
use self::privileges::{get_role_allowed_actions, get_user_allowed_actions};
use self::report::{print_actor_diff, print_diff, PrintFilter};

/// Perform the requested command.
pub async fn run(args: Args) -> Result<()> {
    let config = Config::load(&args.config)?;
    let account = config.account(&args.account)?;

    let today = Utc::now().date_naive();
    let start = args.start.unwrap_or_else(|| today - Duration::days(365));
    let end = args.end.unwrap_or(today);
    let range = DateRange::new(start, end)?;

    let datasource: Box<dyn CloudTrailDatasource> =
        if let Some(es_config) = &config.elasticsearch {
            Box::new(EsDatasource::new(es_config, &range).await?)
        } else {
            debug!("Using Athena");
            let athena_config = config
                .athena
                .as_ref()
                .context("Config file must contain an athena or elasticsearch section")?;
            Box::new(AthenaDatasource::new(athena_config, account, &range, args.skip_setup).await?)
        };

    let catalog = ApiCatalog::load();

    let iam_path = args.iam.clone().unwrap_or_else(|| account.iam.clone());
    let account_iam = AccountIam::load(&iam_path)?;

    let use_color = !args.no_color;
    let stdout = std::io::stdout();
    let mut out = stdout.lock();

    if let Some(target) = args.list {
        let (performed, allowed) = match target {
            ListTarget::Users => (datasource.performed_users().await?, account_iam.user_names()),
            ListTarget::Roles => (datasource.performed_roles().await?, account_iam.role_names()),
        };
        return print_actor_diff(&mut out, &performed, &allowed, use_color);
    }

    // Chained assumption may land in a different account's IAM.
    let destination_iam_owned;
    let destination_iam = match &args.destaccount {
        Some(dest) => {
            let dest_account = config.account(dest)?;
            destination_iam_owned = AccountIam::load(&dest_account.iam)?;
            &destination_iam_owned
        }
        None => &account_iam,
    };

    let (performed, allowed) = if let Some(username) = &args.user {
        let user = account_iam.user(username)?;
        println!(
            "Getting info on {}, user created {}",
            username,
            user.create_date.as_deref().unwrap_or("unknown")
        );

        if let Some(destrole) = &args.destrole {
            let dest_role = destination_iam.role(destrole)?;
            println!("Getting info for AssumeRole into {}", destrole);
            (
                datasource
                    .actions_by_user_in_role(&user.arn, &dest_role.arn)
                    .await?,
                get_role_allowed_actions(&catalog, dest_role, destination_iam)?,
            )
        } else {
            (
                datasource.actions_by_user(&user.arn).await?,
                get_user_allowed_actions(&catalog, user, &account_iam)?,
            )
        }
    } else if let Some(rolename) = &args.role {
        let role = account_iam.role(rolename)?;
        println!("Getting info for role {}", rolename);

        if let Some(destrole) = &args.destrole {
            let dest_role = destination_iam.role(destrole)?;
            println!("Getting info for AssumeRole into {}", destrole);
            (
                datasource
                    .actions_by_role_in_role(&role.arn, &dest_role.arn)
                    .await?,
                get_role_allowed_actions(&catalog, dest_role, destination_iam)?,
            )
        } else {
            (
                datasource.actions_by_role(&role.arn).await?,
                get_role_allowed_actions(&catalog, role, &account_iam)?,
            )
        }
    } else {
        unreachable!("clap enforces exactly one of --list, --user, --role");
    };

    let filter = PrintFilter {
        show_used: args.show_used,
        show_benign: !args.ignore_benign,
        show_unknown: !args.ignore_unknown,
    };
    print_diff(
        &mut out,
        &performed,
        &allowed,
        &catalog.cloudtrail_supported,
        &filter,
        use_color,
    )
}
