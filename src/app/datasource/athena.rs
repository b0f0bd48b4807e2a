//! Athena datasource.
//!
//! Queries CloudTrail logs where AWS delivers them: as JSON objects in S3.
//! An external table with the CloudTrail SerDe is created over the log
//! prefix, partitioned by (region, year, month), and every query carries a
//! compiled month-disjunction filter so Athena prunes partitions instead of
//! scanning all history.
//!
//! Much thanks to Alex Smolen's "Partitioning CloudTrail Logs in Athena"
//! for the partitioning scheme.

use anyhow::{bail, Context, Result};
use aws_config::BehaviorVersion;
use aws_sdk_athena as athena;
use aws_sdk_athena::types::{
    QueryExecutionContext, QueryExecutionState, ResultConfiguration,
};
use aws_sdk_s3 as s3;
use aws_sdk_sts as sts;
use async_trait::async_trait;
use chrono::{Datelike, Months, Utc};
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, info};

use super::super::actions::normalize_api_call;
use super::super::config::{AccountConfig, AthenaConfig};
use super::{
    service_from_event_source, CloudTrailDatasource, DateRange, HIDDEN_USERNAME_SENTINEL,
};

const DATABASE: &str = "cloudtracker";
const NUM_MONTHS_FOR_PARTITIONS: u32 = 12;
const POLL_INTERVAL: Duration = Duration::from_secs(1);
const POLL_INTERVAL_MAX: Duration = Duration::from_secs(5);

/// Regions CloudTrail delivers logs for; partitions are created per region.
const REGIONS: &[&str] = &[
    "us-east-1",
    "us-east-2",
    "us-west-1",
    "us-west-2",
    "af-south-1",
    "ap-east-1",
    "ap-south-1",
    "ap-northeast-1",
    "ap-northeast-2",
    "ap-northeast-3",
    "ap-southeast-1",
    "ap-southeast-2",
    "ca-central-1",
    "eu-central-1",
    "eu-west-1",
    "eu-west-2",
    "eu-west-3",
    "eu-north-1",
    "eu-south-1",
    "me-south-1",
    "sa-east-1",
];

pub struct AthenaDatasource {
    client: athena::Client,
    table_name: String,
    output_location: String,
    search_filter: String,
}

/// Compile `[start, end]` into a partition-pruning predicate: a disjunction
/// of `(year = 'YYYY' and month = 'MM')` over every month the range touches,
/// with failed calls filtered out.
pub fn compile_date_filter(range: &DateRange) -> String {
    let mut restrictions = Vec::new();

    let mut year = range.start.year();
    let mut month = range.start.month();
    loop {
        restrictions.push(format!("(year = '{}' and month = '{:02}')", year, month));
        if year == range.end.year() && month == range.end.month() {
            break;
        }
        month += 1;
        if month > 12 {
            month = 1;
            year += 1;
        }
    }

    format!("(({}) and errorcode IS NULL)", restrictions.join(" or "))
}

/// One multi-partition `ALTER TABLE ... ADD` covering every region whose
/// (region, year, month) partition is missing; `None` when the month is
/// fully partitioned already.
pub fn partition_add_query(
    table_name: &str,
    cloudtrail_log_path: &str,
    year: i32,
    month: u32,
    existing_partitions: &HashSet<String>,
) -> Option<String> {
    let mut partitions = String::new();

    for region in REGIONS {
        let key = format!("region={}/year={}/month={:02}", region, year, month);
        if existing_partitions.contains(&key) {
            continue;
        }
        partitions.push_str(&format!(
            "PARTITION (region='{region}',year='{year}',month='{month:02}') \
             LOCATION '{cloudtrail_log_path}/{region}/{year}/{month:02}/'\n",
        ));
    }

    if partitions.is_empty() {
        return None;
    }
    Some(format!(
        "ALTER TABLE {} ADD IF NOT EXISTS {}",
        table_name, partitions
    ))
}

/// Parse one row of `SELECT DISTINCT (eventsource, eventname)` output.
/// Athena renders the pair as a single struct column,
/// `{field0=s3.amazonaws.com, field1=GetBucketAcl}`.
pub fn parse_event_row(raw: &str) -> Option<(String, String)> {
    let inner = raw.strip_prefix('{')?.strip_suffix('}')?;
    let mut fields = inner.split(", ");
    let event_source = fields.next()?.split('=').nth(1)?;
    let event_name = fields.next()?.split('=').nth(1)?;
    Some((event_source.to_string(), event_name.to_string()))
}

fn sql_quote(value: &str) -> String {
    value.replace('\'', "''")
}

impl AthenaDatasource {
    pub async fn new(
        config: &AthenaConfig,
        account: &AccountConfig,
        range: &DateRange,
        skip_setup: bool,
    ) -> Result<Self> {
        info!(
            "Source of CloudTrail logs: s3://{}/{}",
            config.s3_bucket, config.path
        );

        // Partitions are only created that far back, so older queries would
        // silently return nothing.
        let today = Utc::now().date_naive();
        if (today - range.start).num_days() > 365 {
            bail!(
                "Start date is over a year old. CloudTracker does not create or use \
                 partitions over a year old."
            );
        }

        let aws_config = aws_config::defaults(BehaviorVersion::latest()).load().await;

        // Doubles as a check that credentials are set up.
        let identity = sts::Client::new(&aws_config)
            .get_caller_identity()
            .send()
            .await
            .context("Failed to call sts:GetCallerIdentity; are AWS credentials configured?")?;
        info!("Using AWS identity: {}", identity.arn().unwrap_or("unknown"));
        let current_account_id = identity
            .account()
            .context("STS did not return an account id")?
            .to_string();
        let region = aws_config
            .region()
            .context("No AWS region configured")?
            .to_string();

        let output_location = config
            .output_s3_bucket
            .clone()
            .unwrap_or_else(|| {
                format!(
                    "s3://aws-athena-query-results-{}-{}",
                    current_account_id, region
                )
            });
        info!("Using output bucket: {}", output_location);

        let cloudtrail_log_path = format!(
            "s3://{}/{}/AWSLogs/{}/CloudTrail",
            config.s3_bucket, config.path, account.id
        );
        info!("Account cloudtrail log path: {}", cloudtrail_log_path);

        let datasource = Self {
            client: athena::Client::new(&aws_config),
            table_name: format!("cloudtrail_logs_{}", account.id),
            output_location,
            search_filter: compile_date_filter(range),
        };

        if skip_setup {
            info!("Skipping initial table creation");
            return Ok(datasource);
        }

        datasource
            .setup(&aws_config, config, &cloudtrail_log_path)
            .await?;

        Ok(datasource)
    }

    /// Idempotent bootstrap: database, external table, and the partitions
    /// for the last twelve months.
    async fn setup(
        &self,
        aws_config: &aws_config::SdkConfig,
        config: &AthenaConfig,
        cloudtrail_log_path: &str,
    ) -> Result<()> {
        let s3_client = s3::Client::new(aws_config);
        let probe = s3_client
            .list_objects_v2()
            .bucket(&config.s3_bucket)
            .prefix(&config.path)
            .max_keys(1)
            .send()
            .await
            .with_context(|| format!("Failed to list s3://{}", config.s3_bucket))?;
        if probe.key_count().unwrap_or(0) == 0 {
            bail!(
                "S3 bucket has no contents. Ensure you have logs at s3://{}/{}",
                config.s3_bucket,
                config.path
            );
        }

        self.query_athena(
            &format!(
                "CREATE DATABASE IF NOT EXISTS {} COMMENT 'Created by CloudTracker'",
                DATABASE
            ),
            false,
            true,
        )
        .await?;

        self.query_athena(&self.create_table_query(cloudtrail_log_path), true, true)
            .await?;

        info!(
            "Checking if all partitions for the past {} months exist",
            NUM_MONTHS_FOR_PARTITIONS
        );

        let partition_rows = self
            .query_athena(&format!("SHOW PARTITIONS {}", self.table_name), true, false)
            .await?;
        let existing_partitions: HashSet<String> = partition_rows
            .into_iter()
            .filter_map(|row| row.into_iter().next())
            .collect();

        let today = Utc::now().date_naive();
        let mut query_ids = Vec::new();
        for months_ago in 0..NUM_MONTHS_FOR_PARTITIONS {
            let date = today - Months::new(months_ago);
            if let Some(query) = partition_add_query(
                &self.table_name,
                cloudtrail_log_path,
                date.year(),
                date.month(),
                &existing_partitions,
            ) {
                query_ids.push(self.start_query(&query, true).await?);
            }
        }

        if !query_ids.is_empty() {
            info!("Creating {} partition groups", query_ids.len());
            self.wait_for_query_batch(query_ids).await?;
        }

        Ok(())
    }

    fn create_table_query(&self, cloudtrail_log_path: &str) -> String {
        format!(
            "CREATE EXTERNAL TABLE IF NOT EXISTS `{table_name}` (
            `eventversion` string,
            `useridentity` struct<type:string,principalid:string,arn:string,accountid:string,invokedby:string,accesskeyid:string,username:string,sessioncontext:struct<attributes:struct<mfaauthenticated:string,creationdate:string>,sessionissuer:struct<type:string,principalid:string,arn:string,accountid:string,username:string>>>,
            `eventtime` string,
            `eventsource` string,
            `eventname` string,
            `awsregion` string,
            `sourceipaddress` string,
            `useragent` string,
            `errorcode` string,
            `errormessage` string,
            `requestparameters` string,
            `responseelements` string,
            `additionaleventdata` string,
            `requestid` string,
            `eventid` string,
            `resources` array<struct<arn:string,accountid:string,type:string>>,
            `eventtype` string,
            `apiversion` string,
            `readonly` string,
            `recipientaccountid` string,
            `serviceeventdetails` string,
            `sharedeventid` string,
            `vpcendpointid` string)
            PARTITIONED BY (region string, year string, month string)
            ROW FORMAT SERDE
            'com.amazon.emr.hive.serde.CloudTrailSerde'
            STORED AS INPUTFORMAT
            'com.amazon.emr.cloudtrail.CloudTrailInputFormat'
            OUTPUTFORMAT
            'org.apache.hadoop.hive.ql.io.HiveIgnoreKeyTextOutputFormat'
            LOCATION '{cloudtrail_log_path}'",
            table_name = self.table_name,
            cloudtrail_log_path = cloudtrail_log_path,
        )
    }

    /// Submit a query without waiting; returns the execution id.
    async fn start_query(&self, query: &str, in_database: bool) -> Result<String> {
        debug!("Making query {}", query);

        let mut request = self
            .client
            .start_query_execution()
            .query_string(query)
            .result_configuration(
                ResultConfiguration::builder()
                    .output_location(&self.output_location)
                    .build(),
            );
        if in_database {
            request = request.query_execution_context(
                QueryExecutionContext::builder().database(DATABASE).build(),
            );
        }

        let response = request
            .send()
            .await
            .context("Failed to start Athena query")?;
        response
            .query_execution_id()
            .map(|id| id.to_string())
            .context("Athena did not return a query execution id")
    }

    /// Run a query to completion and return its rows, each as a vector of
    /// column values. The first row is Athena's header and is dropped unless
    /// the statement produces none (SHOW PARTITIONS).
    async fn query_athena(
        &self,
        query: &str,
        in_database: bool,
        skip_header: bool,
    ) -> Result<Vec<Vec<String>>> {
        let query_execution_id = self.start_query(query, in_database).await?;
        self.wait_for_query(&query_execution_id).await?;

        let mut rows = Vec::new();
        let mut pages = self
            .client
            .get_query_results()
            .query_execution_id(&query_execution_id)
            .into_paginator()
            .send();
        while let Some(page) = pages.next().await {
            let page = page.context("Failed to fetch Athena query results")?;
            if let Some(result_set) = page.result_set() {
                for row in result_set.rows() {
                    let values: Vec<String> = row
                        .data()
                        .iter()
                        .map(|datum| datum.var_char_value().unwrap_or_default().to_string())
                        .collect();
                    rows.push(values);
                }
            }
        }

        if skip_header && !rows.is_empty() {
            rows.remove(0);
        }
        Ok(rows)
    }

    /// Poll until the query reaches a terminal state.
    async fn wait_for_query(&self, query_execution_id: &str) -> Result<()> {
        let mut interval = POLL_INTERVAL;
        loop {
            let response = self
                .client
                .get_query_execution()
                .query_execution_id(query_execution_id)
                .send()
                .await
                .context("Failed to poll Athena query state")?;
            let status = response
                .query_execution()
                .and_then(|execution| execution.status())
                .context("Athena returned a query execution without status")?;

            match status.state() {
                Some(QueryExecutionState::Succeeded) => return Ok(()),
                Some(QueryExecutionState::Failed) | Some(QueryExecutionState::Cancelled) => {
                    bail!(
                        "Query entered state {} with reason {}",
                        status.state().map(|state| state.as_str()).unwrap_or("?"),
                        status.state_change_reason().unwrap_or("unknown")
                    );
                }
                _ => {
                    debug!(
                        "Sleeping {:?} while query {} completes",
                        interval, query_execution_id
                    );
                    tokio::time::sleep(interval).await;
                    interval = (interval * 2).min(POLL_INTERVAL_MAX);
                }
            }
        }
    }

    /// Poll a batch of outstanding queries, retiring each as it succeeds.
    async fn wait_for_query_batch(&self, mut query_execution_ids: Vec<String>) -> Result<()> {
        while !query_execution_ids.is_empty() {
            let response = self
                .client
                .batch_get_query_execution()
                .set_query_execution_ids(Some(query_execution_ids.clone()))
                .send()
                .await
                .context("Failed to poll Athena query batch")?;

            for execution in response.query_executions() {
                let Some(status) = execution.status() else {
                    continue;
                };
                match status.state() {
                    Some(QueryExecutionState::Succeeded) => {
                        if let Some(id) = execution.query_execution_id() {
                            query_execution_ids.retain(|pending| pending != id);
                        }
                    }
                    Some(QueryExecutionState::Failed) | Some(QueryExecutionState::Cancelled) => {
                        bail!(
                            "Query entered state {} with reason {}",
                            status.state().map(|state| state.as_str()).unwrap_or("?"),
                            status.state_change_reason().unwrap_or("unknown")
                        );
                    }
                    _ => {}
                }
            }

            if query_execution_ids.is_empty() {
                break;
            }
            debug!(
                "Sleeping 1 second while {} queries complete",
                query_execution_ids.len()
            );
            tokio::time::sleep(POLL_INTERVAL).await;
        }
        Ok(())
    }

    /// Run an action query and normalize its `(eventsource, eventname)` rows.
    async fn collect_event_names(&self, query: &str) -> Result<HashSet<String>> {
        let rows = self.query_athena(query, true, true).await?;

        let mut event_names = HashSet::new();
        for row in rows {
            let Some(raw) = row.first() else { continue };
            let Some((event_source, event_name)) = parse_event_row(raw) else {
                debug!("Skipping unparseable event row: {}", raw);
                continue;
            };
            let service = service_from_event_source(&event_source);
            event_names.insert(normalize_api_call(service, &event_name));
        }
        Ok(event_names)
    }

    /// Filter matching events performed with credentials issued by an
    /// AssumeRole of `dest_role_arn` requested by the given actor. The inner
    /// subquery joins on the temporary access key id from the AssumeRole
    /// response; sharedEventId would be a more robust correlator.
    fn assumed_session_filter(&self, actor_filter: &str, dest_role_arn: &str) -> String {
        format!(
            "useridentity.accesskeyid in (\
             select json_extract_scalar(responseelements, '$.credentials.accessKeyId') \
             from {table_name} \
             where eventname = 'AssumeRole' \
             and {actor_filter} \
             and json_extract_scalar(requestparameters, '$.roleArn') = '{dest_role_arn}' \
             and {search_filter}) \
             and useridentity.sessioncontext.sessionissuer.arn = '{dest_role_arn}'",
            table_name = self.table_name,
            actor_filter = actor_filter,
            dest_role_arn = sql_quote(dest_role_arn),
            search_filter = self.search_filter,
        )
    }
}

#[async_trait]
impl CloudTrailDatasource for AthenaDatasource {
    async fn performed_users(&self) -> Result<HashSet<String>> {
        let query = format!(
            "select distinct userIdentity.userName from {} where {}",
            self.table_name, self.search_filter
        );
        let rows = self.query_athena(&query, true, true).await?;

        Ok(rows
            .into_iter()
            .filter_map(|row| row.into_iter().next())
            .filter(|user_name| user_name != HIDDEN_USERNAME_SENTINEL)
            .collect())
    }

    async fn performed_roles(&self) -> Result<HashSet<String>> {
        let query = format!(
            "select distinct userIdentity.sessionContext.sessionIssuer.userName \
             from {} where {}",
            self.table_name, self.search_filter
        );
        let rows = self.query_athena(&query, true, true).await?;

        Ok(rows
            .into_iter()
            .filter_map(|row| row.into_iter().next())
            .collect())
    }

    async fn actions_by_user(&self, user_arn: &str) -> Result<HashSet<String>> {
        let query = format!(
            "select distinct (eventsource, eventname) from {} \
             where (userIdentity.arn = '{}') and {}",
            self.table_name,
            sql_quote(user_arn),
            self.search_filter
        );
        self.collect_event_names(&query).await
    }

    async fn actions_by_role(&self, role_arn: &str) -> Result<HashSet<String>> {
        let query = format!(
            "select distinct (eventsource, eventname) from {} \
             where (userIdentity.sessionContext.sessionIssuer.arn = '{}') and {}",
            self.table_name,
            sql_quote(role_arn),
            self.search_filter
        );
        self.collect_event_names(&query).await
    }

    async fn actions_by_user_in_role(
        &self,
        user_arn: &str,
        dest_role_arn: &str,
    ) -> Result<HashSet<String>> {
        let actor_filter = format!("useridentity.arn = '{}'", sql_quote(user_arn));
        let query = format!(
            "select distinct (eventsource, eventname) from {} where {} and {}",
            self.table_name,
            self.assumed_session_filter(&actor_filter, dest_role_arn),
            self.search_filter
        );
        self.collect_event_names(&query).await
    }

    async fn actions_by_role_in_role(
        &self,
        src_role_arn: &str,
        dest_role_arn: &str,
    ) -> Result<HashSet<String>> {
        let actor_filter = format!(
            "useridentity.sessioncontext.sessionissuer.arn = '{}'",
            sql_quote(src_role_arn)
        );
        let query = format!(
            "select distinct (eventsource, eventname) from {} where {} and {}",
            self.table_name,
            self.assumed_session_filter(&actor_filter, dest_role_arn),
            self.search_filter
        );
        self.collect_event_names(&query).await
    }
}
