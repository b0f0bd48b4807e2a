//! Elasticsearch datasource.
//!
//! Same queries as the Athena backend, phrased as bucketed terms
//! aggregations over an index of CloudTrail events. Clusters differ by major
//! version in two ways that matter here: the raw-keyword field suffix
//! (`.raw` before 5, `.keyword` after) and the error filter (the legacy
//! `filtered` query on 1.x, `bool`/`must_not` everywhere else). Both are
//! decided once at connect time from the version the cluster reports.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, info};

use super::super::actions::normalize_api_call;
use super::super::config::ElasticsearchConfig;
use super::{
    service_from_event_source, CloudTrailDatasource, DateRange, HIDDEN_USERNAME_SENTINEL,
};

const DEFAULT_INDEX: &str = "cloudtrail";
const DEFAULT_TIMESTAMP_FIELD: &str = "eventTime";
const AGGREGATION_SIZE: u64 = 5000;
const SCROLL_KEEPALIVE: &str = "1m";
const SCROLL_PAGE_SIZE: u64 = 1000;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(900);

pub struct EsDatasource {
    http: reqwest::Client,
    base_url: String,
    index: String,
    timestamp_field: String,
    key_prefix: Option<String>,
    keyword_suffix: &'static str,
    major_version: u32,
    range: DateRange,
}

/// Keyword-typed fields were mapped as `.raw` multi-fields before ES 5.
pub fn keyword_suffix(major_version: u32) -> &'static str {
    if major_version < 5 {
        ".raw"
    } else {
        ".keyword"
    }
}

pub fn parse_major_version(version: &str) -> Option<u32> {
    version.split('.').next()?.parse().ok()
}

/// Assemble the full query: the caller's match clauses plus the date range
/// and the not-an-error filter, in the DSL shape the cluster understands.
pub fn build_query(
    major_version: u32,
    musts: Vec<Value>,
    timestamp_field: &str,
    range: &DateRange,
) -> Value {
    let date_filter = json!({
        "range": {
            timestamp_field: {
                "gte": range.start.to_string(),
                "lte": range.end.to_string(),
            }
        }
    });
    let error_exists = json!({"exists": {"field": "errorCode"}});

    if major_version < 2 {
        json!({
            "filtered": {
                "query": {"bool": {"must": musts}},
                "filter": {"and": [{"not": error_exists}, date_filter]},
            }
        })
    } else {
        json!({
            "bool": {
                "must": musts,
                "filter": [date_filter],
                "must_not": [error_exists],
            }
        })
    }
}

impl EsDatasource {
    pub async fn new(config: &ElasticsearchConfig, range: &DateRange) -> Result<Self> {
        let base_url = format!("http://{}:{}", config.host, config.port);
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to build HTTP client")?;

        let root: Value = http
            .get(&base_url)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .with_context(|| format!("Failed to reach Elasticsearch at {}", base_url))?
            .json()
            .await
            .context("Elasticsearch root response was not JSON")?;
        let version = root["version"]["number"]
            .as_str()
            .context("Elasticsearch did not report a version number")?;
        let major_version = parse_major_version(version)
            .with_context(|| format!("Unparseable Elasticsearch version {}", version))?;
        info!("Connected to Elasticsearch {} at {}", version, base_url);

        Ok(Self {
            http,
            base_url,
            index: config.index.clone().unwrap_or_else(|| DEFAULT_INDEX.to_string()),
            timestamp_field: config
                .timestamp_field
                .clone()
                .unwrap_or_else(|| DEFAULT_TIMESTAMP_FIELD.to_string()),
            key_prefix: config.key_prefix.clone(),
            keyword_suffix: keyword_suffix(major_version),
            major_version,
            range: *range,
        })
    }

    /// Field path for a document key, honouring the configured nesting
    /// prefix; `keyword` appends the version-appropriate raw-field suffix.
    fn field(&self, name: &str, keyword: bool) -> String {
        let base = match &self.key_prefix {
            Some(prefix) => format!("{}.{}", prefix, name),
            None => name.to_string(),
        };
        if keyword {
            format!("{}{}", base, self.keyword_suffix)
        } else {
            base
        }
    }

    fn query(&self, musts: Vec<Value>) -> Value {
        build_query(self.major_version, musts, &self.timestamp_field, &self.range)
    }

    async fn search(&self, body: &Value) -> Result<Value> {
        let url = format!("{}/{}/_search", self.base_url, self.index);
        debug!("Searching {} with {}", url, body);
        self.http
            .post(&url)
            .json(body)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .with_context(|| format!("Elasticsearch query against {} failed", self.index))?
            .json()
            .await
            .context("Elasticsearch returned a non-JSON response")
    }

    /// Run a terms aggregation and return the bucket keys.
    async fn aggregate_terms(&self, musts: Vec<Value>, field: String) -> Result<Vec<String>> {
        let body = json!({
            "size": 0,
            "query": self.query(musts),
            "aggs": {
                "names": {"terms": {"field": field, "size": AGGREGATION_SIZE}}
            }
        });
        let response = self.search(&body).await?;

        Ok(response["aggregations"]["names"]["buckets"]
            .as_array()
            .map(|buckets| {
                buckets
                    .iter()
                    .filter_map(|bucket| bucket["key"].as_str())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default())
    }

    /// Aggregate the distinct `(eventName, eventSource)` pairs matching the
    /// clauses and normalize each into a canonical action.
    async fn collect_event_names(&self, musts: Vec<Value>) -> Result<HashSet<String>> {
        let body = json!({
            "size": 0,
            "query": self.query(musts),
            "aggs": {
                "event_names": {
                    "terms": {"field": self.field("eventName", true), "size": AGGREGATION_SIZE},
                    "aggs": {
                        "service_names": {
                            "terms": {"field": self.field("eventSource", true), "size": AGGREGATION_SIZE}
                        }
                    }
                }
            }
        });
        let response = self.search(&body).await?;

        let mut event_names = HashSet::new();
        let Some(buckets) = response["aggregations"]["event_names"]["buckets"].as_array() else {
            return Ok(event_names);
        };
        for bucket in buckets {
            let Some(event_name) = bucket["key"].as_str() else { continue };
            let Some(event_source) = bucket["service_names"]["buckets"]
                .as_array()
                .and_then(|services| services.first())
                .and_then(|service| service["key"].as_str())
            else {
                continue;
            };
            let service = service_from_event_source(event_source);
            event_names.insert(normalize_api_call(service, event_name));
        }
        Ok(event_names)
    }

    /// Scroll through AssumeRole events matching the clauses and collect the
    /// temporary access key ids minted for each session. The access key is
    /// assumed unique enough to identify a role assumption; sharedEventId
    /// would be a more robust correlator.
    async fn session_keys(&self, musts: Vec<Value>) -> Result<HashSet<String>> {
        let url = format!(
            "{}/{}/_search?scroll={}",
            self.base_url, self.index, SCROLL_KEEPALIVE
        );
        let body = json!({
            "size": SCROLL_PAGE_SIZE,
            "query": self.query(musts),
        });
        let mut response: Value = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .and_then(|resp| resp.error_for_status())
            .context("Elasticsearch scroll query failed")?
            .json()
            .await
            .context("Elasticsearch returned a non-JSON response")?;

        let mut keys = HashSet::new();
        let mut scanned = 0usize;
        loop {
            let hits = response["hits"]["hits"].as_array().cloned().unwrap_or_default();
            if hits.is_empty() {
                break;
            }
            for hit in &hits {
                scanned += 1;
                if scanned % 1000 == 0 {
                    info!("{} role assumptions scanned so far...", scanned);
                }
                if let Some(key) =
                    hit["_source"]["responseElements"]["credentials"]["accessKeyId"].as_str()
                {
                    keys.insert(key.to_string());
                }
            }

            let Some(scroll_id) = response["_scroll_id"].as_str().map(str::to_string) else {
                break;
            };
            response = self
                .http
                .post(format!("{}/_search/scroll", self.base_url))
                .json(&json!({"scroll": SCROLL_KEEPALIVE, "scroll_id": scroll_id}))
                .send()
                .await
                .and_then(|resp| resp.error_for_status())
                .context("Elasticsearch scroll continuation failed")?
                .json()
                .await
                .context("Elasticsearch returned a non-JSON response")?;
        }
        Ok(keys)
    }

    /// Union of actions performed under any of the given session keys in the
    /// destination role.
    async fn actions_by_sessions(
        &self,
        session_keys: HashSet<String>,
        dest_role_arn: &str,
    ) -> Result<HashSet<String>> {
        let mut event_names = HashSet::new();
        for session_key in session_keys {
            let musts = vec![
                json!({"match": {self.field("userIdentity.accessKeyId", false): session_key}}),
                json!({"match": {
                    self.field("userIdentity.sessionContext.sessionIssuer.arn", true): dest_role_arn
                }}),
            ];
            event_names.extend(self.collect_event_names(musts).await?);
        }
        Ok(event_names)
    }
}

#[async_trait]
impl CloudTrailDatasource for EsDatasource {
    async fn performed_users(&self) -> Result<HashSet<String>> {
        let names = self
            .aggregate_terms(Vec::new(), self.field("userIdentity.userName", true))
            .await?;
        Ok(names
            .into_iter()
            .filter(|name| name != HIDDEN_USERNAME_SENTINEL)
            .collect())
    }

    async fn performed_roles(&self) -> Result<HashSet<String>> {
        let names = self
            .aggregate_terms(
                Vec::new(),
                self.field("userIdentity.sessionContext.sessionIssuer.userName", true),
            )
            .await?;
        Ok(names.into_iter().collect())
    }

    async fn actions_by_user(&self, user_arn: &str) -> Result<HashSet<String>> {
        let musts = vec![json!({"match": {self.field("userIdentity.arn", true): user_arn}})];
        self.collect_event_names(musts).await
    }

    async fn actions_by_role(&self, role_arn: &str) -> Result<HashSet<String>> {
        let musts = vec![json!({"match": {
            self.field("userIdentity.sessionContext.sessionIssuer.arn", true): role_arn
        }})];
        self.collect_event_names(musts).await
    }

    async fn actions_by_user_in_role(
        &self,
        user_arn: &str,
        dest_role_arn: &str,
    ) -> Result<HashSet<String>> {
        let musts = vec![
            json!({"match": {self.field("eventName", false): "AssumeRole"}}),
            json!({"match": {self.field("userIdentity.arn", true): user_arn}}),
            json!({"match": {self.field("requestParameters.roleArn", true): dest_role_arn}}),
        ];
        let session_keys = self.session_keys(musts).await?;
        self.actions_by_sessions(session_keys, dest_role_arn).await
    }

    async fn actions_by_role_in_role(
        &self,
        src_role_arn: &str,
        dest_role_arn: &str,
    ) -> Result<HashSet<String>> {
        let musts = vec![
            json!({"match": {self.field("eventName", false): "AssumeRole"}}),
            json!({"match": {
                self.field("userIdentity.sessionContext.sessionIssuer.arn", true): src_role_arn
            }}),
            json!({"match": {self.field("requestParameters.roleArn", true): dest_role_arn}}),
        ];
        let session_keys = self.session_keys(musts).await?;
        self.actions_by_sessions(session_keys, dest_role_arn).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn range() -> DateRange {
        DateRange::new(
            NaiveDate::from_ymd_opt(2018, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2018, 3, 1).unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn keyword_suffix_follows_major_version() {
        assert_eq!(keyword_suffix(1), ".raw");
        assert_eq!(keyword_suffix(2), ".raw");
        assert_eq!(keyword_suffix(5), ".keyword");
        assert_eq!(keyword_suffix(7), ".keyword");
    }

    #[test]
    fn version_numbers_parse_to_major() {
        assert_eq!(parse_major_version("6.8.23"), Some(6));
        assert_eq!(parse_major_version("1.7"), Some(1));
        assert_eq!(parse_major_version("banana"), None);
    }

    #[test]
    fn modern_clusters_get_bool_queries() {
        let query = build_query(6, vec![json!({"match": {"eventName": "AssumeRole"}})], "eventTime", &range());
        assert!(query["bool"]["must_not"][0]["exists"]["field"] == "errorCode");
        assert_eq!(query["bool"]["filter"][0]["range"]["eventTime"]["gte"], "2018-01-01");
        assert_eq!(query["bool"]["must"][0]["match"]["eventName"], "AssumeRole");
    }

    #[test]
    fn legacy_clusters_get_filtered_queries() {
        let query = build_query(1, Vec::new(), "eventTime", &range());
        assert!(query["filtered"]["filter"]["and"][0]["not"]["exists"]["field"] == "errorCode");
        assert_eq!(
            query["filtered"]["filter"]["and"][1]["range"]["eventTime"]["lte"],
            "2018-03-01"
        );
    }
}
