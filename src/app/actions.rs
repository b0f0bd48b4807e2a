//! Canonical action names.
//!
//! CloudTrail and IAM do not agree on what API calls are named, so every
//! action that enters the evaluator is funneled through [`normalize_api_call`]
//! first. Actions are kept as lowercase `service:event` strings in the IAM
//! namespace; conversion from CloudTrail names happens at datasource ingress.

use once_cell::sync::Lazy;
use std::collections::{HashMap, HashSet};

/// CloudTrail event source -> IAM service name.
pub static SERVICE_RENAMES: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([("monitoring", "cloudwatch"), ("email", "ses")])
});

/// IAM action name -> CloudTrail event name (the S3 SOAP-era disparities).
pub static EVENT_RENAMES: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("s3:listallmybuckets", "s3:listbuckets"),
        ("s3:getbucketaccesscontrolpolicy", "s3:getbucketacl"),
        ("s3:setbucketaccesscontrolpolicy", "s3:putbucketacl"),
        ("s3:getbucketloggingstatus", "s3:getbucketlogging"),
        ("s3:setbucketloggingstatus", "s3:putbucketlogging"),
    ])
});

/// Actions that appear in CloudTrail but cannot be granted or denied by IAM.
/// They are allowed by default and excluded from the "invoked but not
/// granted" column of the report.
pub static NO_IAM: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    HashSet::from([
        "sts:getcalleridentity",
        "sts:getsessiontoken",
        "signin:consolelogin",
        "signin:checkmfa",
        "signin:exitrole",
        "signin:renewrole",
        "signin:switchrole",
    ])
});

/// Translate an API call to its canonical representation.
///
/// Lowercases both parts, strips the API-version date suffix some services
/// append to event names (`CreateDistribution2015_07_27`), and applies the
/// service renames. The date strip splits on the first `"20"` substring, so
/// an event name containing a literal "20" ahead of its year suffix would be
/// over-truncated; no current AWS API name does.
pub fn normalize_api_call(service: &str, event_name: &str) -> String {
    let service = service.to_lowercase();
    let event_name = event_name.to_lowercase();

    let event_name = event_name.split("20").next().unwrap_or_default();

    let service = SERVICE_RENAMES
        .get(service.as_str())
        .copied()
        .unwrap_or(service.as_str());

    format!("{}:{}", service, event_name)
}

/// Map a CloudTrail-side action name back to its IAM name. Identity for
/// anything outside the rename table.
pub fn cloudtrail_to_iam(action: &str) -> String {
    for (iam_name, cloudtrail_name) in EVENT_RENAMES.iter() {
        if action == *cloudtrail_name {
            return iam_name.to_string();
        }
    }
    action.to_string()
}

/// Map an IAM action name to the name CloudTrail records it under.
pub fn iam_to_cloudtrail(action: &str) -> String {
    EVENT_RENAMES
        .get(action)
        .map(|name| name.to_string())
        .unwrap_or_else(|| action.to_string())
}

/// True for actions CloudTrail emits that have no IAM equivalent.
pub fn is_no_iam(action: &str) -> bool {
    NO_IAM.contains(action)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_date_suffix() {
        assert_eq!(normalize_api_call("lambda", "ListTags20170331"), "lambda:listtags");
        assert_eq!(
            normalize_api_call("cloudfront", "CreateDistribution2015_07_27"),
            "cloudfront:createdistribution"
        );
    }

    #[test]
    fn normalize_renames_services() {
        assert_eq!(
            normalize_api_call("monitoring", "DescribeAlarms"),
            "cloudwatch:describealarms"
        );
        assert_eq!(normalize_api_call("email", "SendEmail"), "ses:sendemail");
    }

    #[test]
    fn normalize_is_idempotent() {
        let normalized = normalize_api_call("monitoring", "DescribeAlarms");
        let (service, event) = normalized.split_once(':').unwrap();
        assert_eq!(normalize_api_call(service, event), normalized);
    }

    #[test]
    fn event_renames_round_trip() {
        assert_eq!(cloudtrail_to_iam("s3:listbuckets"), "s3:listallmybuckets");
        assert_eq!(iam_to_cloudtrail("s3:listallmybuckets"), "s3:listbuckets");
        assert_eq!(cloudtrail_to_iam("s3:createbucket"), "s3:createbucket");
    }

    #[test]
    fn no_iam_contains_sts_identity_calls() {
        assert!(is_no_iam("sts:getcalleridentity"));
        assert!(is_no_iam("signin:consolelogin"));
        assert!(!is_no_iam("s3:createbucket"));
    }
}
