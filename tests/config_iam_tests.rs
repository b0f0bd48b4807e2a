#[cfg(test)]
mod tests {
    use cloudtracker::app::config::Config;
    use cloudtracker::app::iam::AccountIam;
    use std::io::Write;

    fn write_temp(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{}", contents).unwrap();
        file
    }

    #[test]
    fn test_config_round_trip_from_disk() {
        let config_file = write_temp(
            "
accounts:
  - name: demo
    id: 111111111111
    iam: data/get-account-authorization-details.json
athena:
  s3_bucket: my-cloudtrail-bucket
  path: cloudtrail
  output_s3_bucket: s3://my-results-bucket
",
        );

        let config = Config::load(config_file.path()).unwrap();
        let account = config.account("demo").unwrap();
        assert_eq!(account.id, "111111111111");
        assert_eq!(
            config.athena.as_ref().unwrap().output_s3_bucket.as_deref(),
            Some("s3://my-results-bucket")
        );
        assert!(config.elasticsearch.is_none());
    }

    #[test]
    fn test_config_without_a_datasource_is_rejected() {
        let config_file = write_temp(
            "
accounts:
  - name: demo
    id: 111111111111
    iam: iam.json
",
        );

        assert!(Config::load(config_file.path()).is_err());
    }

    #[test]
    fn test_elasticsearch_section_selects_that_backend() {
        let config_file = write_temp(
            "
accounts:
  - name: demo
    id: 111111111111
    iam: iam.json
elasticsearch:
  host: localhost
  port: 9200
  index: cloudtrail
  timestamp_field: eventTime
",
        );

        let config = Config::load(config_file.path()).unwrap();
        let es = config.elasticsearch.unwrap();
        assert_eq!(es.host, "localhost");
        assert_eq!(es.port, 9200);
        assert_eq!(es.index.as_deref(), Some("cloudtrail"));
    }

    #[test]
    fn test_iam_snapshot_loads_from_disk() {
        let iam_file = write_temp(
            &serde_json::json!({
                "UserDetailList": [
                    {"UserName": "alice", "Arn": "arn:aws:iam::111111111111:user/alice"},
                    {"UserName": "bob", "Arn": "arn:aws:iam::111111111111:user/bob"}
                ],
                "RoleDetailList": [
                    {"RoleName": "deploy", "Arn": "arn:aws:iam::111111111111:role/deploy"}
                ],
                "GroupDetailList": [],
                "Policies": []
            })
            .to_string(),
        );

        let account_iam = AccountIam::load(iam_file.path()).unwrap();
        assert_eq!(account_iam.user_names(), vec!["alice", "bob"]);
        assert_eq!(account_iam.role_names(), vec!["deploy"]);
        assert_eq!(
            account_iam.user("alice").unwrap().arn,
            "arn:aws:iam::111111111111:user/alice"
        );
    }

    #[test]
    fn test_unreadable_iam_file_is_fatal() {
        assert!(AccountIam::load(std::path::Path::new("/nonexistent/iam.json")).is_err());
    }
}
