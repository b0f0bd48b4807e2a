#[cfg(test)]
mod tests {
    use cloudtracker::app::actions::iam_to_cloudtrail;
    use cloudtracker::app::catalog::ApiCatalog;
    use cloudtracker::app::iam::{AccountIam, RoleDetail, Statement};
    use cloudtracker::app::privileges::{
        get_role_allowed_actions, get_user_allowed_actions, Privileges,
    };
    use std::collections::HashSet;

    fn statement(value: serde_json::Value) -> Statement {
        serde_json::from_value(value).unwrap()
    }

    fn empty_account() -> AccountIam {
        serde_json::from_value(serde_json::json!({
            "UserDetailList": [],
            "RoleDetailList": [],
            "GroupDetailList": [],
            "Policies": []
        }))
        .unwrap()
    }

    fn test_role() -> RoleDetail {
        serde_json::from_value(serde_json::json!({
            "RoleName": "test_role",
            "Path": "/",
            "Arn": "arn:aws:iam::111111111111:role/test_role",
            "CreateDate": "2017-01-01T00:00:00Z",
            "AttachedManagedPolicies": [],
            "RolePolicyList": [
                {
                    "PolicyName": "KmsDecryptSecrets",
                    "PolicyDocument": {
                        "Version": "2012-10-17",
                        "Statement": [
                            {
                                "Action": ["kms:DescribeKey", "kms:Decrypt"],
                                "Resource": "*",
                                "Effect": "Allow",
                                "Sid": ""
                            }
                        ]
                    }
                },
                {
                    "PolicyName": "S3PutObject",
                    "PolicyDocument": {
                        "Version": "2012-10-17",
                        "Statement": [
                            {
                                "Action": ["s3:PutObject", "s3:PutObjectAcl", "s3:ListBucket"],
                                "Resource": "*",
                                "Effect": "Allow"
                            }
                        ]
                    }
                }
            ]
        }))
        .unwrap()
    }

    #[test]
    fn test_allow_and_deny_compose() {
        let catalog = ApiCatalog::load();
        let mut privileges = Privileges::new(&catalog);

        let allow = statement(serde_json::json!({
            "Action": ["s3:*ObjectT*"], "Resource": "*", "Effect": "Allow"
        }));
        let deny = statement(serde_json::json!({
            "Action": ["s3:GetObjectTagging", "s3:GetObjectTorrent"],
            "Resource": "*",
            "Effect": "Deny"
        }));
        privileges.add_stmt(&allow);
        privileges.add_stmt(&deny);

        assert_eq!(
            privileges.determine_allowed().unwrap(),
            HashSet::from([
                "s3:putobjecttagging".to_string(),
                "s3:deleteobjecttagging".to_string(),
            ])
        );
    }

    #[test]
    fn test_resource_scoped_deny_is_ignored() {
        let catalog = ApiCatalog::load();
        let mut privileges = Privileges::new(&catalog);

        let policy = [
            statement(serde_json::json!({
                "Action": "s3:*", "Effect": "Allow", "Resource": "*"
            })),
            statement(serde_json::json!({
                "Action": "s3:CreateBucket", "Effect": "Deny", "Resource": "*"
            })),
            statement(serde_json::json!({
                "Action": "s3:*",
                "Effect": "Deny",
                "Resource": [
                    "arn:aws:s3:::super-sensitive-bucket",
                    "arn:aws:s3:::super-sensitive-bucket/*"
                ]
            })),
        ];
        for stmt in &policy {
            privileges.add_stmt(stmt);
        }

        let allowed = privileges.determine_allowed().unwrap();
        assert!(allowed.contains("s3:deletebucket"));
        assert!(!allowed.contains("s3:createbucket"));
    }

    #[test]
    fn test_deny_with_wildcard_among_resources_applies() {
        let catalog = ApiCatalog::load();
        let mut privileges = Privileges::new(&catalog);

        let policy = [
            statement(serde_json::json!({
                "Action": "s3:*", "Effect": "Allow", "Resource": "*"
            })),
            statement(serde_json::json!({
                "Action": "s3:CreateBucket",
                "Effect": "Deny",
                "Resource": ["arn:aws:s3:::super-sensitive-bucket", "*"]
            })),
        ];
        for stmt in &policy {
            privileges.add_stmt(stmt);
        }

        let allowed = privileges.determine_allowed().unwrap();
        assert!(allowed.contains("s3:deletebucket"));
        assert!(!allowed.contains("s3:createbucket"));
    }

    #[test]
    fn test_condition_scoped_deny_is_ignored() {
        let catalog = ApiCatalog::load();
        let mut privileges = Privileges::new(&catalog);

        let policy = [
            statement(serde_json::json!({
                "Sid": "AllowAllActionsForEC2",
                "Effect": "Allow",
                "Action": "ec2:*",
                "Resource": "*"
            })),
            statement(serde_json::json!({
                "Sid": "DenyStopAndTerminateWhenMFAIsNotPresent",
                "Effect": "Deny",
                "Action": ["ec2:StopInstances", "ec2:TerminateInstances"],
                "Resource": "*",
                "Condition": {"BoolIfExists": {"aws:MultiFactorAuthPresent": false}}
            })),
        ];
        for stmt in &policy {
            privileges.add_stmt(stmt);
        }

        let allowed = privileges.determine_allowed().unwrap();
        assert!(allowed.contains("ec2:startinstances"));
        assert!(allowed.contains("ec2:stopinstances"));
    }

    #[test]
    fn test_get_role_allowed_actions() {
        let catalog = ApiCatalog::load();
        let role = test_role();
        let account_iam = empty_account();

        let mut allowed: Vec<String> = get_role_allowed_actions(&catalog, &role, &account_iam)
            .unwrap()
            .into_iter()
            .collect();
        allowed.sort();

        // s3:ListBucket is an IAM-only name with no CloudTrail event, so the
        // catalog does not know it and it drops out of the expansion.
        assert_eq!(
            allowed,
            vec!["kms:decrypt", "kms:describekey", "s3:putobject", "s3:putobjectacl"]
        );
    }

    #[test]
    fn test_user_privileges_flow_through_groups() {
        let catalog = ApiCatalog::load();
        let account_iam: AccountIam = serde_json::from_value(serde_json::json!({
            "UserDetailList": [{
                "UserName": "alice",
                "Arn": "arn:aws:iam::111111111111:user/alice",
                "GroupList": ["admins"],
                "AttachedManagedPolicies": [
                    {"PolicyName": "ReadKeys", "PolicyArn": "arn:aws:iam::111111111111:policy/read-keys"},
                    {"PolicyName": "Gone", "PolicyArn": "arn:aws:iam::111111111111:policy/deleted"}
                ],
                "UserPolicyList": [{
                    "PolicyName": "inline",
                    "PolicyDocument": {
                        "Statement": {"Effect": "Allow", "Action": "sqs:CreateQueue", "Resource": "*"}
                    }
                }]
            }],
            "RoleDetailList": [],
            "GroupDetailList": [{
                "GroupName": "admins",
                "AttachedManagedPolicies": [],
                "GroupPolicyList": [{
                    "PolicyName": "group-inline",
                    "PolicyDocument": {
                        "Statement": {"Effect": "Allow", "Action": "ec2:StartInstances", "Resource": "*"}
                    }
                }]
            }],
            "Policies": [{
                "Arn": "arn:aws:iam::111111111111:policy/read-keys",
                "PolicyVersionList": [{
                    "IsDefaultVersion": true,
                    "Document": {
                        "Statement": {"Effect": "Allow", "Action": "kms:ListKeys", "Resource": "*"}
                    }
                }]
            }]
        }))
        .unwrap();

        let user = account_iam.user("alice").unwrap();
        let allowed = get_user_allowed_actions(&catalog, user, &account_iam).unwrap();

        // Group inline, user managed, and user inline policies all apply;
        // the dangling managed policy ARN is skipped.
        assert_eq!(
            allowed,
            HashSet::from([
                "ec2:startinstances".to_string(),
                "kms:listkeys".to_string(),
                "sqs:createqueue".to_string(),
            ])
        );
    }

    #[test]
    fn test_allowed_actions_stay_within_the_catalog() {
        let catalog = ApiCatalog::load();
        let mut privileges = Privileges::new(&catalog);
        let everything = statement(serde_json::json!({
            "Action": "*", "Resource": "*", "Effect": "Allow"
        }));
        privileges.add_stmt(&everything);

        let allowed = privileges.determine_allowed().unwrap();
        assert!(!allowed.is_empty());
        for action in &allowed {
            // Expansion keys results by IAM name; mapping back to the
            // CloudTrail name must land in the catalog.
            assert!(
                catalog.api_list.contains(action)
                    || catalog.api_list.contains(&iam_to_cloudtrail(action)),
                "{} escaped the catalog",
                action
            );
        }
    }

    #[test]
    fn test_unknown_principals_are_fatal() {
        let account_iam = empty_account();
        assert!(account_iam.user("nobody").is_err());
        assert!(account_iam.role("nothing").is_err());
    }
}
