mod common;

use bulk_user_upload::config::{EmailCollisionPolicy, FieldRuleConfig};
use bulk_user_upload::models::UploadColumns;
use bulk_user_upload::upload::{FieldOverrides, UploadTable, UsersValidator};

fn standard_validator(
    store: std::sync::Arc<dyn bulk_user_upload::backend::UserStore>,
    policy: EmailCollisionPolicy,
) -> UsersValidator {
    UsersValidator::standard(store, &UploadColumns::default(), &FieldOverrides::new(), policy)
}

#[tokio::test]
async fn test_one_message_per_invalid_column() {
    let store = common::setup_test_store().await.unwrap();
    let validator = standard_validator(store, EmailCollisionPolicy::Warning);

    let rows = vec![
        common::row(0, &[("username", "alice"), ("email", "alice@example.com")]),
        common::row(1, &[("username", "ab"), ("email", "not-an-email")]),
        common::row(
            2,
            &[
                ("username", "carol"),
                ("email", "carol@example.com"),
                ("groups", "staff, nope,ghosts"),
            ],
        ),
    ];

    let issues = validator.validate(&rows).await.unwrap();

    assert!(issues.errors_for(0).is_empty());
    assert_eq!(
        issues.errors_for(1),
        &vec![
            "email='not-an-email' is invalid.".to_string(),
            "username must consist of 3 or more alphanumeric characters or underscores"
                .to_string(),
        ]
    );
    assert_eq!(
        issues.errors_for(2),
        &vec!["nope,ghosts are not valid group names.".to_string()]
    );
}

#[tokio::test]
async fn test_unknown_permission_names_an_example() {
    let store = common::setup_test_store().await.unwrap();
    let validator = standard_validator(store, EmailCollisionPolicy::Warning);

    let rows = vec![common::row(
        0,
        &[
            ("username", "dave"),
            ("email", "dave@example.com"),
            ("permissions", "users.add_user,add_user"),
        ],
    )];

    let issues = validator.validate(&rows).await.unwrap();

    assert_eq!(
        issues.errors_for(0),
        &vec![
            "add_user are not valid permission names; expecting format app_label.codename, e.g. reports.view_report"
                .to_string()
        ]
    );
}

#[tokio::test]
async fn test_blank_identity_values_are_required() {
    let store = common::setup_test_store().await.unwrap();
    let validator = standard_validator(store, EmailCollisionPolicy::Warning);

    let rows = vec![common::row(0, &[("username", ""), ("email", "")])];
    let issues = validator.validate(&rows).await.unwrap();

    let errors = issues.errors_for(0);
    assert!(errors.contains(&"username is required".to_string()));
    assert!(errors.contains(&"email is required".to_string()));
}

#[tokio::test]
async fn test_duplicates_within_upload() {
    let store = common::setup_test_store().await.unwrap();
    let validator = standard_validator(store, EmailCollisionPolicy::Warning);

    let rows = vec![
        common::row(0, &[("username", "erin"), ("email", "Erin@Example.com")]),
        common::row(1, &[("username", "frank"), ("email", "erin@example.com")]),
        common::row(2, &[("username", "frank"), ("email", "frank@example.com")]),
        common::row(3, &[("username", "grace"), ("email", "grace@example.com")]),
    ];

    let issues = validator.validate(&rows).await.unwrap();

    for index in [0, 1] {
        let errors = issues.errors_for(index);
        assert!(
            errors.iter().any(|e| e.starts_with("row contains duplicate email=")),
            "row {index}: {errors:?}"
        );
    }
    for index in [1, 2] {
        let errors = issues.errors_for(index);
        assert!(
            errors.contains(&"row contains duplicate username='frank'".to_string()),
            "row {index}: {errors:?}"
        );
    }
    assert!(issues.errors_for(3).is_empty());
}

#[tokio::test]
async fn test_username_collision_with_another_email() {
    let store = common::setup_test_store().await.unwrap();
    common::insert_existing(&store, &[("alice", "alice@old.example.com")])
        .await
        .unwrap();
    let validator = standard_validator(store, EmailCollisionPolicy::Warning);

    let rows = vec![
        common::row(0, &[("username", "alice"), ("email", "alice@new.example.com")]),
        common::row(1, &[("username", "bob"), ("email", "bob@example.com")]),
    ];
    let issues = validator.validate(&rows).await.unwrap();

    assert_eq!(
        issues.errors_for(0),
        &vec![
            "row contains username='alice', but that user already exists with another email address"
                .to_string()
        ]
    );
    assert!(issues.is_eligible(1));
    assert!(!issues.is_eligible(0));
}

#[tokio::test]
async fn test_existing_account_with_same_email_is_not_a_collision() {
    let store = common::setup_test_store().await.unwrap();
    common::insert_existing(&store, &[("alice", "alice@example.com")])
        .await
        .unwrap();
    let validator = standard_validator(store, EmailCollisionPolicy::Error);

    let rows = vec![common::row(
        0,
        &[("username", "alice"), ("email", "ALICE@example.com")],
    )];
    let issues = validator.validate(&rows).await.unwrap();

    assert!(!issues.has_errors());
    assert!(!issues.has_warnings());
}

#[tokio::test]
async fn test_email_collision_follows_policy() {
    let store = common::setup_test_store().await.unwrap();
    common::insert_existing(&store, &[("henry", "shared@example.com")])
        .await
        .unwrap();

    let rows = vec![common::row(
        0,
        &[("username", "ivy"), ("email", "Shared@Example.com")],
    )];
    let expected =
        "row contains email='Shared@Example.com', but that email address already belongs to another username"
            .to_string();

    let warning = standard_validator(store.clone(), EmailCollisionPolicy::Warning)
        .validate(&rows)
        .await
        .unwrap();
    assert!(!warning.has_errors());
    assert_eq!(warning.warnings_for(0), &vec![expected.clone()]);
    assert!(warning.is_eligible(0));

    let error = standard_validator(store.clone(), EmailCollisionPolicy::Error)
        .validate(&rows)
        .await
        .unwrap();
    assert_eq!(error.errors_for(0), &vec![expected]);

    let off = standard_validator(store, EmailCollisionPolicy::Off)
        .validate(&rows)
        .await
        .unwrap();
    assert!(!off.has_errors());
    assert!(!off.has_warnings());
}

#[tokio::test]
async fn test_configured_field_rules() {
    let store = common::setup_test_store().await.unwrap();
    let overrides = FieldOverrides::from_config(&[
        FieldRuleConfig {
            column: "department".to_string(),
            pattern: Some(r"^[A-Z]{2,4}$".to_string()),
            message: Some("department must be a short upper-case code".to_string()),
            required: true,
            disabled: false,
        },
        FieldRuleConfig {
            column: "username".to_string(),
            pattern: None,
            message: None,
            required: true,
            disabled: true,
        },
    ])
    .unwrap();
    let validator = UsersValidator::standard(
        store,
        &UploadColumns::default(),
        &overrides,
        EmailCollisionPolicy::Warning,
    );

    let registry = validator.registry();
    assert_eq!(
        registry.required_columns(),
        vec!["email", "groups", "permissions", "department"]
    );
    assert!(!registry.contains("username"));

    let rows = vec![
        common::row(
            0,
            &[("username", "x"), ("email", "x@example.com"), ("department", "ENG")],
        ),
        common::row(
            1,
            &[("username", "yy"), ("email", "y@example.com"), ("department", "engineering")],
        ),
    ];
    let issues = validator.validate(&rows).await.unwrap();

    assert!(issues.errors_for(0).is_empty());
    assert_eq!(
        issues.errors_for(1),
        &vec!["department must be a short upper-case code".to_string()]
    );
}

#[tokio::test]
async fn test_table_and_validator_agree_on_row_numbers() {
    let store = common::setup_test_store().await.unwrap();
    let validator = standard_validator(store, EmailCollisionPolicy::Warning);

    let content = common::csv(
        "username,email",
        &["good_one,good@example.com", "bad one,bad@example.com"],
    );
    let table = UploadTable::from_csv(&content).unwrap();
    let issues = validator.validate(table.rows()).await.unwrap();

    let (index, _) = issues.errors().iter().next().unwrap();
    assert_eq!(table.rows()[*index].row_number(), 3);
}
