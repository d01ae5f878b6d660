//! Field Validator Registry
//!
//! An ordered list of per-column rules. Each rule decides whether one cell is
//! invalid and builds the message reported for it. The base set covers the
//! identity columns and the group/permission grant columns; callers replace,
//! remove or add rules through [`FieldOverrides`].

use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use std::sync::Arc;
use tokio::sync::OnceCell;

use crate::backend::{NameMap, UserStore};
use crate::config::FieldRuleConfig;
use crate::error::{AppError, AppResult};
use crate::models::{UploadColumns, UploadRow};
use crate::utils::split_name_list;

lazy_static! {
    static ref USERNAME_REGEX: Regex = Regex::new(r"^[A-Za-z0-9_]{3,}$").unwrap();
    static ref EMAIL_REGEX: Regex =
        Regex::new(r"^[a-zA-Z0-9_.+-]+@[a-zA-Z0-9-]+\.[a-zA-Z0-9-.]+$").unwrap();
}

/// Result of checking one cell
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleOutcome {
    Valid,
    /// Invalid, with the offending parts of the value (may be empty)
    Invalid(Vec<String>),
}

impl RuleOutcome {
    pub fn is_invalid(&self) -> bool {
        matches!(self, RuleOutcome::Invalid(_))
    }
}

/// Validation rule bound to one column
#[async_trait]
pub trait FieldRule: Send + Sync {
    async fn evaluate(&self, value: &str) -> AppResult<RuleOutcome>;

    /// Message reported for an invalid cell
    fn message(&self, column: &str, value: &str, _detail: &[String]) -> String {
        format!("{}='{}' is invalid.", column, value)
    }
}

type Predicate = Box<dyn Fn(&str) -> bool + Send + Sync>;
type MessageBuilder = Box<dyn Fn(&str) -> String + Send + Sync>;

/// Rule made of a synchronous predicate (`true` means invalid) and an optional message builder
pub struct PredicateRule {
    is_invalid: Predicate,
    message: Option<MessageBuilder>,
}

impl PredicateRule {
    pub fn new(is_invalid: impl Fn(&str) -> bool + Send + Sync + 'static) -> Self {
        Self {
            is_invalid: Box::new(is_invalid),
            message: None,
        }
    }

    pub fn with_message(mut self, message: impl Fn(&str) -> String + Send + Sync + 'static) -> Self {
        self.message = Some(Box::new(message));
        self
    }

    /// Invalid when the value is non-empty and does not match `pattern`
    pub fn pattern(pattern: Regex) -> Self {
        Self::new(move |value| !value.is_empty() && !pattern.is_match(value))
    }
}

#[async_trait]
impl FieldRule for PredicateRule {
    async fn evaluate(&self, value: &str) -> AppResult<RuleOutcome> {
        if (self.is_invalid)(value) {
            Ok(RuleOutcome::Invalid(Vec::new()))
        } else {
            Ok(RuleOutcome::Valid)
        }
    }

    fn message(&self, column: &str, value: &str, _detail: &[String]) -> String {
        match &self.message {
            Some(build) => build(value),
            None => format!("{}='{}' is invalid.", column, value),
        }
    }
}

/// Blank passes; presence is checked by the required-value row rule
pub fn username_rule() -> PredicateRule {
    PredicateRule::new(|value| !value.is_empty() && !USERNAME_REGEX.is_match(value)).with_message(
        |_| "username must consist of 3 or more alphanumeric characters or underscores".to_string(),
    )
}

pub fn email_rule() -> PredicateRule {
    PredicateRule::new(|value| !value.is_empty() && !EMAIL_REGEX.is_match(value))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameListKind {
    Groups,
    Permissions,
}

/// Tokens of a comma-separated cell missing from `names`, in cell order
pub fn unknown_names(cell: &str, names: &NameMap) -> Vec<String> {
    split_name_list(cell)
        .into_iter()
        .filter(|name| !names.contains_key(name))
        .collect()
}

/// Checks a comma-separated list of group or permission names against the store
///
/// The name map is read on first use and kept for the life of the rule.
pub struct NameListRule {
    kind: NameListKind,
    store: Arc<dyn UserStore>,
    names: OnceCell<NameMap>,
}

impl NameListRule {
    pub fn new(kind: NameListKind, store: Arc<dyn UserStore>) -> Self {
        Self {
            kind,
            store,
            names: OnceCell::new(),
        }
    }

    async fn names(&self) -> AppResult<&NameMap> {
        self.names
            .get_or_try_init(|| async {
                match self.kind {
                    NameListKind::Groups => self.store.group_names().await,
                    NameListKind::Permissions => self.store.permission_names().await,
                }
            })
            .await
    }

    /// A stable sample permission name for the format hint
    fn example_name(&self) -> Option<&str> {
        self.names
            .get()
            .and_then(|names| names.keys().min())
            .map(String::as_str)
    }
}

#[async_trait]
impl FieldRule for NameListRule {
    async fn evaluate(&self, value: &str) -> AppResult<RuleOutcome> {
        if split_name_list(value).is_empty() {
            return Ok(RuleOutcome::Valid);
        }

        let unknown = unknown_names(value, self.names().await?);
        if unknown.is_empty() {
            Ok(RuleOutcome::Valid)
        } else {
            Ok(RuleOutcome::Invalid(unknown))
        }
    }

    fn message(&self, _column: &str, _value: &str, detail: &[String]) -> String {
        let listed = detail.join(",");
        match self.kind {
            NameListKind::Groups => format!("{} are not valid group names.", listed),
            NameListKind::Permissions => match self.example_name() {
                Some(example) => format!(
                    "{} are not valid permission names; expecting format app_label.codename, e.g. {}",
                    listed, example
                ),
                None => format!(
                    "{} are not valid permission names; expecting format app_label.codename",
                    listed
                ),
            },
        }
    }
}

/// Change applied to one column of the base registry
#[derive(Clone)]
pub enum FieldOverride {
    /// Drop the column's rule (and its header requirement)
    Remove,
    Set {
        rule: Arc<dyn FieldRule>,
        required: bool,
    },
}

/// Ordered per-column overrides merged over the base rules
#[derive(Clone, Default)]
pub struct FieldOverrides {
    entries: Vec<(String, FieldOverride)>,
}

impl FieldOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the column's rule, or add it as a required column
    pub fn replace(mut self, column: impl Into<String>, rule: impl FieldRule + 'static) -> Self {
        self.entries.push((
            column.into(),
            FieldOverride::Set {
                rule: Arc::new(rule),
                required: true,
            },
        ));
        self
    }

    /// Like [`FieldOverrides::replace`] without requiring the header
    pub fn optional(mut self, column: impl Into<String>, rule: impl FieldRule + 'static) -> Self {
        self.entries.push((
            column.into(),
            FieldOverride::Set {
                rule: Arc::new(rule),
                required: false,
            },
        ));
        self
    }

    pub fn remove(mut self, column: impl Into<String>) -> Self {
        self.entries.push((column.into(), FieldOverride::Remove));
        self
    }

    /// Build overrides from the `upload.field_rules` config section
    pub fn from_config(rules: &[FieldRuleConfig]) -> AppResult<Self> {
        let mut overrides = Self::new();

        for config in rules {
            if config.disabled {
                overrides = overrides.remove(config.column.clone());
                continue;
            }

            let pattern = match &config.pattern {
                Some(pattern) => pattern,
                None => {
                    return Err(AppError::Configuration(format!(
                        "Field rule for '{}' needs a pattern or disabled: true",
                        config.column
                    )))
                }
            };
            let regex = Regex::new(pattern).map_err(|e| {
                AppError::Configuration(format!(
                    "Invalid pattern for field rule '{}': {}",
                    config.column, e
                ))
            })?;

            let mut rule = PredicateRule::pattern(regex);
            if let Some(message) = config.message.clone() {
                rule = rule.with_message(move |_| message.clone());
            }

            overrides = if config.required {
                overrides.replace(config.column.clone(), rule)
            } else {
                overrides.optional(config.column.clone(), rule)
            };
        }

        Ok(overrides)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// One registered column rule
#[derive(Clone)]
pub struct FieldEntry {
    pub column: String,
    pub rule: Arc<dyn FieldRule>,
    /// Whether the header must be present in the upload
    pub required: bool,
}

/// Ordered column rules checked against every row
#[derive(Clone, Default)]
pub struct FieldValidatorRegistry {
    entries: Vec<FieldEntry>,
}

impl FieldValidatorRegistry {
    /// Base rules for email, username, groups and permissions with `overrides` merged in order
    ///
    /// Every base column is a required header until an override removes it.
    /// An override for a registered column keeps that column's position; new
    /// columns are appended.
    pub fn build(
        store: Arc<dyn UserStore>,
        columns: &UploadColumns,
        overrides: &FieldOverrides,
    ) -> Self {
        let mut registry = Self::default();
        registry.insert(columns.email.clone(), Arc::new(email_rule()), true);
        registry.insert(columns.username.clone(), Arc::new(username_rule()), true);
        registry.insert(
            columns.groups.clone(),
            Arc::new(NameListRule::new(NameListKind::Groups, store.clone())),
            true,
        );
        registry.insert(
            columns.permissions.clone(),
            Arc::new(NameListRule::new(NameListKind::Permissions, store)),
            true,
        );

        for (column, change) in &overrides.entries {
            match change {
                FieldOverride::Remove => registry.remove(column),
                FieldOverride::Set { rule, required } => {
                    registry.insert(column.clone(), rule.clone(), *required)
                }
            }
        }

        registry
    }

    /// Add a rule, replacing any existing rule for the column in place
    pub fn insert(&mut self, column: String, rule: Arc<dyn FieldRule>, required: bool) {
        match self.entries.iter_mut().find(|entry| entry.column == column) {
            Some(entry) => {
                entry.rule = rule;
                entry.required = required;
            }
            None => self.entries.push(FieldEntry {
                column,
                rule,
                required,
            }),
        }
    }

    pub fn remove(&mut self, column: &str) {
        self.entries.retain(|entry| entry.column != column);
    }

    pub fn entries(&self) -> &[FieldEntry] {
        &self.entries
    }

    pub fn contains(&self, column: &str) -> bool {
        self.entries.iter().any(|entry| entry.column == column)
    }

    /// Every registered column, in check order
    pub fn columns(&self) -> Vec<String> {
        self.entries.iter().map(|entry| entry.column.clone()).collect()
    }

    /// Columns an upload must carry
    pub fn required_columns(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|entry| entry.required)
            .map(|entry| entry.column.clone())
            .collect()
    }

    pub fn optional_columns(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|entry| !entry.required)
            .map(|entry| entry.column.clone())
            .collect()
    }

    /// Messages for every invalid cell of `row`, in registry order
    pub async fn check_row(&self, row: &UploadRow) -> AppResult<Vec<String>> {
        let mut messages = Vec::new();
        for entry in &self.entries {
            let value = row.value(&entry.column);
            if let RuleOutcome::Invalid(detail) = entry.rule.evaluate(value).await? {
                messages.push(entry.rule.message(&entry.column, value, &detail));
            }
        }
        Ok(messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_username_rule() {
        let rule = username_rule();

        for valid in ["", "abc", "user_01", "ABC_def_9"] {
            assert_eq!(rule.evaluate(valid).await.unwrap(), RuleOutcome::Valid, "{valid}");
        }
        for invalid in ["ab", "has space", "dash-name", "émile"] {
            assert!(rule.evaluate(invalid).await.unwrap().is_invalid(), "{invalid}");
        }
        assert_eq!(
            rule.message("username", "ab", &[]),
            "username must consist of 3 or more alphanumeric characters or underscores"
        );
    }

    #[tokio::test]
    async fn test_email_rule() {
        let rule = email_rule();

        for valid in ["", "a@b.co", "first.last+tag@mail-host.example.org", "x_y@d.io"] {
            assert_eq!(rule.evaluate(valid).await.unwrap(), RuleOutcome::Valid, "{valid}");
        }
        for invalid in ["plain", "a@b", "a b@c.io", "a@b_c.io", "@c.io"] {
            assert!(rule.evaluate(invalid).await.unwrap().is_invalid(), "{invalid}");
        }
        assert_eq!(rule.message("email", "plain", &[]), "email='plain' is invalid.");
    }

    #[test]
    fn test_unknown_names_trims_and_skips_blanks() {
        let names: NameMap = [("staff".to_string(), 1), ("editors".to_string(), 2)]
            .into_iter()
            .collect();

        assert!(unknown_names(" staff , editors,, ", &names).is_empty());
        assert_eq!(
            unknown_names("staff,Staff, ghosts", &names),
            vec!["Staff".to_string(), "ghosts".to_string()]
        );
    }

    #[test]
    fn test_pattern_rule_from_config() {
        let overrides = FieldOverrides::from_config(&[FieldRuleConfig {
            column: "name".to_string(),
            pattern: Some("^[A-Z]".to_string()),
            message: Some("name must be capitalised".to_string()),
            required: true,
            disabled: false,
        }])
        .unwrap();
        assert!(!overrides.is_empty());

        let bad = FieldOverrides::from_config(&[FieldRuleConfig {
            column: "name".to_string(),
            pattern: Some("([".to_string()),
            message: None,
            required: true,
            disabled: false,
        }]);
        assert!(matches!(bad, Err(AppError::Configuration(_))));
    }
}
