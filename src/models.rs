use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Line offset between a row's 0-based index and its line in the uploaded file
/// (one header line, 1-based numbering).
pub const ROW_NUMBER_OFFSET: usize = 2;

/// Column names the pipeline treats specially
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadColumns {
    pub username: String,
    pub email: String,
    pub groups: String,
    pub permissions: String,
}

impl Default for UploadColumns {
    fn default() -> Self {
        Self {
            username: "username".to_string(),
            email: "email".to_string(),
            groups: "groups".to_string(),
            permissions: "permissions".to_string(),
        }
    }
}

/// One prospective account from an uploaded file
#[derive(Debug, Clone, PartialEq)]
pub struct UploadRow {
    index: usize,
    values: HashMap<String, String>,
}

impl UploadRow {
    pub fn new(index: usize, values: HashMap<String, String>) -> Self {
        Self { index, values }
    }

    /// Build a row from `(column, value)` pairs
    pub fn from_pairs<K, V>(index: usize, pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self::new(
            index,
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// 0-based position of the row in the upload
    pub fn index(&self) -> usize {
        self.index
    }

    /// Line number of the row in the uploaded file
    pub fn row_number(&self) -> usize {
        self.index + ROW_NUMBER_OFFSET
    }

    pub fn get(&self, column: &str) -> Option<&str> {
        self.values.get(column).map(String::as_str)
    }

    /// Cell value, missing cells read as empty
    pub fn value(&self, column: &str) -> &str {
        self.get(column).unwrap_or("")
    }

    pub fn values(&self) -> &HashMap<String, String> {
        &self.values
    }

    /// Copy of this row with one cell replaced
    pub fn with_value(&self, column: &str, value: String) -> Self {
        let mut values = self.values.clone();
        values.insert(column.to_string(), value);
        Self {
            index: self.index,
            values,
        }
    }
}

/// Username/email pair used for collision lookups
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identity {
    pub username: String,
    pub email: String,
}

impl Identity {
    pub fn from_row(row: &UploadRow, columns: &UploadColumns) -> Self {
        Self {
            username: row.value(&columns.username).to_string(),
            email: row.value(&columns.email).to_string(),
        }
    }
}

/// An account record held by the user store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: Option<i64>,
    pub username: String,
    pub email: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    pub is_active: bool,
    pub is_staff: bool,
    pub date_joined: DateTime<Utc>,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl Account {
    pub fn new(username: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: None,
            username: username.into(),
            email: email.into(),
            first_name: String::new(),
            last_name: String::new(),
            is_active: true,
            is_staff: false,
            date_joined: Utc::now(),
            attributes: BTreeMap::new(),
        }
    }
}

/// Store-native group and permission ids resolved from one row
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessGrant {
    pub group_ids: Vec<i64>,
    pub permission_ids: Vec<i64>,
}

impl AccessGrant {
    pub fn is_empty(&self) -> bool {
        self.group_ids.is_empty() && self.permission_ids.is_empty()
    }
}

/// Group and permission names attached to a stored account
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GrantNames {
    pub groups: Vec<String>,
    pub permissions: Vec<String>,
}

/// Outcome of one creation call
#[derive(Debug, Clone, Default)]
pub struct CreationResult {
    /// Newly inserted accounts with store-assigned ids, in upload order
    pub created: Vec<Account>,
    /// Pre-existing accounts matched by username, left untouched
    pub skipped: Vec<Account>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

/// Errors and warnings accumulated per row index
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationIssues {
    errors: BTreeMap<usize, Vec<String>>,
    warnings: BTreeMap<usize, Vec<String>>,
}

impl ValidationIssues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, severity: Severity, row_index: usize, message: impl Into<String>) {
        let target = match severity {
            Severity::Error => &mut self.errors,
            Severity::Warning => &mut self.warnings,
        };
        target.entry(row_index).or_default().push(message.into());
    }

    pub fn error(&mut self, row_index: usize, message: impl Into<String>) {
        self.push(Severity::Error, row_index, message);
    }

    pub fn warning(&mut self, row_index: usize, message: impl Into<String>) {
        self.push(Severity::Warning, row_index, message);
    }

    pub fn errors(&self) -> &BTreeMap<usize, Vec<String>> {
        &self.errors
    }

    pub fn warnings(&self) -> &BTreeMap<usize, Vec<String>> {
        &self.warnings
    }

    pub fn errors_for(&self, row_index: usize) -> &[String] {
        self.errors.get(&row_index).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn warnings_for(&self, row_index: usize) -> &[String] {
        self.warnings
            .get(&row_index)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }

    /// Rows with at least one error never reach creation
    pub fn is_eligible(&self, row_index: usize) -> bool {
        !self.errors.contains_key(&row_index)
    }
}
