//! Utility functions shared by the upload pipeline

use chrono::{DateTime, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;

/// Prefix marking a credential that no password can ever match
pub const UNUSABLE_PASSWORD_PREFIX: &str = "!";

const UNUSABLE_PASSWORD_SUFFIX_LENGTH: usize = 40;

/// Formats a timestamp with millisecond precision
///
/// Example output: "2025-06-14T10:03:54.374Z"
pub fn format_timestamp(dt: DateTime<Utc>) -> String {
    dt.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

/// Split a comma-separated cell into trimmed, non-empty names
///
/// ```
/// use bulk_user_upload::utils::split_name_list;
///
/// assert_eq!(split_name_list(" staff, ,editors "), vec!["staff", "editors"]);
/// assert!(split_name_list("").is_empty());
/// ```
pub fn split_name_list(cell: &str) -> Vec<String> {
    cell.split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

/// Placeholder credential for accounts provisioned without a password
pub fn unusable_password() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(UNUSABLE_PASSWORD_SUFFIX_LENGTH)
        .map(char::from)
        .collect();
    format!("{}{}", UNUSABLE_PASSWORD_PREFIX, suffix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_format_timestamp() {
        let dt = Utc.with_ymd_and_hms(2025, 6, 14, 10, 3, 54).unwrap()
            + chrono::Duration::milliseconds(374);
        assert_eq!(format_timestamp(dt), "2025-06-14T10:03:54.374Z");
    }

    #[test]
    fn test_split_name_list_keeps_case() {
        assert_eq!(split_name_list("Staff,staff"), vec!["Staff", "staff"]);
        assert!(split_name_list(" , ,").is_empty());
    }

    #[test]
    fn test_unusable_password() {
        let first = unusable_password();
        let second = unusable_password();

        assert!(first.starts_with(UNUSABLE_PASSWORD_PREFIX));
        assert_eq!(first.len(), 1 + UNUSABLE_PASSWORD_SUFFIX_LENGTH);
        assert_ne!(first, second);
    }
}
