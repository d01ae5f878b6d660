//! Uploaded CSV parsing with the row-count and header guards

use std::collections::HashMap;

use crate::error::{AppError, AppResult};
use crate::models::UploadRow;

/// Largest number of data rows accepted in one upload
pub const MAX_UPLOAD_ROWS: usize = 100;

/// Header line plus data rows of one uploaded file
#[derive(Debug, Clone)]
pub struct UploadTable {
    headers: Vec<String>,
    rows: Vec<UploadRow>,
}

impl UploadTable {
    /// Parse a CSV payload, rejecting it when it holds more than [`MAX_UPLOAD_ROWS`] rows
    pub fn from_csv(content: &[u8]) -> AppResult<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(false)
            .trim(csv::Trim::All)
            .from_reader(content);

        let headers: Vec<String> = reader
            .headers()?
            .iter()
            .map(|header| header.to_string())
            .collect();

        let records = reader
            .records()
            .collect::<Result<Vec<csv::StringRecord>, _>>()?;

        if records.len() > MAX_UPLOAD_ROWS {
            return Err(AppError::InputShape(format!(
                "Uploads are limited to {} at a time.",
                MAX_UPLOAD_ROWS
            )));
        }

        let rows = records
            .iter()
            .enumerate()
            .map(|(index, record)| {
                let values: HashMap<String, String> = headers
                    .iter()
                    .cloned()
                    .zip(record.iter().map(str::to_string))
                    .collect();
                UploadRow::new(index, values)
            })
            .collect();

        Ok(Self { headers, rows })
    }

    /// Reject the table when any `required` column is absent, naming every missing one
    pub fn ensure_headers(&self, required: &[String]) -> AppResult<()> {
        let missing: Vec<&String> = required
            .iter()
            .filter(|column| !self.headers.contains(column))
            .collect();

        if missing.is_empty() {
            return Ok(());
        }

        Err(AppError::InputShape(format!(
            "Expected headers {:?}; got {:?}",
            missing, self.headers
        )))
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn rows(&self) -> &[UploadRow] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<UploadRow> {
        self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
