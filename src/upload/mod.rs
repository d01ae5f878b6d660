//! The bulk upload pipeline
//!
//! ```text
//! CSV ─▶ table (row cap, headers)
//!      ─▶ validator (field rules ─▶ row rules ─▶ frame rules)
//!      ─▶ creator (one store transaction)
//!      ─▶ notify (after commit)
//! ```
//!
//! [`session::UploadSession`] drives the stages and builds the report.

pub mod creator;
pub mod field_rules;
pub mod notify;
pub mod session;
pub mod table;
pub mod validator;

pub use creator::{AccountCreator, LowercaseEmail, RowPreProcessor, UsersCreator};
pub use field_rules::{FieldOverrides, FieldRule, FieldValidatorRegistry, PredicateRule, RuleOutcome};
pub use notify::{LogMailTransport, MailTransport, OutboundEmail, SmtpMailTransport};
pub use session::{SubmitOptions, UploadOutcome, UploadReport, UploadSession, ValidatorFactory};
pub use table::{UploadTable, MAX_UPLOAD_ROWS};
pub use validator::{FrameRule, RowRule, UsersValidator};
