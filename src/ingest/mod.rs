//! Ingestion: staged documents to canonical records
//!
//! Each record flows through four total stages:
//! - `raw`: the untyped document boundary (key aliases, merge)
//! - `normalize`: canonical field names, external id, estimates, dates
//! - `transform`: Unicode/whitespace cleanup, parse-if-string
//! - `validate`: required fields and types, conversion for storage
//!
//! `pipeline` drives them over a run and owns deactivation and metrics merge.

mod normalize;
mod pipeline;
mod raw;
mod transform;
mod validate;

pub use normalize::{
    extract_external_id, normalize, parse_date, parse_estimate, parse_estimate_str, EstimateKind,
    NormalizedRecord,
};
pub use pipeline::{IngestReport, Ingestor};
pub use raw::RawRecord;
pub use transform::{clean_text, parse_if_string, transform};
pub use validate::{validate, ValidationError};
