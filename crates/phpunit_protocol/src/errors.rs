//! Field-local decode failures.
//!
//! None of these abort a line: the parser records them on the event and leaves the affected field absent.

use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ProtocolError {
    #[error("malformed detail line `{line}`")]
    MalformedDetail { line: String },

    #[error("malformed location hint `{hint}`")]
    MalformedLocationHint { hint: String },

    #[error("attribute `{key}` is not an integer: `{value}`")]
    InvalidNumber { key: String, value: String },
}
