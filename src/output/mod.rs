//! Report output
//!
//! - `text`: console rendering of node reports and the cluster summary
//! - `json`: a single JSON document per run

pub mod json;
pub mod text;
