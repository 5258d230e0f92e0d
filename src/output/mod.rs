//! Result reporting
//!
//! - `text`: console tables for coordinator and worker reports
//! - `json`: machine-readable run report

pub mod json;
pub mod text;
