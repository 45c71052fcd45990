//! Output formatters for scan result summaries.
//!
//! - Text for people reading a build log
//! - JSON for automation and scripting
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use sastbridge::output::TextOutput;
//! use sastbridge::results::parse_report_file;
//!
//! let summary = parse_report_file(Path::new("report.xml"), "https://sast.example.com").unwrap();
//! TextOutput::new(&summary, &[]).write_to(std::io::stdout()).unwrap();
//! ```

pub mod json;
pub mod text;

pub use json::{JsonOutput, JsonOutputError};
pub use text::TextOutput;
