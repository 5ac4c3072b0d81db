pub mod formatter;

pub use formatter::{format_result, to_borderless, to_markdown, to_table};
