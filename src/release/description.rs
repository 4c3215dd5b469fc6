//! Plugin description extraction from the README

use crate::common::{Error, Result};

use super::changelog::markdown_to_html;

pub const DESCRIPTION_START: &str = "<!-- Plugin description -->";
pub const DESCRIPTION_END: &str = "<!-- Plugin description end -->";

/// Extract the Markdown between the description markers and render it to HTML
pub fn extract_description(readme: &str) -> Result<String> {
    let lines: Vec<&str> = readme.lines().collect();
    let start = lines.iter().position(|l| l.trim() == DESCRIPTION_START);
    let end = lines.iter().position(|l| l.trim() == DESCRIPTION_END);

    match (start, end) {
        (Some(start), Some(end)) if start < end => {
            Ok(markdown_to_html(&lines[start + 1..end].join("\n")))
        }
        _ => Err(Error::DescriptionNotFound {
            start: DESCRIPTION_START.to_string(),
            end: DESCRIPTION_END.to_string(),
        }),
    }
}
