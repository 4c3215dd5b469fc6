//! Keep a Changelog parsing, change-notes selection and rendering
//!
//! The document is read by the caller; everything here is a pure transform
//! over its text.
//!
//! ```text
//! # Changelog
//!
//! ## [Unreleased]
//! ### Added
//! - Something new
//!
//! ## [2.1.6] - 2024-11-02
//! ### Fixed
//! - Something broken
//! ```

use pulldown_cmark::{html, Options, Parser};
use serde::Serialize;

use crate::common::{Error, Result};

use super::version::Version;

/// Output format for rendered entries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputType {
    Markdown,
    #[default]
    Html,
    #[value(name = "text")]
    PlainText,
}

/// A labelled group of changes (`### Added`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangeSection {
    /// Empty for items written before the first group heading
    pub label: String,
    pub items: Vec<String>,
}

/// One `## ` entry of the changelog
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangelogEntry {
    /// Version text, or the unreleased label for the unreleased entry
    pub version: String,
    pub date: Option<String>,
    pub unreleased: bool,
    pub sections: Vec<ChangeSection>,
    #[serde(skip)]
    with_header: bool,
    #[serde(skip)]
    with_empty_sections: bool,
    #[serde(skip)]
    heading_line: usize,
}

impl ChangelogEntry {
    /// Copy of this entry with the `## ` heading shown or suppressed
    pub fn with_header(mut self, header: bool) -> Self {
        self.with_header = header;
        self
    }

    /// Copy of this entry with item-less groups kept or omitted
    pub fn with_empty_sections(mut self, empty_sections: bool) -> Self {
        self.with_empty_sections = empty_sections;
        self
    }

    fn heading(&self) -> String {
        match &self.date {
            Some(date) => format!("## [{}] - {}", self.version, date),
            None => format!("## [{}]", self.version),
        }
    }

    fn visible_sections(&self) -> impl Iterator<Item = &ChangeSection> {
        self.sections.iter().filter(move |s| {
            if s.label.is_empty() {
                !s.items.is_empty()
            } else {
                self.with_empty_sections || !s.items.is_empty()
            }
        })
    }

    /// Render the entry as Markdown
    pub fn to_markdown(&self) -> String {
        let mut blocks = Vec::new();
        if self.with_header {
            blocks.push(self.heading());
        }
        for section in self.visible_sections() {
            let mut block = String::new();
            if !section.label.is_empty() {
                block.push_str("### ");
                block.push_str(&section.label);
                if !section.items.is_empty() {
                    block.push('\n');
                }
            }
            let items: Vec<String> = section.items.iter().map(|i| format!("- {}", i)).collect();
            block.push_str(&items.join("\n"));
            blocks.push(block);
        }
        let mut out = blocks.join("\n\n");
        if !out.is_empty() {
            out.push('\n');
        }
        out
    }

    /// Render the entry in the requested format
    pub fn render(&self, output: OutputType) -> String {
        match output {
            OutputType::Markdown => self.to_markdown(),
            OutputType::Html => markdown_to_html(&self.to_markdown()),
            OutputType::PlainText => self
                .to_markdown()
                .lines()
                .map(|line| line.trim_start_matches('#').trim_start())
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

/// Render Markdown text to HTML
pub fn markdown_to_html(markdown: &str) -> String {
    let parser = Parser::new_ext(markdown, Options::ENABLE_STRIKETHROUGH | Options::ENABLE_TABLES);
    let mut out = String::with_capacity(markdown.len() * 3 / 2);
    html::push_html(&mut out, parser);
    out
}

/// A parsed changelog document
#[derive(Debug, Clone)]
pub struct Changelog {
    lines: Vec<String>,
    entries: Vec<ChangelogEntry>,
}

impl Changelog {
    /// Parse changelog text, recognizing `unreleased_label` (case-insensitive,
    /// bracketed or not) as the unreleased entry
    pub fn parse(text: &str, unreleased_label: &str) -> Self {
        let lines: Vec<String> = text.lines().map(str::to_string).collect();
        let mut entries: Vec<ChangelogEntry> = Vec::new();

        for (index, line) in lines.iter().enumerate() {
            if let Some(heading) = line.strip_prefix("## ") {
                let (title, date) = split_heading(heading);
                entries.push(ChangelogEntry {
                    unreleased: title.eq_ignore_ascii_case(unreleased_label),
                    version: title,
                    date,
                    sections: Vec::new(),
                    with_header: true,
                    with_empty_sections: true,
                    heading_line: index,
                });
                continue;
            }

            let Some(entry) = entries.last_mut() else {
                continue;
            };

            if let Some(label) = line.strip_prefix("### ") {
                entry.sections.push(ChangeSection {
                    label: label.trim().to_string(),
                    items: Vec::new(),
                });
            } else if let Some(item) = line
                .trim_start()
                .strip_prefix("- ")
                .or_else(|| line.trim_start().strip_prefix("* "))
                .filter(|_| !line.starts_with("  "))
            {
                if entry.sections.is_empty() {
                    entry.sections.push(ChangeSection {
                        label: String::new(),
                        items: Vec::new(),
                    });
                }
                if let Some(section) = entry.sections.last_mut() {
                    section.items.push(item.trim().to_string());
                }
            } else if line.starts_with(char::is_whitespace) && !line.trim().is_empty() {
                // continuation of the previous item
                if let Some(last) = entry
                    .sections
                    .last_mut()
                    .and_then(|s| s.items.last_mut())
                {
                    last.push(' ');
                    last.push_str(line.trim());
                }
            }
        }

        Self { lines, entries }
    }

    pub fn entries(&self) -> &[ChangelogEntry] {
        &self.entries
    }

    /// Entry whose heading names exactly `version`
    pub fn get(&self, version: &str) -> Option<&ChangelogEntry> {
        self.entries
            .iter()
            .find(|e| !e.unreleased && e.version == version)
    }

    /// Rename the unreleased entry to `version` and open a fresh, empty
    /// unreleased entry above it.
    ///
    /// Returns `Ok(None)` when `version` already has an entry.
    pub fn patch(&self, version: &Version, date: &str) -> Result<Option<String>> {
        if self.get(version.as_str()).is_some() {
            return Ok(None);
        }

        let unreleased = single_unreleased(&self.entries)?
            .ok_or_else(|| Error::ChangelogEntryNotFound(version.to_string()))?;

        let mut out: Vec<String> = Vec::with_capacity(self.lines.len() + 2);
        for (index, line) in self.lines.iter().enumerate() {
            if index == unreleased.heading_line {
                out.push(format!("## [{}]", unreleased.version));
                out.push(String::new());
                out.push(format!("## [{}] - {}", version, date));
            } else {
                out.push(line.clone());
            }
        }

        let mut text = out.join("\n");
        text.push('\n');
        Ok(Some(text))
    }
}

fn split_heading(heading: &str) -> (String, Option<String>) {
    let heading = heading.trim();

    if let Some(rest) = heading.strip_prefix('[') {
        if let Some((title, after)) = rest.split_once(']') {
            let date = after.trim().trim_start_matches('-').trim();
            return (
                title.trim().to_string(),
                (!date.is_empty()).then(|| date.to_string()),
            );
        }
    }

    match heading.split_once(" - ") {
        Some((title, date)) => (title.trim().to_string(), Some(date.trim().to_string())),
        None => (heading.to_string(), None),
    }
}

fn single_unreleased(entries: &[ChangelogEntry]) -> Result<Option<&ChangelogEntry>> {
    let unreleased: Vec<&ChangelogEntry> = entries.iter().filter(|e| e.unreleased).collect();
    if unreleased.len() > 1 {
        let headings = unreleased
            .iter()
            .map(|e| format!("line {}", e.heading_line + 1))
            .collect::<Vec<_>>()
            .join(", ");
        return Err(Error::AmbiguousUnreleasedEntry {
            count: unreleased.len(),
            headings,
        });
    }
    Ok(unreleased.into_iter().next())
}

/// Select the entry describing `version`
///
/// An exact match wins, otherwise the single unreleased entry is used.
/// More than one unreleased entry is rejected whatever version is asked for.
pub fn resolve_entry<'a>(
    version: &Version,
    entries: &'a [ChangelogEntry],
) -> Result<&'a ChangelogEntry> {
    let unreleased = single_unreleased(entries)?;

    entries
        .iter()
        .find(|e| !e.unreleased && e.version == version.as_str())
        .or(unreleased)
        .ok_or_else(|| Error::ChangelogEntryNotFound(version.to_string()))
}

/// Render the change notes for `version`: no heading, no empty groups
pub fn resolve_change_notes(
    version: &Version,
    entries: &[ChangelogEntry],
    output: OutputType,
) -> Result<String> {
    let entry = resolve_entry(version, entries)?
        .clone()
        .with_header(false)
        .with_empty_sections(false);
    Ok(entry.render(output))
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHANGELOG: &str = "\
# Changelog

Notable changes to this plugin.

## [Unreleased]
### Added
- Inspection for unused givens
- Quick fix that spans
  two lines

### Fixed

## [2.1.6] - 2024-11-02
### Fixed
- Crash when opening `build.sbt`

### Removed

## 2.1.5
- Initial marketplace release
";

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    #[test]
    fn test_parse_entries_and_sections() {
        let log = Changelog::parse(CHANGELOG, "Unreleased");
        let entries = log.entries();
        assert_eq!(entries.len(), 3);

        assert!(entries[0].unreleased);
        assert_eq!(entries[0].sections.len(), 2);
        assert_eq!(entries[0].sections[0].label, "Added");
        assert_eq!(
            entries[0].sections[0].items,
            vec!["Inspection for unused givens", "Quick fix that spans two lines"]
        );

        assert_eq!(entries[1].version, "2.1.6");
        assert_eq!(entries[1].date.as_deref(), Some("2024-11-02"));

        assert_eq!(entries[2].version, "2.1.5");
        assert_eq!(entries[2].sections[0].label, "");
        assert_eq!(entries[2].sections[0].items, vec!["Initial marketplace release"]);
    }

    #[test]
    fn test_exact_match_is_preferred() {
        let log = Changelog::parse(CHANGELOG, "Unreleased");
        let notes = resolve_change_notes(&v("2.1.6"), log.entries(), OutputType::Markdown).unwrap();
        assert_eq!(notes, "### Fixed\n- Crash when opening `build.sbt`\n");
    }

    #[test]
    fn test_unreleased_fallback() {
        let log = Changelog::parse(CHANGELOG, "Unreleased");
        let notes = resolve_change_notes(&v("2.2.0"), log.entries(), OutputType::Markdown).unwrap();
        assert!(notes.starts_with("### Added\n- Inspection for unused givens"));
        assert!(!notes.contains("Fixed"), "empty section must be omitted: {notes}");
        assert!(!notes.contains("## "), "header must be suppressed: {notes}");
    }

    #[test]
    fn test_html_rendering() {
        let log = Changelog::parse(CHANGELOG, "Unreleased");
        let html = resolve_change_notes(&v("2.1.6"), log.entries(), OutputType::Html).unwrap();
        assert_eq!(
            html,
            "<h3>Fixed</h3>\n<ul>\n<li>Crash when opening <code>build.sbt</code></li>\n</ul>\n"
        );
    }

    #[test]
    fn test_header_and_empty_sections_kept_by_default() {
        let log = Changelog::parse(CHANGELOG, "Unreleased");
        let md = log.get("2.1.6").unwrap().render(OutputType::Markdown);
        assert!(md.starts_with("## [2.1.6] - 2024-11-02\n\n### Fixed"));
        assert!(md.contains("### Removed"));
    }

    #[test]
    fn test_missing_entry_without_unreleased() {
        let log = Changelog::parse("## [1.0.0]\n- first\n", "Unreleased");
        let err = resolve_change_notes(&v("1.1.0"), log.entries(), OutputType::Html).unwrap_err();
        assert!(matches!(err, Error::ChangelogEntryNotFound(ref ver) if ver == "1.1.0"));
    }

    #[test]
    fn test_two_unreleased_entries_are_ambiguous() {
        let text = "## Unreleased\n- a\n\n## [unreleased]\n- b\n\n## [1.0.0]\n- c\n";
        let log = Changelog::parse(text, "Unreleased");
        for requested in ["1.0.0", "9.9.9"] {
            let err = resolve_entry(&v(requested), log.entries()).unwrap_err();
            assert!(matches!(err, Error::AmbiguousUnreleasedEntry { count: 2, .. }));
        }
    }

    #[test]
    fn test_custom_unreleased_label() {
        let log = Changelog::parse("## [Next]\n- soon\n", "next");
        assert!(log.entries()[0].unreleased);
    }

    #[test]
    fn test_plain_text_rendering() {
        let log = Changelog::parse(CHANGELOG, "Unreleased");
        let text = resolve_change_notes(&v("2.1.6"), log.entries(), OutputType::PlainText).unwrap();
        assert_eq!(text, "Fixed\n- Crash when opening `build.sbt`");
    }

    #[test]
    fn test_patch_renames_unreleased() {
        let log = Changelog::parse(CHANGELOG, "Unreleased");
        let patched = log.patch(&v("2.2.0"), "2024-12-01").unwrap().unwrap();

        let reparsed = Changelog::parse(&patched, "Unreleased");
        let entries = reparsed.entries();
        assert!(entries[0].unreleased);
        assert!(entries[0].sections.is_empty());
        assert_eq!(entries[1].version, "2.2.0");
        assert_eq!(entries[1].date.as_deref(), Some("2024-12-01"));
        assert_eq!(entries[1].sections[0].label, "Added");
        assert!(patched.starts_with("# Changelog\n\nNotable changes"));
    }

    #[test]
    fn test_patch_is_noop_for_existing_version() {
        let log = Changelog::parse(CHANGELOG, "Unreleased");
        assert!(log.patch(&v("2.1.6"), "2024-12-01").unwrap().is_none());
    }

    #[test]
    fn test_patch_requires_unreleased_entry() {
        let log = Changelog::parse("## [1.0.0]\n- first\n", "Unreleased");
        assert!(matches!(
            log.patch(&v("1.1.0"), "2024-12-01"),
            Err(Error::ChangelogEntryNotFound(_))
        ));
    }
}
