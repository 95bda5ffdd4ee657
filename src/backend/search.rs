//! Purpose: Text matching and file walking used by search, replace, and find-files tools.
//! Exports: `Matcher`, `FileFilter`, `walk_files`.
//! Role: Pure helpers; callers decide where text comes from and where it goes.
//! Invariants: Literal patterns never interpret regex syntax, in the pattern or the replacement.

use std::path::{Path, PathBuf};

use glob::{MatchOptions, Pattern};
use regex::{NoExpand, Regex, RegexBuilder};
use walkdir::WalkDir;

use super::types::{SearchMatch, SearchOptions};

const SKIPPED_DIRS: [&str; 2] = ["target", "node_modules"];

#[derive(Debug)]
pub struct Matcher {
    regex: Regex,
    literal: bool,
}

impl Matcher {
    pub fn new(options: &SearchOptions) -> Result<Self, String> {
        if options.pattern.is_empty() {
            return Err("search pattern must not be empty".to_string());
        }
        let source = if options.regex {
            options.pattern.clone()
        } else {
            regex::escape(&options.pattern)
        };
        let regex = RegexBuilder::new(&source)
            .case_insensitive(!options.case_sensitive)
            .build()
            .map_err(|err| format!("invalid search pattern: {err}"))?;
        Ok(Self {
            regex,
            literal: !options.regex,
        })
    }

    /// Append one match per occurrence; lines and columns are 1-based, columns count chars.
    pub fn find_in_text(&self, file: &str, text: &str, out: &mut Vec<SearchMatch>) {
        for (idx, line) in text.lines().enumerate() {
            for found in self.regex.find_iter(line) {
                out.push(SearchMatch {
                    file: file.to_string(),
                    line: idx + 1,
                    column: line[..found.start()].chars().count() + 1,
                    text: line.to_string(),
                });
            }
        }
    }

    /// Replace every occurrence. Returns the new text and the replacement count.
    pub fn replace(&self, text: &str, replacement: &str) -> (String, usize) {
        let count = self.regex.find_iter(text).count();
        if count == 0 {
            return (text.to_string(), 0);
        }
        let replaced = if self.literal {
            self.regex.replace_all(text, NoExpand(replacement))
        } else {
            self.regex.replace_all(text, replacement)
        };
        (replaced.into_owned(), count)
    }
}

/// Glob filter on file names, or on root-relative paths when the pattern has a `/`.
#[derive(Debug)]
pub struct FileFilter {
    pattern: Pattern,
    by_path: bool,
}

impl FileFilter {
    pub fn new(pattern: &str) -> Result<Self, String> {
        let compiled =
            Pattern::new(pattern).map_err(|err| format!("invalid file pattern: {err}"))?;
        Ok(Self {
            pattern: compiled,
            by_path: pattern.contains('/'),
        })
    }

    pub fn matches(&self, root: &Path, path: &Path) -> bool {
        let options = MatchOptions {
            case_sensitive: true,
            require_literal_separator: self.by_path,
            require_literal_leading_dot: false,
        };
        if self.by_path {
            let relative = path.strip_prefix(root).unwrap_or(path);
            self.pattern.matches_path_with(relative, options)
        } else {
            path.file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| self.pattern.matches_with(name, options))
        }
    }
}

/// Regular files under `dir`, sorted, skipping hidden entries and build output directories.
pub fn walk_files(dir: &Path, filter: Option<&FileFilter>) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || !is_skipped(entry.file_name().to_str()))
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| filter.is_none_or(|filter| filter.matches(dir, path)))
        .collect();
    files.sort();
    files
}

fn is_skipped(name: Option<&str>) -> bool {
    match name {
        Some(name) => name.starts_with('.') || SKIPPED_DIRS.contains(&name),
        None => true,
    }
}
