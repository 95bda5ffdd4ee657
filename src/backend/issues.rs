//! Purpose: Extract compiler diagnostics from build output.
//! Exports: `parse_issues`.
//! Role: Feeds the build issue list; pure text processing.
//! Invariants: Issues come back in output order; unrecognized lines are ignored.

use std::sync::LazyLock;

use regex::Regex;

use super::types::{Issue, Severity};

// gcc/clang/tsc style: `path:line[:col]: error: message`
static LOCATED: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(
        r"^(?P<file>[^\s:][^:]*):(?P<line>\d+)(?::(?P<col>\d+))?:\s*(?:fatal\s+)?(?P<sev>error|warning)(?:\[[^\]]*\])?:\s*(?P<msg>.*)$",
    )
    .ok()
});

// rustc style: a header line followed by ` --> path:line:col`
static HEADER: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"^(?P<sev>error|warning)(?:\[[^\]]*\])?:\s*(?P<msg>.+)$").ok()
});

static ARROW: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"^\s*-->\s*(?P<file>[^:]+):(?P<line>\d+)(?::(?P<col>\d+))?").ok()
});

pub fn parse_issues(output: &str) -> Vec<Issue> {
    let (Some(located), Some(header), Some(arrow)) =
        (LOCATED.as_ref(), HEADER.as_ref(), ARROW.as_ref())
    else {
        return Vec::new();
    };

    let mut issues = Vec::new();
    let mut pending: Option<(Severity, String)> = None;
    for line in output.lines() {
        let line = line.trim_end();
        if let Some(caps) = located.captures(line) {
            pending = None;
            let Some(line_no) = caps["line"].parse::<u32>().ok() else {
                continue;
            };
            issues.push(Issue {
                file: caps["file"].to_string(),
                line: line_no,
                column: caps.name("col").and_then(|col| col.as_str().parse().ok()),
                severity: severity(&caps["sev"]),
                message: caps["msg"].trim().to_string(),
            });
            continue;
        }
        if let Some(caps) = header.captures(line) {
            pending = Some((severity(&caps["sev"]), caps["msg"].trim().to_string()));
            continue;
        }
        if let Some(caps) = arrow.captures(line) {
            let Some((severity, message)) = pending.take() else {
                continue;
            };
            let Some(line_no) = caps["line"].parse::<u32>().ok() else {
                continue;
            };
            issues.push(Issue {
                file: caps["file"].trim().to_string(),
                line: line_no,
                column: caps.name("col").and_then(|col| col.as_str().parse().ok()),
                severity,
                message,
            });
        }
    }
    issues
}

fn severity(text: &str) -> Severity {
    if text == "warning" {
        Severity::Warning
    } else {
        Severity::Error
    }
}
