//! Git output parsing helpers.

use std::process::Output;

use super::types::{FileStatus, GitStatus};

/// Formats a git error with both stdout and stderr.
pub fn format_git_error(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();

    match (stderr.is_empty(), stdout.is_empty()) {
        (true, true) => format!(
            "Command failed with exit code {}",
            output.status.code().unwrap_or(-1)
        ),
        (true, false) => stdout,
        (false, true) => stderr,
        (false, false) => format!("{}\n{}", stderr, stdout),
    }
}

/// Extracts ahead/behind counts from the `##` branch line.
/// Returns `None` when no bracket info is present.
pub fn extract_ahead_behind(line: &str) -> Option<(u32, u32)> {
    let bracket_start = line.find('[')?;
    let bracket_end = line.find(']')?;
    if bracket_end <= bracket_start {
        return None;
    }

    let info = &line[bracket_start + 1..bracket_end];
    let mut ahead = 0;
    let mut behind = 0;

    for part in info.split(',') {
        let part = part.trim();
        if let Some(n) = part.strip_prefix("ahead ") {
            ahead = n.parse().unwrap_or(0);
        } else if let Some(n) = part.strip_prefix("behind ") {
            behind = n.parse().unwrap_or(0);
        }
    }

    Some((ahead, behind))
}

/// Branch name from the `##` line, e.g. `## main...origin/main [ahead 1]`.
fn branch_from_header(line: &str) -> Option<String> {
    let rest = line.strip_prefix("## ")?;
    let rest = rest
        .strip_prefix("No commits yet on ")
        .or_else(|| rest.strip_prefix("Initial commit on "))
        .unwrap_or(rest);
    let name = rest
        .split("...")
        .next()
        .unwrap_or(rest)
        .split_whitespace()
        .next()?;
    Some(name.to_string())
}

/// Parses `git status --porcelain -b` output.
pub fn parse_status(text: &str) -> GitStatus {
    let mut status = GitStatus::default();

    for line in text.lines() {
        if line.starts_with("##") {
            status.branch = branch_from_header(line);
            if let Some((ahead, behind)) = extract_ahead_behind(line) {
                status.ahead = ahead;
                status.behind = behind;
            }
            continue;
        }
        if line.len() < 3 {
            continue;
        }

        let index_status = line.chars().next().unwrap_or(' ');
        let worktree_status = line.chars().nth(1).unwrap_or(' ');
        let file_path = line[3..].trim();

        // Renames are reported as "old -> new"
        let path = file_path
            .rsplit(" -> ")
            .next()
            .unwrap_or(file_path)
            .trim_matches('"')
            .to_string();

        if line.starts_with("??") {
            status.files.push(FileStatus {
                path,
                status: '?',
                staged: false,
            });
            continue;
        }

        let (code, staged) = if worktree_status == 'D' {
            ('D', false)
        } else if index_status != ' ' {
            (index_status, true)
        } else if worktree_status != ' ' {
            (worktree_status, false)
        } else {
            continue;
        };
        status.files.push(FileStatus {
            path,
            status: code,
            staged,
        });
    }

    status
}

/// Counts changed files from pull/merge output.
pub fn count_changed_files(output: &str) -> u32 {
    for line in output.lines() {
        if line.contains("file") && line.contains("changed") {
            for word in line.split_whitespace() {
                if let Ok(n) = word.parse::<u32>() {
                    return n;
                }
            }
        }
    }
    0
}
