//! Helpers for keeping secrets out of logs and untrusted names out of paths.

/// Strips userinfo/tokens from a git remote URL.
///
/// - `https://ghp_token@github.com/org/audit` → `https://****@github.com/org/audit`
/// - `git@github.com:org/audit.git` → unchanged
/// - `https://github.com/org/audit` → unchanged
pub fn redact_repo_url(url: &str) -> String {
    // SSH URLs don't contain tokens
    if url.starts_with("git@") {
        return url.to_string();
    }

    if let Some(scheme_end) = url.find("://") {
        let after_scheme = &url[scheme_end + 3..];
        if let Some(at_pos) = after_scheme.find('@') {
            let scheme = &url[..scheme_end + 3];
            let after_at = &after_scheme[at_pos + 1..];
            return format!("{}****@{}", scheme, after_at);
        }
    }

    url.to_string()
}

/// Makes a Kubernetes name safe to use as a single path segment.
///
/// Valid Kubernetes names pass through unchanged. Separators are replaced
/// and `.`/`..` cannot escape the storage root.
pub fn path_segment(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | '\0' => '_',
            c => c,
        })
        .collect();

    match cleaned.as_str() {
        "" => "_".to_string(),
        "." | ".." => cleaned.replace('.', "_"),
        _ => cleaned,
    }
}
