//! Joining request paths onto the resolved base URL.

/// Append `path` to `base`, with exactly one `/` between them.
///
/// A leading `/` on `path` is optional: `"/users"` and `"users"` join to the same
/// URL, and an empty path addresses the base itself.
#[must_use]
pub fn join_url(base: &str, path: &str) -> String {
    let path = path.strip_prefix('/').unwrap_or(path);
    if base.ends_with('/') {
        format!("{base}{path}")
    } else {
        format!("{base}/{path}")
    }
}
