//! Download URL helpers.

/// Strip the ephemeral access token from a download URL.
///
/// Returns `access_url` up to (not including) the first occurrence of
/// `delimiter`, or the whole URL if the delimiter does not occur. Only useful
/// for objects the backend serves publicly without a token.
pub fn stable_url(access_url: &str, delimiter: &str) -> String {
    if delimiter.is_empty() {
        return access_url.to_string();
    }
    match access_url.find(delimiter) {
        Some(end) => access_url[..end].to_string(),
        None => access_url.to_string(),
    }
}
