//! Helpers for sanitizing data before it enters tracing span attributes.
//!
//! Announcement and attachment URLs often carry session ids or signed
//! download tokens in the query string and userinfo.

/// Strips userinfo, query string and fragment from a URL.
///
/// - `https://user:pw@host/a?token=x` → `https://****@host/a`
/// - `https://host/view.do?pblancId=1#top` → `https://host/view.do`
pub fn redact_url(url: &str) -> String {
    let without_fragment = url.split('#').next().unwrap_or(url);
    let without_query = without_fragment
        .split('?')
        .next()
        .unwrap_or(without_fragment);

    if let Some(scheme_end) = without_query.find("://") {
        let after_scheme = &without_query[scheme_end + 3..];
        let authority_end = after_scheme.find('/').unwrap_or(after_scheme.len());
        if let Some(at_pos) = after_scheme[..authority_end].rfind('@') {
            let scheme = &without_query[..scheme_end + 3];
            return format!("{}****@{}", scheme, &after_scheme[at_pos + 1..]);
        }
    }

    without_query.to_string()
}

/// Last path segment of a URL, used as a fallback attachment name.
pub fn url_filename(url: &str) -> Option<String> {
    let path = redact_url(url);
    let after_scheme = path.split_once("://").map(|(_, rest)| rest).unwrap_or(&path);
    let (_, segments) = after_scheme.split_once('/')?;
    segments
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}
