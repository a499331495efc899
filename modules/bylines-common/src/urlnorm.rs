//! URL canonicalization for the dedup key.

use url::Url;

const SESSION_PARAMS: &[&str] = &["session", "sessionid", "sid", "phpsessid", "jsessionid"];

/// Canonicalize a URL into a stable dedup locator:
/// lowercase host and path, force https, strip the fragment, drop `utm_*`
/// and session-id query params, sort the remaining pairs, and keep only
/// non-default ports. Non-HTTP(S) input is returned unchanged.
pub fn canonicalize_url(raw: &str) -> String {
    let Ok(parsed) = Url::parse(raw.trim()) else {
        return raw.to_string();
    };
    let scheme = parsed.scheme();
    if scheme != "http" && scheme != "https" {
        return raw.to_string();
    }

    let host = parsed.host_str().unwrap_or("").to_ascii_lowercase();
    // Url::parse already drops ports matching the original scheme's default.
    let port = parsed.port().map(|p| format!(":{p}")).unwrap_or_default();

    let mut path = parsed.path().to_ascii_lowercase();
    if path.is_empty() {
        path = "/".to_string();
    }

    let mut pairs: Vec<(String, String)> = parsed
        .query_pairs()
        .filter(|(key, _)| {
            let lower = key.to_ascii_lowercase();
            !lower.starts_with("utm_") && !SESSION_PARAMS.contains(&lower.as_str())
        })
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();
    pairs.sort();

    let query = if pairs.is_empty() {
        String::new()
    } else {
        let encoded: String = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(pairs)
            .finish();
        format!("?{encoded}")
    };

    format!("https://{host}{port}{path}{query}")
}
