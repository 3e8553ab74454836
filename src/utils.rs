use url::Url;

use crate::error::Result;

pub fn normalize_url(input: &str) -> String {
    let trimmed = input.trim().trim_end_matches('/');
    if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("https://{}", trimmed)
    }
}

/// Push-channel URL on the same origin as the REST API: `http(s)` becomes
/// `ws(s)` and any `/api` path is dropped.
pub fn socket_url_for(api_url: &str) -> Result<Url> {
    let mut url = Url::parse(&normalize_url(api_url))?;
    let scheme = if url.scheme() == "http" { "ws" } else { "wss" };
    let _ = url.set_scheme(scheme);
    url.set_path("/");
    url.set_query(None);
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_defaults_to_https() {
        assert_eq!(normalize_url(" example.com/api/ "), "https://example.com/api");
        assert_eq!(normalize_url("http://localhost:5000"), "http://localhost:5000");
    }

    #[test]
    fn socket_url_mirrors_api_origin() {
        assert_eq!(
            socket_url_for("http://localhost:5000/api").unwrap().as_str(),
            "ws://localhost:5000/"
        );
        assert_eq!(
            socket_url_for("chat.example.com/api").unwrap().as_str(),
            "wss://chat.example.com/"
        );
    }
}
