//! Evidence correlation: mapping raw sightings onto a stable app key.

use crate::error::{DiscoveryError, Result};

/// Normalise a domain or URL into the canonical dedup key.
///
/// `https://WWW.Notion.so:443/workspace` and `notion.so.` both become
/// `notion.so`.
pub fn canonical_app_key(domain: &str) -> Result<String> {
    let invalid = || DiscoveryError::InvalidDomain(domain.to_string());

    let mut host = domain.trim().to_lowercase();
    if let Some((_, rest)) = host.split_once("://") {
        host = rest.to_string();
    }
    if let Some(end) = host.find(['/', '?', '#']) {
        host.truncate(end);
    }
    if let Some((_, rest)) = host.rsplit_once('@') {
        host = rest.to_string();
    }
    if let Some((name, port)) = host.rsplit_once(':') {
        if port.chars().all(|c| c.is_ascii_digit()) {
            host = name.to_string();
        }
    }

    let host = host.trim_end_matches('.');
    let host = host.strip_prefix("www.").unwrap_or(host);

    let labels_valid = host.split('.').all(|label| {
        !label.is_empty()
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
    });
    if host.len() > 253 || !host.contains('.') || !labels_valid {
        return Err(invalid());
    }
    Ok(host.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_scheme_www_path_and_port() {
        assert_eq!(
            canonical_app_key("https://WWW.Notion.so:443/workspace?x=1").unwrap(),
            "notion.so"
        );
        assert_eq!(canonical_app_key("notion.so.").unwrap(), "notion.so");
        assert_eq!(canonical_app_key("  app.datadoghq.com ").unwrap(), "app.datadoghq.com");
        assert_eq!(canonical_app_key("user@github.com").unwrap(), "github.com");
    }

    #[test]
    fn test_rejects_garbage() {
        for bad in ["", "localhost", "https://", "not a domain.com", "-bad.com", "a..b"] {
            let err = canonical_app_key(bad).unwrap_err();
            assert!(matches!(err, DiscoveryError::InvalidDomain(_)), "{bad}");
        }
    }
}
