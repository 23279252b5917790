//! Input validation module
//! Name, selector and endpoint checks applied before anything reaches a cluster

use regex::Regex;
use std::sync::LazyLock;

/// Maximum allowed lengths for various fields
pub const MAX_LABEL_LENGTH: usize = 63;
pub const MAX_SUBDOMAIN_LENGTH: usize = 253;
pub const MAX_SELECTOR_LENGTH: usize = 1024;

/// Regex patterns for validation
static DNS_LABEL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$").unwrap()
});

static DNS_SUBDOMAIN_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?(\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)*$").unwrap()
});

static SELECTOR_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9_./\-=!,() ]*$").unwrap()
});

/// Validation result type; the error is a human-readable violation
pub type ValidationResult<T> = Result<T, String>;

/// DNS-1123 label: cluster names and namespaces
pub fn validate_dns_label(field: &str, value: &str) -> ValidationResult<()> {
    if value.is_empty() {
        return Err(format!("{} cannot be empty", field));
    }

    if value.len() > MAX_LABEL_LENGTH {
        return Err(format!(
            "{} too long (max {} characters)",
            field, MAX_LABEL_LENGTH
        ));
    }

    if !DNS_LABEL_REGEX.is_match(value) {
        return Err(format!(
            "{} '{}' must consist of lowercase alphanumerics or '-', and start and end with an alphanumeric",
            field, value
        ));
    }

    Ok(())
}

/// DNS-1123 subdomain: object names
pub fn validate_object_name(name: &str) -> ValidationResult<()> {
    if name.is_empty() {
        return Err("metadata.name cannot be empty".to_string());
    }

    if name.len() > MAX_SUBDOMAIN_LENGTH {
        return Err(format!(
            "metadata.name too long (max {} characters)",
            MAX_SUBDOMAIN_LENGTH
        ));
    }

    if !DNS_SUBDOMAIN_REGEX.is_match(name) {
        return Err(format!(
            "metadata.name '{}' must be a lowercase RFC 1123 subdomain",
            name
        ));
    }

    Ok(())
}

/// Label selectors are passed upstream verbatim; only the charset is checked
pub fn validate_label_selector(selector: &str) -> ValidationResult<()> {
    if selector.len() > MAX_SELECTOR_LENGTH {
        return Err(format!(
            "label selector too long (max {} characters)",
            MAX_SELECTOR_LENGTH
        ));
    }

    if !SELECTOR_REGEX.is_match(selector) {
        return Err(format!("label selector '{}' contains invalid characters", selector));
    }

    Ok(())
}

/// API endpoint validation
pub fn validate_url(url: &str) -> ValidationResult<()> {
    if url.is_empty() {
        return Err("endpoint cannot be empty".to_string());
    }

    if !url.starts_with("http://") && !url.starts_with("https://") {
        return Err("endpoint must start with http:// or https://".to_string());
    }

    let parsed = url::Url::parse(url).map_err(|e| format!("invalid endpoint URL: {}", e))?;
    if parsed.host_str().map_or(true, str::is_empty) {
        return Err("endpoint URL has no host".to_string());
    }

    Ok(())
}
