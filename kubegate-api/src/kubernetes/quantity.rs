//! Kubernetes resource quantities
//!
//! Quantities are compared in base units (cores, bytes, objects) as f64;
//! that is precise enough for quota arithmetic at any realistic scale.

const BINARY_SUFFIXES: &[(&str, f64)] = &[
    ("Ki", 1024.0),
    ("Mi", 1024.0 * 1024.0),
    ("Gi", 1024.0 * 1024.0 * 1024.0),
    ("Ti", 1024.0 * 1024.0 * 1024.0 * 1024.0),
    ("Pi", 1024.0 * 1024.0 * 1024.0 * 1024.0 * 1024.0),
    ("Ei", 1024.0 * 1024.0 * 1024.0 * 1024.0 * 1024.0 * 1024.0),
];

/// Power-of-ten exponents
const DECIMAL_SUFFIXES: &[(&str, i32)] = &[
    ("n", -9),
    ("u", -6),
    ("m", -3),
    ("k", 3),
    ("M", 6),
    ("G", 9),
    ("T", 12),
    ("P", 15),
    ("E", 18),
];

/// Parse "500m", "1.5", "128Mi", "2G", "1e3" into base units
pub fn parse_quantity(raw: &str) -> Option<f64> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }

    for (suffix, factor) in BINARY_SUFFIXES {
        if let Some(number) = s.strip_suffix(suffix) {
            return parse_number(number).map(|n| n * factor);
        }
    }
    for (suffix, exponent) in DECIMAL_SUFFIXES {
        if let Some(number) = s.strip_suffix(suffix) {
            return parse_number(number).map(|n| {
                if *exponent < 0 {
                    n / 10f64.powi(-exponent)
                } else {
                    n * 10f64.powi(*exponent)
                }
            });
        }
    }
    parse_number(s)
}

fn parse_number(s: &str) -> Option<f64> {
    if s.is_empty() {
        return None;
    }
    let value: f64 = s.parse().ok()?;
    if value.is_finite() && value >= 0.0 {
        Some(value)
    } else {
        None
    }
}

/// Render a base-unit value the way the resource is usually written
pub fn format_quantity(resource: &str, value: f64) -> String {
    if is_byte_resource(resource) {
        format_bytes(value)
    } else if is_cpu_resource(resource) {
        format_cpu(value)
    } else if value.fract() == 0.0 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}

fn is_cpu_resource(resource: &str) -> bool {
    resource == "cpu" || resource.ends_with(".cpu")
}

fn is_byte_resource(resource: &str) -> bool {
    resource == "memory"
        || resource == "storage"
        || resource == "ephemeral-storage"
        || resource.ends_with(".memory")
        || resource.ends_with(".storage")
        || resource.ends_with("ephemeral-storage")
}

fn format_cpu(cores: f64) -> String {
    let millis = (cores * 1000.0).round();
    if millis % 1000.0 == 0.0 {
        format!("{}", (millis / 1000.0) as i64)
    } else {
        format!("{}m", millis as i64)
    }
}

fn format_bytes(bytes: f64) -> String {
    let bytes = bytes.round();
    for (suffix, factor) in BINARY_SUFFIXES.iter().rev() {
        if bytes >= *factor && bytes % factor == 0.0 {
            return format!("{}{}", (bytes / factor) as i64, suffix);
        }
    }
    format!("{}", bytes as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cpu() {
        assert_eq!(parse_quantity("500m"), Some(0.5));
        assert_eq!(parse_quantity("2"), Some(2.0));
        assert_eq!(parse_quantity("1.5"), Some(1.5));
        assert_eq!(parse_quantity("250000u"), Some(0.25));
    }

    #[test]
    fn test_parse_memory() {
        assert_eq!(parse_quantity("128Mi"), Some(128.0 * 1024.0 * 1024.0));
        assert_eq!(parse_quantity("1Gi"), Some(1073741824.0));
        assert_eq!(parse_quantity("1G"), Some(1e9));
        assert_eq!(parse_quantity("1k"), Some(1000.0));
        assert_eq!(parse_quantity("1e3"), Some(1000.0));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert_eq!(parse_quantity(""), None);
        assert_eq!(parse_quantity("Mi"), None);
        assert_eq!(parse_quantity("abc"), None);
        assert_eq!(parse_quantity("-1"), None);
        assert_eq!(parse_quantity("1Xi"), None);
    }

    #[test]
    fn test_format() {
        assert_eq!(format_quantity("requests.cpu", 0.5), "500m");
        assert_eq!(format_quantity("cpu", 2.0), "2");
        assert_eq!(format_quantity("limits.memory", 512.0 * 1024.0 * 1024.0), "512Mi");
        assert_eq!(format_quantity("memory", 1000.0), "1000");
        assert_eq!(format_quantity("pods", 3.0), "3");
    }
}
