//! ID generation and timestamps
//!
//! Generated IDs use the format `{millis-hex}-{kind}-{slug}`, e.g.
//! `18f2a3c41d2-task-color-enum`. Decomposition normally supplies task ids;
//! these are for tasks minted locally (splitter output, tests).

use std::time::{SystemTime, UNIX_EPOCH};

/// Current Unix timestamp in milliseconds
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// Generate an ID from kind and title
pub fn generate_id(kind: &str, title: &str) -> String {
    format!("{:x}-{}-{}", now_ms(), kind, slugify(title))
}

/// Slugify a title for use in IDs
fn slugify(title: &str) -> String {
    title
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '-' })
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-")
        .chars()
        .take(48)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_id() {
        let id = generate_id("task", "Color Enum");
        assert!(id.contains("-task-"));
        assert!(id.ends_with("color-enum"));
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Hello World"), "hello-world");
        assert_eq!(slugify("Multiple   Spaces!"), "multiple-spaces");
        assert_eq!(slugify("CamelCase"), "camelcase");
    }

    #[test]
    fn test_now_ms_monotonic_enough() {
        let a = now_ms();
        let b = now_ms();
        assert!(b >= a);
    }
}
