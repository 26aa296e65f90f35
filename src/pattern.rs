//! Item generation from a name pattern.
//!
//! Produces the `items` collection for a run (`user{index}@example.com` ->
//! `user0@example.com`, `user1@example.com`, ...). The executor never calls
//! this itself.

use chrono::{DateTime, Utc};

const INDEX: &str = "{index}";
const TIMESTAMP: &str = "{timestamp}";

/// Expand `pattern` for `count` consecutive indices starting at `start`,
/// stamping `{timestamp}` with the current time in Unix milliseconds.
///
/// ```
/// use bulk_executor::pattern::expand_pattern;
///
/// let names = expand_pattern("user{index}@example.com", 1, 3);
/// assert_eq!(names, vec!["user1@example.com", "user2@example.com", "user3@example.com"]);
/// ```
pub fn expand_pattern(pattern: &str, start: usize, count: usize) -> Vec<String> {
    expand_pattern_at(pattern, start, count, Utc::now())
}

/// Same as [`expand_pattern`] with a fixed timestamp, so every item in one
/// call shares the same stamp.
pub fn expand_pattern_at(
    pattern: &str,
    start: usize,
    count: usize,
    now: DateTime<Utc>,
) -> Vec<String> {
    let stamped = pattern.replace(TIMESTAMP, &now.timestamp_millis().to_string());
    (start..start.saturating_add(count))
        .map(|index| stamped.replace(INDEX, &index.to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_index_and_timestamp() {
        let now = Utc.timestamp_millis_opt(1_700_000_000_123).unwrap();
        let items = expand_pattern_at("acct-{timestamp}-{index}", 0, 2, now);
        assert_eq!(
            items,
            vec!["acct-1700000000123-0", "acct-1700000000123-1"]
        );
    }

    #[test]
    fn test_repeated_placeholder() {
        let items = expand_pattern("{index}/{index}", 7, 1);
        assert_eq!(items, vec!["7/7"]);
    }

    #[test]
    fn test_no_placeholders() {
        let items = expand_pattern("static", 0, 3);
        assert_eq!(items, vec!["static"; 3]);
    }

    #[test]
    fn test_zero_count() {
        assert!(expand_pattern("x{index}", 0, 0).is_empty());
    }
}
