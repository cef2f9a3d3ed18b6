//! Topic name against topic filter matching.
//!
//! Both sides are split on `/` and compared level by level. `+` consumes
//! exactly one level (which may be empty), `#` consumes the rest of the name
//! including the parent level itself, so `a/#` matches `a`. Names whose first
//! level starts with `$` are never matched by a wildcard in the first filter
//! level.

/// Returns true when `topic` is matched by `filter`.
///
/// Both arguments are assumed to be structurally valid; see
/// [`crate::validation`].
#[must_use]
pub fn topic_matches_filter(topic: &str, filter: &str) -> bool {
    if topic.starts_with('$') && (filter.starts_with('+') || filter.starts_with('#')) {
        return false;
    }

    let mut topic_levels = topic.split('/');
    let mut filter_levels = filter.split('/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => {}
            (Some(expected), Some(actual)) if expected == actual => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

/// True when a filter contains no wildcard and can only ever match itself.
#[must_use]
pub fn is_exact_filter(filter: &str) -> bool {
    !filter.contains(['+', '#'])
}
