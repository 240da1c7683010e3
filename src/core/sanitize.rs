//! Filesystem-safe names for catalog entries

/// Turns an arbitrary display name into a file stem.
///
/// Leading and trailing whitespace is removed, interior spaces become `_`,
/// and anything other than ASCII alphanumerics, `-`, `_` and `.` is dropped.
/// The function never fails and applying it twice changes nothing.
pub fn sanitize(name: &str) -> String {
    name.trim()
        .chars()
        .filter_map(|c| match c {
            ' ' => Some('_'),
            c if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') => Some(c),
            _ => None,
        })
        .collect()
}
