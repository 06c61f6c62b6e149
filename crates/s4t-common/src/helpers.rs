//! Common helper functions for S4T.

/// Performs a constant-time comparison of two byte strings.
/// Used when checking recovered integrity digests against recomputed ones.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut diff = 0u8;
    for (lhs, rhs) in a.iter().zip(b.iter()) {
        diff |= lhs ^ rhs;
    }
    diff == 0
}

/// Returns true if `name` may be used as an identity name.
///
/// Identity names end up in key file paths, so only ASCII alphanumerics,
/// `_`, `-` and `.` are accepted, and a leading `.` is rejected.
pub fn is_valid_identity_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 128
        && !name.starts_with('.')
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-' | b'.'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_time_eq_identical() {
        assert!(constant_time_eq(b"digest123", b"digest123"));
        assert!(constant_time_eq(b"", b""));
        assert!(constant_time_eq(b"a", b"a"));
    }

    #[test]
    fn test_constant_time_eq_different() {
        assert!(!constant_time_eq(b"digest123", b"digest124"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"", b"a"));
    }

    #[test]
    fn test_constant_time_eq_different_lengths() {
        assert!(!constant_time_eq(b"short", b"much_longer_string"));
        assert!(!constant_time_eq(b"abc", b"ab"));
    }

    #[test]
    fn test_identity_names() {
        assert!(is_valid_identity_name("Board_1_GT"));
        assert!(is_valid_identity_name("board-2.lab"));
        assert!(!is_valid_identity_name(""));
        assert!(!is_valid_identity_name("../etc/passwd"));
        assert!(!is_valid_identity_name(".hidden"));
        assert!(!is_valid_identity_name("a/b"));
        assert!(!is_valid_identity_name("board 2"));
    }
}
