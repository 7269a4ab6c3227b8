//! Domain name helpers shared by the text parsers and the binary codecs.

/// Maximum length of a single label.
const MAX_LABEL_LEN: usize = 63;

/// Check whether `s` is a syntactically valid domain name.
///
/// Labels may contain letters, digits, `-` and `_`. A label must not start
/// or end with `-`, must be at most 63 bytes, and at least one character in
/// the name must be non-numeric. A single trailing dot is allowed.
///
/// # Examples
/// ```
/// use ruleconv::rule::domain::is_domain_name;
///
/// assert!(is_domain_name("example.com"));
/// assert!(is_domain_name("localhost"));
/// assert!(!is_domain_name("127.0.0.1"));
/// assert!(!is_domain_name("-bad.com"));
/// ```
pub fn is_domain_name(s: &str) -> bool {
    let bytes = s.as_bytes();
    let len = bytes.len();
    if len == 0 || len > 254 || (len == 254 && bytes[len - 1] != b'.') || s == "." {
        return false;
    }

    let mut last = b'.';
    let mut non_numeric = false;
    let mut part_len = 0usize;
    for &c in bytes {
        match c {
            b'a'..=b'z' | b'A'..=b'Z' | b'_' => {
                non_numeric = true;
                part_len += 1;
            }
            b'0'..=b'9' => part_len += 1,
            b'-' => {
                if last == b'.' {
                    return false;
                }
                part_len += 1;
                non_numeric = true;
            }
            b'.' => {
                if last == b'.' || last == b'-' || part_len == 0 || part_len > MAX_LABEL_LEN {
                    return false;
                }
                part_len = 0;
            }
            _ => return false,
        }
        last = c;
    }

    if last == b'-' || part_len > MAX_LABEL_LEN {
        return false;
    }
    non_numeric
}

/// Reverse a key byte-wise so that shared suffixes become shared prefixes.
///
/// Keys are ASCII in practice; non-ASCII input is reversed by characters so
/// the result stays valid UTF-8.
pub fn reverse(s: &str) -> String {
    s.chars().rev().collect()
}
