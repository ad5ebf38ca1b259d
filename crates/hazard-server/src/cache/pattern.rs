//! Glob patterns for cache invalidation.
//!
//! Supports the Redis `KEYS`/`SCAN` glob dialect. Character classes are
//! widened to "any single character" locally, which can only ever match
//! more keys than the remote tier would.

use regex::Regex;

pub fn glob_to_regex(pattern: &str) -> Result<Regex, regex::Error> {
    let mut out = String::with_capacity(pattern.len() + 8);
    out.push('^');

    let mut chars = pattern.chars();
    let mut buf = [0u8; 4];
    while let Some(ch) = chars.next() {
        match ch {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            '[' => {
                // Skip to the closing bracket; an unterminated class matches the rest.
                let mut closed = false;
                for inner in chars.by_ref() {
                    if inner == ']' {
                        closed = true;
                        break;
                    }
                }
                out.push_str(if closed { "." } else { ".*" });
            }
            '\\' => {
                if let Some(escaped) = chars.next() {
                    out.push_str(&regex::escape(escaped.encode_utf8(&mut buf)));
                }
            }
            other => out.push_str(&regex::escape(other.encode_utf8(&mut buf))),
        }
    }

    out.push('$');
    Regex::new(&out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_glob() {
        let re = glob_to_regex("p:*").unwrap();
        assert!(re.is_match("p:"));
        assert!(re.is_match("p:anything:else"));
        assert!(!re.is_match("presence:1"));
        assert!(!re.is_match("xp:1"));
    }

    #[test]
    fn regex_metacharacters_are_literal() {
        let re = glob_to_regex("reports:1.5+2").unwrap();
        assert!(re.is_match("reports:1.5+2"));
        assert!(!re.is_match("reports:105+2"));
    }

    #[test]
    fn single_char_and_classes() {
        let re = glob_to_regex("zone:?:[ab]").unwrap();
        assert!(re.is_match("zone:1:a"));
        assert!(re.is_match("zone:2:c"));
        assert!(!re.is_match("zone:12:a"));
    }

    #[test]
    fn escaped_star_is_literal() {
        let re = glob_to_regex(r"k:\*").unwrap();
        assert!(re.is_match("k:*"));
        assert!(!re.is_match("k:abc"));
    }
}
