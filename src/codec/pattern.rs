//! Escape-aware wildcard handling for search patterns
//!
//! Patterns use `*` (any run of characters) and `?` (any single character).
//! A backslash makes the next character literal, so `\*` matches a star and
//! `\\` matches a backslash.

const ESCAPE: char = '\\';

fn is_wildcard(c: char) -> bool {
    c == '*' || c == '?'
}

/// Literal head of a pattern, up to its first unescaped wildcard
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiteralPrefix {
    /// Unescaped literal text preceding the first wildcard
    pub literal: String,
    /// True when an unescaped wildcard ended the literal region
    pub has_wildcard: bool,
}

/// Split a pattern into its literal prefix and whether a wildcard follows it
///
/// Escaping backslashes are removed from the literal. A trailing lone
/// backslash has nothing to escape and is dropped.
pub fn split_literal(pattern: &str) -> LiteralPrefix {
    let mut literal = String::with_capacity(pattern.len());
    let mut escaped = false;

    for c in pattern.chars() {
        if escaped {
            literal.push(c);
            escaped = false;
        } else if c == ESCAPE {
            escaped = true;
        } else if is_wildcard(c) {
            return LiteralPrefix {
                literal,
                has_wildcard: true,
            };
        } else {
            literal.push(c);
        }
    }

    LiteralPrefix {
        literal,
        has_wildcard: false,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token {
    Literal(char),
    AnyOne,
    AnyRun,
}

fn tokenize(pattern: &str, case_sensitive: bool) -> Vec<Token> {
    let mut tokens = Vec::with_capacity(pattern.len());
    let mut escaped = false;

    for c in pattern.chars() {
        if escaped {
            tokens.push(Token::Literal(fold(c, case_sensitive)));
            escaped = false;
        } else if c == ESCAPE {
            escaped = true;
        } else if c == '*' {
            // Consecutive stars behave like one
            if tokens.last() != Some(&Token::AnyRun) {
                tokens.push(Token::AnyRun);
            }
        } else if c == '?' {
            tokens.push(Token::AnyOne);
        } else {
            tokens.push(Token::Literal(fold(c, case_sensitive)));
        }
    }
    tokens
}

fn fold(c: char, case_sensitive: bool) -> char {
    if case_sensitive {
        c
    } else {
        c.to_lowercase().next().unwrap_or(c)
    }
}

/// Match `text` against a wildcard pattern
///
/// Uses the usual greedy-with-backtrack scan, remembering only the most
/// recent star, which is linear in practice and never worse than
/// `O(pattern * text)`.
pub fn wildcard_match(pattern: &str, text: &str, case_sensitive: bool) -> bool {
    let tokens = tokenize(pattern, case_sensitive);
    let text: Vec<char> = text.chars().map(|c| fold(c, case_sensitive)).collect();

    let (mut t, mut p) = (0usize, 0usize);
    let mut star: Option<(usize, usize)> = None;

    while t < text.len() {
        match tokens.get(p) {
            Some(Token::Literal(c)) if *c == text[t] => {
                t += 1;
                p += 1;
            }
            Some(Token::AnyOne) => {
                t += 1;
                p += 1;
            }
            Some(Token::AnyRun) => {
                star = Some((p, t));
                p += 1;
            }
            _ => match star {
                Some((star_p, star_t)) => {
                    p = star_p + 1;
                    t = star_t + 1;
                    star = Some((star_p, star_t + 1));
                }
                None => return false,
            },
        }
    }

    tokens[p..].iter().all(|token| *token == Token::AnyRun)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn split(pattern: &str) -> (String, bool) {
        let prefix = split_literal(pattern);
        (prefix.literal, prefix.has_wildcard)
    }

    #[test]
    fn test_split_literal_plain() {
        assert_eq!(split("FooBar"), ("FooBar".to_string(), false));
        assert_eq!(split(""), (String::new(), false));
    }

    #[test]
    fn test_split_literal_stops_at_first_wildcard() {
        assert_eq!(split("Fo*Bar"), ("Fo".to_string(), true));
        assert_eq!(split("Fo?Bar*"), ("Fo".to_string(), true));
        assert_eq!(split("*Foo"), (String::new(), true));
    }

    #[test]
    fn test_split_literal_escaped_wildcards_are_literal() {
        assert_eq!(split(r"Fo\*Bar"), ("Fo*Bar".to_string(), false));
        assert_eq!(split(r"a\?b*c"), ("a?b".to_string(), true));
    }

    #[test]
    fn test_split_literal_escaped_backslash() {
        assert_eq!(split("a\\\\b*"), ("a\\b".to_string(), true));
        // Escaped backslash does not escape the following star
        assert_eq!(split(r"a\\*"), ("a\\".to_string(), true));
    }

    #[test]
    fn test_split_literal_trailing_backslash_dropped() {
        assert_eq!(split("abc\\"), ("abc".to_string(), false));
    }

    #[test]
    fn test_wildcard_match_basics() {
        assert!(wildcard_match("Foo", "Foo", true));
        assert!(!wildcard_match("Foo", "Food", true));
        assert!(wildcard_match("Fo*", "Food", true));
        assert!(wildcard_match("*od", "Food", true));
        assert!(wildcard_match("F?od", "Food", true));
        assert!(!wildcard_match("F?d", "Food", true));
        assert!(wildcard_match("*", "", true));
        assert!(wildcard_match("", "", true));
        assert!(!wildcard_match("", "x", true));
    }

    #[test]
    fn test_wildcard_match_backtracks() {
        assert!(wildcard_match("a*b*c", "axxbyybzc", true));
        assert!(!wildcard_match("a*b*c", "axxbyybz", true));
        assert!(wildcard_match("**a", "bba", true));
    }

    #[test]
    fn test_wildcard_match_escapes() {
        assert!(wildcard_match(r"operator\*", "operator*", true));
        assert!(!wildcard_match(r"operator\*", "operator+", true));
        assert!(wildcard_match(r"a\\b", "a\\b", true));
    }

    #[test]
    fn test_wildcard_match_case_insensitive() {
        assert!(wildcard_match("foo*", "FooBar", false));
        assert!(!wildcard_match("foo*", "FooBar", true));
    }
}
