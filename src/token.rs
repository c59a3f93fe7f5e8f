//! Scanner for `${…}` substitution and `#{…}` placeholder markers.
//!
//! A backslash before the opening marker escapes it (`\${x}` renders as
//! `${x}`); a backslash before a closing brace inside a token keeps the brace
//! in the token body. An opening marker with no closing brace is left as text.

use std::convert::Infallible;

#[derive(Debug, Clone, Copy)]
pub struct TokenScanner {
    open: &'static str,
    close: &'static str,
}

/// `${name}`: textual substitution at evaluation time.
pub const SUBSTITUTION: TokenScanner = TokenScanner::new("${", "}");

/// `#{name}`: parameter placeholder, bound by the execution layer.
pub const PLACEHOLDER: TokenScanner = TokenScanner::new("#{", "}");

impl TokenScanner {
    pub const fn new(open: &'static str, close: &'static str) -> Self {
        Self { open, close }
    }

    /// Whether `text` holds at least one complete, unescaped token.
    pub fn contains(&self, text: &str) -> bool {
        let mut found = false;
        let _ = self.replace(text, |_| {
            found = true;
            Ok::<_, Infallible>(String::new())
        });
        found
    }

    /// Replace every token with the handler's output.
    pub fn replace<E>(
        &self,
        text: &str,
        mut handler: impl FnMut(&str) -> Result<String, E>,
    ) -> Result<String, E> {
        let Some(mut start) = text.find(self.open) else {
            return Ok(text.to_string());
        };

        let mut out = String::with_capacity(text.len());
        let mut offset = 0;
        loop {
            if start > 0 && text[..start].ends_with('\\') {
                out.push_str(&text[offset..start - 1]);
                out.push_str(self.open);
                offset = start + self.open.len();
            } else {
                out.push_str(&text[offset..start]);
                let body_start = start + self.open.len();
                match self.find_close(&text[body_start..]) {
                    Some((body, consumed)) => {
                        out.push_str(&handler(&body)?);
                        offset = body_start + consumed;
                    }
                    None => {
                        out.push_str(&text[start..]);
                        return Ok(out);
                    }
                }
            }

            match text[offset..].find(self.open) {
                Some(next) => start = offset + next,
                None => break,
            }
        }
        out.push_str(&text[offset..]);
        Ok(out)
    }

    /// Token body up to the first unescaped close marker, and bytes consumed
    /// including the marker.
    fn find_close(&self, rest: &str) -> Option<(String, usize)> {
        let mut body = String::new();
        let mut from = 0;
        loop {
            let end = from + rest[from..].find(self.close)?;
            if end > 0 && rest[..end].ends_with('\\') {
                body.push_str(&rest[from..end - 1]);
                body.push_str(self.close);
                from = end + self.close.len();
            } else {
                body.push_str(&rest[from..end]);
                return Some((body, end + self.close.len()));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upper(text: &str) -> String {
        SUBSTITUTION
            .replace(text, |name| Ok::<_, Infallible>(name.to_uppercase()))
            .unwrap()
    }

    #[test]
    fn test_replace_tokens() {
        assert_eq!(upper("select * from ${table} where ${col} = 1"), "select * from TABLE where COL = 1");
        assert_eq!(upper("no tokens"), "no tokens");
    }

    #[test]
    fn test_escaped_open_is_literal() {
        assert_eq!(upper("a \\${x} ${y}"), "a ${x} Y");
    }

    #[test]
    fn test_escaped_close_inside_token() {
        assert_eq!(upper("${a\\}b}"), "A}B");
    }

    #[test]
    fn test_unclosed_token_is_literal() {
        assert_eq!(upper("x ${y"), "x ${y");
    }

    #[test]
    fn test_contains() {
        assert!(SUBSTITUTION.contains("order by ${col}"));
        assert!(!SUBSTITUTION.contains("where id = #{id}"));
        assert!(!SUBSTITUTION.contains("\\${escaped}"));
        assert!(PLACEHOLDER.contains("where id = #{id}"));
    }

    #[test]
    fn test_handler_error_propagates() {
        let result = PLACEHOLDER.replace("#{a} #{b}", |name| {
            if name == "b" { Err(name.to_string()) } else { Ok("?".to_string()) }
        });
        assert_eq!(result, Err("b".to_string()));
    }
}
