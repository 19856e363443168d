//! String literal decoding.

use super::lexer::SyntaxError;

/// Decoded content of a string literal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decoded {
    pub value: String,
    /// Source offset of the construct that produced each byte of `value`,
    /// followed by the offset of the closing quote.
    pub offsets: Vec<usize>,
}

/// Decodes the content of a non-raw string literal. `content_start` is the
/// source offset of `content`.
pub fn decode(content: &str, content_start: usize) -> Result<Decoded, SyntaxError> {
    let mut value = String::with_capacity(content.len());
    let mut offsets = Vec::with_capacity(content.len() + 1);
    let mut chars = content.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        let at = content_start + i;
        let decoded = if c == '\\' {
            let Some((_, escape)) = chars.next() else {
                return Err(SyntaxError::new("Unfinished escape sequence", at));
            };
            match escape {
                '"' | '\'' | '\\' | '{' | '=' => escape,
                'n' => '\n',
                'r' => '\r',
                't' => '\t',
                'f' => '\u{c}',
                'b' => '\u{8}',
                'g' => '>',
                'l' => '<',
                'a' => '&',
                'x' => {
                    let mut code = 0u32;
                    let mut digits = 0;
                    while digits < 4 {
                        match chars.peek().and_then(|(_, d)| d.to_digit(16)) {
                            Some(d) => {
                                code = code * 16 + d;
                                digits += 1;
                                chars.next();
                            }
                            None => break,
                        }
                    }
                    if digits == 0 {
                        return Err(SyntaxError::new("Missing hexadecimal digits after \\x", at));
                    }
                    char::from_u32(code)
                        .ok_or_else(|| SyntaxError::new("Invalid \\x escape", at))?
                }
                other => {
                    return Err(SyntaxError::new(
                        format!("Unsupported escape sequence: \\{other}"),
                        at,
                    ))
                }
            }
        } else {
            c
        };
        value.push(decoded);
        offsets.extend(std::iter::repeat(at).take(decoded.len_utf8()));
    }
    offsets.push(content_start + content.len());
    Ok(Decoded { value, offsets })
}

/// Escapes text for placing it between `quote` characters of a non-raw literal.
pub fn escape(text: &str, quote: char) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    let mut prev = '\0';
    for c in text.chars() {
        if c == '\\' || c == quote || (c == '{' && prev == '$') {
            out.push('\\');
        }
        out.push(c);
        prev = c;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_escapes() {
        let decoded = decode(r#"a\"b\x41\g"#, 10).unwrap();
        assert_eq!(decoded.value, "a\"bA>");
        assert_eq!(decoded.offsets, vec![10, 11, 13, 14, 18, 20]);
    }

    #[test]
    fn test_decode_errors() {
        assert!(decode(r"\q", 0).is_err());
        assert!(decode("\\", 0).is_err());
        assert!(decode(r"\xz", 0).is_err());
    }

    #[test]
    fn test_escape() {
        assert_eq!(escape(r#"a"b\c${x}"#, '"'), r#"a\"b\\c$\{x}"#);
        assert_eq!(escape("it's", '"'), "it's");
        assert_eq!(escape("it's", '\''), r"it\'s");
    }
}
