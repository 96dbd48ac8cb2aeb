//! Tokenizer for predicate expressions.

use crate::error::{AclError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Token {
    LParen,
    RParen,
    LBrace,
    RBrace,
    Comma,
    Eq,
    NotEq,
    /// Quoted string, quotes removed.
    Str(String),
    /// Unquoted word: identifiers, keywords, bare literals such as `GET` or `/a/b`.
    Word(String),
    /// Exchange attribute reference, without the leading `%`
    /// (`u`, `R`, `{i,Authorization}`).
    Attr(String),
}

/// Token plus its byte offset in the source, for error reporting.
#[derive(Debug, Clone)]
pub(crate) struct Spanned {
    pub token: Token,
    pub offset: usize,
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '-' | '_' | '.' | '/' | '*' | ':' | '$' | '@' | '+' | '?' | '#' | '^')
}

pub(crate) fn tokenize(source: &str) -> Result<Vec<Spanned>> {
    let mut tokens = Vec::new();
    let mut chars = source.char_indices().peekable();

    while let Some(&(offset, c)) = chars.peek() {
        let token = match c {
            c if c.is_whitespace() => {
                chars.next();
                continue;
            }
            '(' => {
                chars.next();
                Token::LParen
            }
            ')' => {
                chars.next();
                Token::RParen
            }
            '{' => {
                chars.next();
                Token::LBrace
            }
            '}' => {
                chars.next();
                Token::RBrace
            }
            ',' => {
                chars.next();
                Token::Comma
            }
            '=' => {
                chars.next();
                // Accept `==` as an alias of `=`.
                if matches!(chars.peek(), Some(&(_, '='))) {
                    chars.next();
                }
                Token::Eq
            }
            '!' => {
                chars.next();
                match chars.next() {
                    Some((_, '=')) => Token::NotEq,
                    _ => {
                        return Err(AclError::invalid(format!(
                            "expected '=' after '!' at offset {offset}"
                        )));
                    }
                }
            }
            '\'' | '"' => {
                let quote = c;
                chars.next();
                let mut value = String::new();
                let mut closed = false;
                while let Some((_, c)) = chars.next() {
                    match c {
                        '\\' => match chars.next() {
                            Some((_, escaped)) => value.push(escaped),
                            None => break,
                        },
                        c if c == quote => {
                            closed = true;
                            break;
                        }
                        c => value.push(c),
                    }
                }
                if !closed {
                    return Err(AclError::invalid(format!(
                        "unterminated string starting at offset {offset}"
                    )));
                }
                Token::Str(value)
            }
            '%' => {
                chars.next();
                match chars.next() {
                    Some((_, '{')) => {
                        let mut body = String::new();
                        let mut closed = false;
                        for (_, c) in chars.by_ref() {
                            if c == '}' {
                                closed = true;
                                break;
                            }
                            body.push(c);
                        }
                        if !closed {
                            return Err(AclError::invalid(format!(
                                "unterminated attribute starting at offset {offset}"
                            )));
                        }
                        Token::Attr(format!("{{{body}}}"))
                    }
                    Some((_, c)) if c.is_ascii_alphabetic() => Token::Attr(c.to_string()),
                    _ => {
                        return Err(AclError::invalid(format!(
                            "malformed attribute at offset {offset}"
                        )));
                    }
                }
            }
            c if is_word_char(c) => {
                let mut word = String::new();
                while let Some(&(_, c)) = chars.peek() {
                    if !is_word_char(c) {
                        break;
                    }
                    word.push(c);
                    chars.next();
                }
                Token::Word(word)
            }
            other => {
                return Err(AclError::invalid(format!(
                    "unexpected character '{other}' at offset {offset}"
                )));
            }
        };

        tokens.push(Spanned { token, offset });
    }

    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<Token> {
        tokenize(source)
            .unwrap()
            .into_iter()
            .map(|s| s.token)
            .collect()
    }

    #[test]
    fn comparison() {
        assert_eq!(
            kinds("method=GET"),
            vec![
                Token::Word("method".into()),
                Token::Eq,
                Token::Word("GET".into())
            ]
        );
    }

    #[test]
    fn function_with_quoted_and_array_args() {
        assert_eq!(
            kinds("path-prefix(path={'/a', \"/b\"})"),
            vec![
                Token::Word("path-prefix".into()),
                Token::LParen,
                Token::Word("path".into()),
                Token::Eq,
                Token::LBrace,
                Token::Str("/a".into()),
                Token::Comma,
                Token::Str("/b".into()),
                Token::RBrace,
                Token::RParen,
            ]
        );
    }

    #[test]
    fn attributes() {
        assert_eq!(
            kinds("%u != %{i,X-Tenant}"),
            vec![
                Token::Attr("u".into()),
                Token::NotEq,
                Token::Attr("{i,X-Tenant}".into()),
            ]
        );
    }

    #[test]
    fn escaped_quote_in_string() {
        assert_eq!(kinds(r"'it\'s'"), vec![Token::Str("it's".into())]);
    }

    #[test]
    fn rejects_unterminated_string() {
        assert!(matches!(
            tokenize("path('/a)"),
            Err(AclError::InvalidDefinition { .. })
        ));
    }

    #[test]
    fn rejects_lone_bang() {
        assert!(tokenize("!method").is_err());
    }

    #[test]
    fn rejects_unknown_character() {
        assert!(tokenize("method=GET; drop").is_err());
    }
}
