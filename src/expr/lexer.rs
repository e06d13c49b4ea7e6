//! Tokenizer for expression spans.
//!
//! Turns the body of a `${…}` span into a token stream for the parser.
//! The surface is a small JavaScript-flavoured expression dialect:
//! identifiers, string/number/boolean/null literals, arithmetic,
//! comparisons, boolean logic, property and index access, and the ternary
//! operator.

use super::ExprError;

/// A single lexical token.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Ident(String),
    Str(String),
    Num(f64),
    True,
    False,
    Null,

    Plus,
    Minus,
    Star,
    Slash,
    Percent,

    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,

    AndAnd,
    OrOr,
    Bang,

    Question,
    Colon,
    Dot,
    Comma,
    LParen,
    RParen,
    LBracket,
    RBracket,
}

/// Tokenize an expression body. Errors carry the offending character or
/// construct so loader diagnostics stay readable.
pub fn tokenize(input: &str) -> Result<Vec<Token>, ExprError> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = input.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' | '\r' | '\n' => i += 1,
            '+' => {
                tokens.push(Token::Plus);
                i += 1;
            }
            '-' => {
                tokens.push(Token::Minus);
                i += 1;
            }
            '*' => {
                tokens.push(Token::Star);
                i += 1;
            }
            '/' => {
                tokens.push(Token::Slash);
                i += 1;
            }
            '%' => {
                tokens.push(Token::Percent);
                i += 1;
            }
            '?' => {
                tokens.push(Token::Question);
                i += 1;
            }
            ':' => {
                tokens.push(Token::Colon);
                i += 1;
            }
            '.' => {
                tokens.push(Token::Dot);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '[' => {
                tokens.push(Token::LBracket);
                i += 1;
            }
            ']' => {
                tokens.push(Token::RBracket);
                i += 1;
            }
            '=' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::EqEq);
                    i += 2;
                } else {
                    return Err(ExprError::Parse("assignment is not supported".to_string()));
                }
            }
            '!' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::NotEq);
                    i += 2;
                } else {
                    tokens.push(Token::Bang);
                    i += 1;
                }
            }
            '<' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Le);
                    i += 2;
                } else {
                    tokens.push(Token::Lt);
                    i += 1;
                }
            }
            '>' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Ge);
                    i += 2;
                } else {
                    tokens.push(Token::Gt);
                    i += 1;
                }
            }
            '&' => {
                if chars.get(i + 1) == Some(&'&') {
                    tokens.push(Token::AndAnd);
                    i += 2;
                } else {
                    return Err(ExprError::Parse("expected && after &".to_string()));
                }
            }
            '|' => {
                if chars.get(i + 1) == Some(&'|') {
                    tokens.push(Token::OrOr);
                    i += 2;
                } else {
                    return Err(ExprError::Parse("expected || after |".to_string()));
                }
            }
            '\'' | '"' => {
                let quote = c;
                let mut value = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        None => {
                            return Err(ExprError::Parse("unterminated string literal".to_string()));
                        }
                        Some(&ch) if ch == quote => {
                            i += 1;
                            break;
                        }
                        Some('\\') => {
                            let escaped = chars.get(i + 1).ok_or_else(|| {
                                ExprError::Parse("dangling escape in string literal".to_string())
                            })?;
                            value.push(match escaped {
                                'n' => '\n',
                                't' => '\t',
                                'r' => '\r',
                                other => *other,
                            });
                            i += 2;
                        }
                        Some(&ch) => {
                            value.push(ch);
                            i += 1;
                        }
                    }
                }
                tokens.push(Token::Str(value));
            }
            '0'..='9' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let literal: String = chars[start..i].iter().collect();
                let value: f64 = literal
                    .parse()
                    .map_err(|_| ExprError::Parse(format!("invalid number: {literal}")))?;
                tokens.push(Token::Num(value));
            }
            c if c.is_alphabetic() || c == '_' || c == '$' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '$')
                {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                tokens.push(match word.as_str() {
                    "true" => Token::True,
                    "false" => Token::False,
                    "null" => Token::Null,
                    _ => Token::Ident(word),
                });
            }
            other => {
                return Err(ExprError::Parse(format!("unexpected character: {other}")));
            }
        }
    }

    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_concat_expression() {
        let tokens = tokenize("'Bearer ' + secrets.API_KEY").unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::Str("Bearer ".to_string()),
                Token::Plus,
                Token::Ident("secrets".to_string()),
                Token::Dot,
                Token::Ident("API_KEY".to_string()),
            ]
        );
    }

    #[test]
    fn test_tokenize_operators() {
        let tokens = tokenize("a >= 2 && !b || c != null").unwrap();
        assert!(tokens.contains(&Token::Ge));
        assert!(tokens.contains(&Token::AndAnd));
        assert!(tokens.contains(&Token::Bang));
        assert!(tokens.contains(&Token::OrOr));
        assert!(tokens.contains(&Token::NotEq));
        assert!(tokens.contains(&Token::Null));
    }

    #[test]
    fn test_tokenize_string_escapes() {
        let tokens = tokenize(r#""line\n\"quoted\"""#).unwrap();
        assert_eq!(tokens, vec![Token::Str("line\n\"quoted\"".to_string())]);
    }

    #[test]
    fn test_tokenize_rejects_assignment() {
        assert!(tokenize("a = 1").is_err());
    }

    #[test]
    fn test_tokenize_unterminated_string() {
        assert!(tokenize("'oops").is_err());
    }
}
