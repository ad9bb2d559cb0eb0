//! Tokenizer for the supported Rego subset.

use serde_json::Number;

/// A syntax problem at a specific line of a policy source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntaxError {
    pub line: usize,
    pub message: String,
}

impl SyntaxError {
    pub fn new(line: usize, message: impl Into<String>) -> Self {
        Self {
            line,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Ident(String),
    Str(String),
    Number(Number),
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    LParen,
    RParen,
    Comma,
    Colon,
    Semicolon,
    Dot,
    /// `:=`
    Assign,
    /// `=`
    Unify,
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
    Newline,
    Eof,
}

impl TokenKind {
    pub fn describe(&self) -> String {
        match self {
            Self::Ident(name) => format!("identifier '{name}'"),
            Self::Str(_) => "string".to_string(),
            Self::Number(n) => format!("number {n}"),
            Self::LBrace => "'{'".to_string(),
            Self::RBrace => "'}'".to_string(),
            Self::LBracket => "'['".to_string(),
            Self::RBracket => "']'".to_string(),
            Self::LParen => "'('".to_string(),
            Self::RParen => "')'".to_string(),
            Self::Comma => "','".to_string(),
            Self::Colon => "':'".to_string(),
            Self::Semicolon => "';'".to_string(),
            Self::Dot => "'.'".to_string(),
            Self::Assign => "':='".to_string(),
            Self::Unify => "'='".to_string(),
            Self::Eq => "'=='".to_string(),
            Self::Neq => "'!='".to_string(),
            Self::Lt => "'<'".to_string(),
            Self::Lte => "'<='".to_string(),
            Self::Gt => "'>'".to_string(),
            Self::Gte => "'>='".to_string(),
            Self::Newline => "end of line".to_string(),
            Self::Eof => "end of file".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub line: usize,
}

/// Split a policy source into tokens. Lines are 1-based.
pub fn tokenize(src: &str) -> Result<Vec<Token>, SyntaxError> {
    let chars: Vec<char> = src.chars().collect();
    let mut tokens = Vec::new();
    let mut line = 1;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let start_line = line;
        let single = |kind| Token {
            kind,
            line: start_line,
        };

        match c {
            '\n' => {
                tokens.push(single(TokenKind::Newline));
                line += 1;
                i += 1;
            }
            ' ' | '\t' | '\r' => i += 1,
            '#' => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
            }
            '{' => {
                tokens.push(single(TokenKind::LBrace));
                i += 1;
            }
            '}' => {
                tokens.push(single(TokenKind::RBrace));
                i += 1;
            }
            '[' => {
                tokens.push(single(TokenKind::LBracket));
                i += 1;
            }
            ']' => {
                tokens.push(single(TokenKind::RBracket));
                i += 1;
            }
            '(' => {
                tokens.push(single(TokenKind::LParen));
                i += 1;
            }
            ')' => {
                tokens.push(single(TokenKind::RParen));
                i += 1;
            }
            ',' => {
                tokens.push(single(TokenKind::Comma));
                i += 1;
            }
            ';' => {
                tokens.push(single(TokenKind::Semicolon));
                i += 1;
            }
            '.' => {
                tokens.push(single(TokenKind::Dot));
                i += 1;
            }
            ':' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(single(TokenKind::Assign));
                    i += 2;
                } else {
                    tokens.push(single(TokenKind::Colon));
                    i += 1;
                }
            }
            '=' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(single(TokenKind::Eq));
                    i += 2;
                } else {
                    tokens.push(single(TokenKind::Unify));
                    i += 1;
                }
            }
            '!' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(single(TokenKind::Neq));
                    i += 2;
                } else {
                    return Err(SyntaxError::new(line, "unexpected character '!'"));
                }
            }
            '<' | '>' => {
                let with_eq = chars.get(i + 1) == Some(&'=');
                let kind = match (c, with_eq) {
                    ('<', true) => TokenKind::Lte,
                    ('<', false) => TokenKind::Lt,
                    (_, true) => TokenKind::Gte,
                    (_, false) => TokenKind::Gt,
                };
                tokens.push(single(kind));
                i += if with_eq { 2 } else { 1 };
            }
            '"' => {
                let (value, next) = lex_string(&chars, i + 1, line)?;
                tokens.push(single(TokenKind::Str(value)));
                i = next;
            }
            '`' => {
                let mut value = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        Some('`') => break,
                        Some(ch) => {
                            if *ch == '\n' {
                                line += 1;
                            }
                            value.push(*ch);
                            i += 1;
                        }
                        None => {
                            return Err(SyntaxError::new(start_line, "unterminated raw string"))
                        }
                    }
                }
                i += 1;
                tokens.push(single(TokenKind::Str(value)));
            }
            '-' if chars.get(i + 1).map(|d| d.is_ascii_digit()).unwrap_or(false) => {
                let (number, next) = lex_number(&chars, i, line)?;
                tokens.push(single(TokenKind::Number(number)));
                i = next;
            }
            d if d.is_ascii_digit() => {
                let (number, next) = lex_number(&chars, i, line)?;
                tokens.push(single(TokenKind::Number(number)));
                i = next;
            }
            a if a.is_alphabetic() || a == '_' => {
                let begin = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let ident: String = chars[begin..i].iter().collect();
                tokens.push(single(TokenKind::Ident(ident)));
            }
            other => {
                return Err(SyntaxError::new(
                    line,
                    format!("unexpected character '{other}'"),
                ))
            }
        }
    }

    tokens.push(Token {
        kind: TokenKind::Eof,
        line,
    });
    Ok(tokens)
}

fn lex_string(chars: &[char], mut i: usize, line: usize) -> Result<(String, usize), SyntaxError> {
    let mut value = String::new();
    loop {
        let Some(&c) = chars.get(i) else {
            return Err(SyntaxError::new(line, "unterminated string"));
        };
        match c {
            '"' => return Ok((value, i + 1)),
            '\n' => return Err(SyntaxError::new(line, "newline in string literal")),
            '\\' => {
                let escaped = chars
                    .get(i + 1)
                    .ok_or_else(|| SyntaxError::new(line, "unterminated escape"))?;
                match escaped {
                    '"' => value.push('"'),
                    '\\' => value.push('\\'),
                    '/' => value.push('/'),
                    'n' => value.push('\n'),
                    't' => value.push('\t'),
                    'r' => value.push('\r'),
                    'u' => {
                        let hex: String = chars.get(i + 2..i + 6).unwrap_or(&[]).iter().collect();
                        let code = u32::from_str_radix(&hex, 16)
                            .ok()
                            .filter(|_| hex.len() == 4)
                            .and_then(char::from_u32)
                            .ok_or_else(|| {
                                SyntaxError::new(line, format!("invalid unicode escape '\\u{hex}'"))
                            })?;
                        value.push(code);
                        i += 4;
                    }
                    other => {
                        return Err(SyntaxError::new(
                            line,
                            format!("invalid escape sequence '\\{other}'"),
                        ))
                    }
                }
                i += 2;
            }
            other => {
                value.push(other);
                i += 1;
            }
        }
    }
}

fn lex_number(chars: &[char], mut i: usize, line: usize) -> Result<(Number, usize), SyntaxError> {
    let begin = i;
    if chars[i] == '-' {
        i += 1;
    }
    let mut is_float = false;
    while let Some(&c) = chars.get(i) {
        if c.is_ascii_digit() {
            i += 1;
        } else if c == '.' && !is_float && chars.get(i + 1).map(|d| d.is_ascii_digit()).unwrap_or(false) {
            is_float = true;
            i += 1;
        } else if (c == 'e' || c == 'E') && i > begin {
            is_float = true;
            i += 1;
            if matches!(chars.get(i), Some('+') | Some('-')) {
                i += 1;
            }
        } else {
            break;
        }
    }
    let text: String = chars[begin..i].iter().collect();
    let number = if is_float {
        text.parse::<f64>().ok().and_then(Number::from_f64)
    } else {
        text.parse::<i64>().ok().map(Number::from)
    };
    number
        .map(|n| (n, i))
        .ok_or_else(|| SyntaxError::new(line, format!("invalid number '{text}'")))
}
