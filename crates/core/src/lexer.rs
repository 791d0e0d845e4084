use crate::error::ParseError;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// Identifiers and keywords (`true`, `false`, `null`, `self`); the parser tells them apart
    Ident(String),
    /// Quoted string literal (content without quotes, escapes resolved)
    Str(String),
    /// Numeric literal
    Number(f64),
    /// `#name` self-property reference
    PropertyRef(String),
    /// Bare UUID entity id
    EntityId(String),
    /// `@` prefix for quoted entity ids
    At,
    // Punctuation
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    LParen,
    RParen,
    Colon,
    Comma,
    Dot,
    // Arithmetic operators
    Plus,
    Minus,
    Star,
    Slash,
    // Comparison operators
    EqEq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
    // Logical operators
    AndAnd,
    OrOr,
    Bang,
    // End of input
    Eof,
}

#[derive(Debug, Clone)]
pub struct Spanned {
    pub token: Token,
    /// Character offset of the first character of the token.
    pub pos: usize,
}

const UUID_LEN: usize = 36;

/// True when a canonical 8-4-4-4-12 hex UUID starts at `pos` and is not
/// immediately followed by another identifier character.
fn uuid_at(chars: &[char], pos: usize) -> bool {
    if pos + UUID_LEN > chars.len() {
        return false;
    }
    for (i, c) in chars[pos..pos + UUID_LEN].iter().enumerate() {
        let ok = match i {
            8 | 13 | 18 | 23 => *c == '-',
            _ => c.is_ascii_hexdigit(),
        };
        if !ok {
            return false;
        }
    }
    match chars.get(pos + UUID_LEN) {
        Some(next) => !(next.is_alphanumeric() || *next == '_'),
        None => true,
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

pub fn lex(src: &str) -> Result<Vec<Spanned>, ParseError> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = src.chars().collect();
    let mut pos = 0usize;

    while pos < chars.len() {
        let c = chars[pos];

        if c.is_whitespace() {
            pos += 1;
            continue;
        }

        let start = pos;
        let push = |token: Token, tokens: &mut Vec<Spanned>| {
            tokens.push(Spanned { token, pos: start });
        };

        // Bare entity id. Checked before numbers and identifiers: a UUID may
        // start with either a digit or a hex letter.
        if uuid_at(&chars, pos) {
            let id: String = chars[pos..pos + UUID_LEN].iter().collect();
            pos += UUID_LEN;
            push(Token::EntityId(id.to_ascii_lowercase()), &mut tokens);
            continue;
        }

        // String literal, single or double quoted
        if c == '"' || c == '\'' {
            let quote = c;
            pos += 1;
            let mut s = String::new();
            loop {
                if pos >= chars.len() {
                    return Err(ParseError::lex(start, "unterminated string literal"));
                }
                let sc = chars[pos];
                if sc == quote {
                    pos += 1;
                    break;
                }
                if sc == '\\' {
                    pos += 1;
                    if pos >= chars.len() {
                        return Err(ParseError::lex(start, "unterminated escape in string"));
                    }
                    match chars[pos] {
                        '"' => s.push('"'),
                        '\'' => s.push('\''),
                        '\\' => s.push('\\'),
                        'n' => s.push('\n'),
                        't' => s.push('\t'),
                        other => {
                            s.push('\\');
                            s.push(other);
                        }
                    }
                    pos += 1;
                    continue;
                }
                s.push(sc);
                pos += 1;
            }
            push(Token::Str(s), &mut tokens);
            continue;
        }

        // Number. A leading '-' is always a separate operator token.
        if c.is_ascii_digit() {
            while pos < chars.len() && chars[pos].is_ascii_digit() {
                pos += 1;
            }
            if pos + 1 < chars.len() && chars[pos] == '.' && chars[pos + 1].is_ascii_digit() {
                pos += 1;
                while pos < chars.len() && chars[pos].is_ascii_digit() {
                    pos += 1;
                }
            }
            if pos < chars.len() && (chars[pos] == 'e' || chars[pos] == 'E') {
                let mut look = pos + 1;
                if look < chars.len() && (chars[look] == '+' || chars[look] == '-') {
                    look += 1;
                }
                if look < chars.len() && chars[look].is_ascii_digit() {
                    pos = look;
                    while pos < chars.len() && chars[pos].is_ascii_digit() {
                        pos += 1;
                    }
                }
            }
            let s: String = chars[start..pos].iter().collect();
            let n: f64 = s
                .parse()
                .map_err(|_| ParseError::lex(start, format!("invalid number '{}'", s)))?;
            push(Token::Number(n), &mut tokens);
            continue;
        }

        // Self-property reference
        if c == '#' {
            pos += 1;
            if pos >= chars.len() || !is_ident_start(chars[pos]) {
                return Err(ParseError::lex(start, "expected property name after '#'"));
            }
            let name_start = pos;
            while pos < chars.len() && is_ident_char(chars[pos]) {
                pos += 1;
            }
            let name: String = chars[name_start..pos].iter().collect();
            push(Token::PropertyRef(name), &mut tokens);
            continue;
        }

        // Two-character operators
        let next = chars.get(pos + 1).copied();
        let two = match (c, next) {
            ('=', Some('=')) => Some(Token::EqEq),
            ('!', Some('=')) => Some(Token::Neq),
            ('<', Some('=')) => Some(Token::Lte),
            ('>', Some('=')) => Some(Token::Gte),
            ('&', Some('&')) => Some(Token::AndAnd),
            ('|', Some('|')) => Some(Token::OrOr),
            _ => None,
        };
        if let Some(token) = two {
            pos += 2;
            push(token, &mut tokens);
            continue;
        }

        let single = match c {
            '@' => Some(Token::At),
            '{' => Some(Token::LBrace),
            '}' => Some(Token::RBrace),
            '[' => Some(Token::LBracket),
            ']' => Some(Token::RBracket),
            '(' => Some(Token::LParen),
            ')' => Some(Token::RParen),
            ':' => Some(Token::Colon),
            ',' => Some(Token::Comma),
            '.' => Some(Token::Dot),
            '+' => Some(Token::Plus),
            '-' => Some(Token::Minus),
            '*' => Some(Token::Star),
            '/' => Some(Token::Slash),
            '<' => Some(Token::Lt),
            '>' => Some(Token::Gt),
            '!' => Some(Token::Bang),
            _ => None,
        };
        if let Some(token) = single {
            pos += 1;
            push(token, &mut tokens);
            continue;
        }

        // Identifier / keyword
        if is_ident_start(c) {
            while pos < chars.len() && is_ident_char(chars[pos]) {
                pos += 1;
            }
            let word: String = chars[start..pos].iter().collect();
            push(Token::Ident(word), &mut tokens);
            continue;
        }

        let hint = match c {
            '=' => "unexpected character '='; use '==' for equality".to_string(),
            '&' => "unexpected character '&'; use '&&'".to_string(),
            '|' => "unexpected character '|'; use '||'".to_string(),
            other => format!("unexpected character '{}'", other),
        };
        return Err(ParseError::lex(start, hint));
    }

    tokens.push(Spanned {
        token: Token::Eof,
        pos: chars.len(),
    });
    Ok(tokens)
}
