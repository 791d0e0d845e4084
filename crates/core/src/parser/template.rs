use crate::ast::{Template, TemplatePart};
use crate::error::ParseError;

/// Find the `}` closing an interpolation whose body starts at `from`.
/// Nested braces (record literals) and quoted strings are skipped.
fn find_closing_brace(chars: &[char], from: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut pos = from;
    while pos < chars.len() {
        match chars[pos] {
            quote @ ('"' | '\'') => {
                pos += 1;
                while pos < chars.len() && chars[pos] != quote {
                    if chars[pos] == '\\' {
                        pos += 1;
                    }
                    pos += 1;
                }
            }
            '{' => depth += 1,
            '}' if depth == 0 => return Some(pos),
            '}' => depth -= 1,
            _ => {}
        }
        pos += 1;
    }
    None
}

/// Parse a template string mixing literal text with `${expr}` interpolations.
///
/// Each interpolation is parsed as a full expression. `\${` produces a
/// literal `${`. Error positions are offsets into `source`.
pub fn parse_template(source: &str) -> Result<Template, ParseError> {
    let chars: Vec<char> = source.chars().collect();
    let mut parts = Vec::new();
    let mut text = String::new();
    let mut pos = 0usize;

    while pos < chars.len() {
        let c = chars[pos];
        if c == '\\' && chars.get(pos + 1) == Some(&'$') && chars.get(pos + 2) == Some(&'{') {
            text.push_str("${");
            pos += 3;
            continue;
        }
        if c == '$' && chars.get(pos + 1) == Some(&'{') {
            let body_start = pos + 2;
            let close = find_closing_brace(&chars, body_start)
                .ok_or_else(|| ParseError::new(pos, "unterminated interpolation, expected '}'"))?;
            let body: String = chars[body_start..close].iter().collect();
            if body.trim().is_empty() {
                return Err(ParseError::new(pos, "empty interpolation"));
            }
            let expression =
                crate::parser::parse(&body).map_err(|e| e.offset_by(body_start))?;
            if !text.is_empty() {
                parts.push(TemplatePart::Text {
                    text: std::mem::take(&mut text),
                });
            }
            parts.push(TemplatePart::Interpolation {
                source: body.trim().to_string(),
                expression,
            });
            pos = close + 1;
            continue;
        }
        text.push(c);
        pos += 1;
    }

    if !text.is_empty() {
        parts.push(TemplatePart::Text { text });
    }
    Ok(Template { parts })
}
