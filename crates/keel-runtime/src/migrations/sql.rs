use std::iter::Peekable;
use std::str::Chars;

/// Split a migration script into individual statements.
///
/// Semicolons inside single-quoted strings, quoted identifiers, comments and
/// dollar-quoted bodies (`$$ ... $$`, `$tag$ ... $tag$`) do not end a
/// statement. Fragments that contain only whitespace and comments are dropped.
pub fn split_sql_statements(sql: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut has_code = false;
    let mut chars = sql.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\'' | '"' => {
                has_code = true;
                current.push(c);
                consume_quoted(&mut chars, &mut current, c);
            }
            '-' if chars.peek() == Some(&'-') => {
                current.push(c);
                for next in chars.by_ref() {
                    current.push(next);
                    if next == '\n' {
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                current.push(c);
                consume_block_comment(&mut chars, &mut current);
            }
            '$' => {
                has_code = true;
                current.push(c);
                if let Some(tag) = read_dollar_tag(&mut chars, &mut current) {
                    consume_dollar_body(&mut chars, &mut current, &tag);
                }
            }
            ';' => {
                flush(&mut statements, &mut current, has_code);
                has_code = false;
            }
            _ => {
                if !c.is_whitespace() {
                    has_code = true;
                }
                current.push(c);
            }
        }
    }

    flush(&mut statements, &mut current, has_code);
    statements
}

fn flush(statements: &mut Vec<String>, current: &mut String, has_code: bool) {
    if has_code {
        let stmt = current.trim();
        if !stmt.is_empty() {
            statements.push(stmt.to_string());
        }
    }
    current.clear();
}

/// Consume up to and including the closing quote. Doubled quotes are escapes.
fn consume_quoted(chars: &mut Peekable<Chars<'_>>, current: &mut String, quote: char) {
    while let Some(c) = chars.next() {
        current.push(c);
        if c == quote {
            if chars.peek() == Some(&quote) {
                if let Some(escaped) = chars.next() {
                    current.push(escaped);
                }
                continue;
            }
            return;
        }
    }
}

fn consume_block_comment(chars: &mut Peekable<Chars<'_>>, current: &mut String) {
    // opening '*'
    if let Some(star) = chars.next() {
        current.push(star);
    }
    let mut prev = '\0';
    for c in chars.by_ref() {
        current.push(c);
        if prev == '*' && c == '/' {
            return;
        }
        prev = c;
    }
}

/// Having consumed a `$`, read the rest of a dollar-quote tag such as `$$` or
/// `$body$`. Returns `None` for positional parameters like `$1`.
fn read_dollar_tag(chars: &mut Peekable<Chars<'_>>, current: &mut String) -> Option<String> {
    let mut tag = String::from("$");

    while let Some(&next) = chars.peek() {
        if next == '$' {
            chars.next();
            current.push(next);
            tag.push(next);
            return Some(tag);
        }

        let starts_with_digit = tag.len() == 1 && next.is_ascii_digit();
        if starts_with_digit || !(next.is_alphanumeric() || next == '_') {
            return None;
        }

        chars.next();
        current.push(next);
        tag.push(next);
    }

    None
}

fn consume_dollar_body(chars: &mut Peekable<Chars<'_>>, current: &mut String, tag: &str) {
    let body_start = current.len();
    for c in chars.by_ref() {
        current.push(c);
        if current.len() - body_start >= tag.len() && current.ends_with(tag) {
            return;
        }
    }
}
