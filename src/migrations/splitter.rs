//! Statement splitting for multi-statement SQL scripts.
//!
//! Scripts are executed one statement at a time, so the raw file content has
//! to be split on semicolons without breaking string literals, quoted
//! identifiers, or comments. `LOCK TABLES`, `UNLOCK TABLES` and `FLUSH`
//! lines from mysqldump output often arrive without a trailing semicolon and
//! terminate at end of line.

const SELF_TERMINATING: &[&str] = &["LOCK TABLES", "UNLOCK TABLES", "FLUSH"];

/// Splits script content into executable statements.
///
/// Comments (`-- ` line comments and `/* */` blocks) are stripped outside of
/// string literals. Empty fragments are dropped.
pub fn split_statements(content: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();

    let mut chars = content.chars().peekable();
    let mut in_single = false;
    let mut in_double = false;
    let mut in_backtick = false;

    while let Some(ch) = chars.next() {
        let in_string = in_single || in_double || in_backtick;

        if !in_string {
            // Line comment: `-- ` or `--` at end of line.
            if ch == '-' && chars.peek() == Some(&'-') {
                chars.next();
                match chars.peek() {
                    Some(' ') | Some('\t') | Some('\n') | None => {
                        for c in chars.by_ref() {
                            if c == '\n' {
                                current.push('\n');
                                break;
                            }
                        }
                        flush_self_terminating(&mut current, &mut statements);
                        continue;
                    }
                    // `--x` is a double unary minus, keep it.
                    _ => {
                        current.push('-');
                        current.push('-');
                        continue;
                    }
                }
            }
            // Block comment.
            if ch == '/' && chars.peek() == Some(&'*') {
                chars.next();
                let mut prev = '\0';
                for c in chars.by_ref() {
                    if prev == '*' && c == '/' {
                        break;
                    }
                    prev = c;
                }
                continue;
            }
            if ch == ';' {
                push_statement(&mut current, &mut statements);
                continue;
            }
        }

        match ch {
            '\'' if !in_double && !in_backtick => in_single = !in_single,
            '"' if !in_single && !in_backtick => in_double = !in_double,
            '`' if !in_single && !in_double => in_backtick = !in_backtick,
            '\\' if in_single || in_double => {
                current.push(ch);
                if let Some(escaped) = chars.next() {
                    current.push(escaped);
                }
                continue;
            }
            _ => {}
        }

        current.push(ch);

        if ch == '\n' && !in_single && !in_double && !in_backtick {
            flush_self_terminating(&mut current, &mut statements);
        }
    }

    // Trailing statement without a semicolon.
    push_statement(&mut current, &mut statements);
    statements
}

fn push_statement(buffer: &mut String, statements: &mut Vec<String>) {
    let trimmed = buffer.trim();
    if !trimmed.is_empty() {
        statements.push(trimmed.to_string());
    }
    buffer.clear();
}

/// Flushes the buffer at a line boundary when it holds a complete
/// self-terminating administrative statement.
fn flush_self_terminating(buffer: &mut String, statements: &mut Vec<String>) {
    let trimmed = buffer.trim();
    if trimmed.is_empty() {
        buffer.clear();
        return;
    }
    let upper = trimmed.to_uppercase();
    if SELF_TERMINATING.iter().any(|kw| upper.starts_with(kw)) {
        push_statement(buffer, statements);
    }
}
