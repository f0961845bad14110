/// Strip formatting artifacts a model may wrap around a SQL statement.
///
/// Removes surrounding whitespace, markdown code fences (with an optional
/// language tag) and leading labels such as `SQLQuery:`. The statement
/// itself is never inspected. Idempotent: passes repeat until nothing
/// changes, so clean input comes back untouched.
pub fn sanitize(raw: &str) -> String {
    let mut current = raw;
    loop {
        let next = strip_once(current);
        if next == current {
            return next.to_string();
        }
        current = next;
    }
}

const FENCE: &str = "```";

/// Labels some models put in front of the statement.
const LABELS: [&str; 5] = ["SQLQuery:", "SQL Query:", "SQLResult:", "SQL:", "Query:"];

/// Fence language tags dropped even when the statement follows on the same line.
const LANGUAGE_TAGS: [&str; 7] = ["sql", "mysql", "postgresql", "postgres", "pgsql", "psql", "sqlite"];

fn strip_once(text: &str) -> &str {
    let text = text.trim();
    let text = strip_label(text);
    let text = strip_leading_fence(text);
    strip_trailing_fence(text)
}

fn strip_label(text: &str) -> &str {
    for label in LABELS {
        if let Some(prefix) = text.get(..label.len()) {
            if prefix.eq_ignore_ascii_case(label) {
                return text[label.len()..].trim_start();
            }
        }
    }
    text
}

fn strip_leading_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix(FENCE) else {
        return text;
    };

    let tag_len = rest
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '+'))
        .unwrap_or(rest.len());
    if tag_len == 0 {
        return rest;
    }

    let (tag, after) = rest.split_at(tag_len);
    let tag_alone_on_line = after.is_empty() || after.starts_with('\n') || after.starts_with("\r\n");
    let known_tag = LANGUAGE_TAGS.iter().any(|t| t.eq_ignore_ascii_case(tag))
        && after.starts_with(char::is_whitespace);

    if tag_alone_on_line || known_tag {
        after
    } else {
        rest
    }
}

fn strip_trailing_fence(text: &str) -> &str {
    text.strip_suffix(FENCE).unwrap_or(text)
}
