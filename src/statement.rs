use crate::db::Dialect;

/// Split SQL text into statements on `;`.
///
/// Semicolons inside single-quoted strings (with `''` escapes), double-quoted
/// or backtick-quoted identifiers, `--` line comments and `/* */` block
/// comments do not split. The dialect adds its own lexical rules:
/// PostgreSQL `$tag$ ... $tag$` bodies, MySQL backslash escapes inside
/// quotes and `#` comments. Returned statements are trimmed, exclude the
/// terminating `;`, and blank or comment-only pieces are skipped.
pub fn split_statements(text: &str, dialect: Dialect) -> Vec<&str> {
    statement_boundaries(text, dialect)
        .into_iter()
        .map(|(start, end)| text[start..end].trim())
        .collect()
}

/// Number of statements `split_statements` would return.
pub fn count_statements(text: &str, dialect: Dialect) -> usize {
    statement_boundaries(text, dialect).len()
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b >= 0x80
}

/// Length of the `$tag$` opener at `pos`, if one starts there.
///
/// `$1` parameters and `$` inside identifiers are not openers.
fn dollar_tag_len(bytes: &[u8], pos: usize) -> Option<usize> {
    if pos > 0 && (is_ident_byte(bytes[pos - 1]) || bytes[pos - 1] == b'$') {
        return None;
    }
    let mut end = pos + 1;
    while end < bytes.len() && (bytes[end].is_ascii_alphanumeric() || bytes[end] == b'_') {
        end += 1;
    }
    if end >= bytes.len() || bytes[end] != b'$' {
        return None;
    }
    if end > pos + 1 && bytes[pos + 1].is_ascii_digit() {
        return None;
    }
    Some(end + 1 - pos)
}

/// (start, end) byte offsets of every non-empty statement.
///
/// Works on bytes: every delimiter is ASCII and never matches inside a
/// multi-byte UTF-8 sequence, so offsets always fall on char boundaries.
fn statement_boundaries(text: &str, dialect: Dialect) -> Vec<(usize, usize)> {
    let bytes = text.as_bytes();
    let backslash_escapes = dialect == Dialect::MySql;
    let mut boundaries = Vec::new();
    let mut start = 0;
    let mut in_single_quote = false;
    let mut in_double_quote = false;
    let mut in_backtick = false;
    let mut in_line_comment = false;
    let mut in_block_comment = false;
    // Whether the current piece holds anything besides whitespace and comments
    let mut has_code = false;

    let len = bytes.len();
    let mut i = 0;

    while i < len {
        let c = bytes[i];
        let next = bytes.get(i + 1).copied();

        if in_line_comment {
            if c == b'\n' {
                in_line_comment = false;
            }
        } else if in_block_comment {
            if c == b'*' && next == Some(b'/') {
                in_block_comment = false;
                i += 1;
            }
        } else if in_single_quote {
            if c == b'\\' && backslash_escapes {
                i += 1;
            } else if c == b'\'' {
                // Escaped quote ('')
                if next == Some(b'\'') {
                    i += 1;
                } else {
                    in_single_quote = false;
                }
            }
        } else if in_double_quote {
            if c == b'\\' && backslash_escapes {
                i += 1;
            } else if c == b'"' {
                in_double_quote = false;
            }
        } else if in_backtick {
            if c == b'`' {
                in_backtick = false;
            }
        } else {
            match c {
                b'-' if next == Some(b'-') => {
                    in_line_comment = true;
                    i += 1;
                }
                b'#' if dialect == Dialect::MySql => in_line_comment = true,
                b'/' if next == Some(b'*') => {
                    in_block_comment = true;
                    i += 1;
                }
                b';' => {
                    if has_code {
                        boundaries.push((start, i));
                    }
                    start = i + 1;
                    has_code = false;
                }
                b'$' if dialect == Dialect::PostgreSql => {
                    has_code = true;
                    if let Some(tag_len) = dollar_tag_len(bytes, i) {
                        let tag = &text[i..i + tag_len];
                        let body = i + tag_len;
                        // an unterminated body runs to the end of the text
                        i = match text[body..].find(tag) {
                            Some(offset) => body + offset + tag_len - 1,
                            None => len,
                        };
                    }
                }
                _ => {
                    match c {
                        b'\'' => in_single_quote = true,
                        b'"' => in_double_quote = true,
                        b'`' => in_backtick = true,
                        _ => {}
                    }
                    if !c.is_ascii_whitespace() {
                        has_code = true;
                    }
                }
            }
        }

        i += 1;
    }

    // Trailing statement without a terminating `;`
    if has_code {
        boundaries.push((start, text.len()));
    }

    boundaries
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_simple() {
        assert_eq!(
            split_statements("CREATE TABLE a (x int);\nINSERT INTO a VALUES (1);", Dialect::Sqlite),
            vec!["CREATE TABLE a (x int)", "INSERT INTO a VALUES (1)"]
        );
    }

    #[test]
    fn test_trailing_statement_without_semicolon() {
        assert_eq!(
            split_statements("SELECT 1; SELECT 2", Dialect::Sqlite),
            vec!["SELECT 1", "SELECT 2"]
        );
    }

    #[test]
    fn test_semicolon_in_string_literal() {
        assert_eq!(
            split_statements("INSERT INTO t VALUES ('a;b'); SELECT 1;", Dialect::Sqlite),
            vec!["INSERT INTO t VALUES ('a;b')", "SELECT 1"]
        );
    }

    #[test]
    fn test_escaped_quote_in_string() {
        assert_eq!(
            split_statements("INSERT INTO t VALUES ('it''s; fine'); SELECT 2", Dialect::Sqlite),
            vec!["INSERT INTO t VALUES ('it''s; fine')", "SELECT 2"]
        );
    }

    #[test]
    fn test_quoted_identifiers() {
        assert_eq!(count_statements("SELECT \"a;b\" FROM `c;d`;", Dialect::Sqlite), 1);
    }

    #[test]
    fn test_comments_do_not_split() {
        let sql = "-- setup; nothing here\nSELECT 1 /* a;b */;\nSELECT 2;";
        assert_eq!(count_statements(sql, Dialect::Sqlite), 2);
    }

    #[test]
    fn test_comment_only_pieces_are_skipped() {
        assert_eq!(count_statements("SELECT 1; -- done", Dialect::Sqlite), 1);
        assert_eq!(count_statements("/* header */ ;;", Dialect::Sqlite), 0);
        assert_eq!(count_statements("   ;  ; ", Dialect::Sqlite), 0);
        assert_eq!(count_statements("", Dialect::Sqlite), 0);
    }

    #[test]
    fn test_single_statement_with_terminator() {
        assert_eq!(count_statements("SELECT COUNT(*) FROM users;", Dialect::Sqlite), 1);
        assert_eq!(count_statements("SELECT * FROM users; DROP TABLE users;", Dialect::Sqlite), 2);
    }

    #[test]
    fn test_multibyte_text() {
        assert_eq!(
            split_statements("INSERT INTO t VALUES ('héllo');SELECT 'ü'", Dialect::Sqlite),
            vec!["INSERT INTO t VALUES ('héllo')", "SELECT 'ü'"]
        );
    }

    #[test]
    fn test_dollar_quoted_body_is_one_statement() {
        let sql = "CREATE FUNCTION f() RETURNS int AS $$ BEGIN RETURN 1; END; $$ LANGUAGE plpgsql;\nSELECT f();";
        let statements = split_statements(sql, Dialect::PostgreSql);
        assert_eq!(statements.len(), 2);
        assert!(statements[0].ends_with("LANGUAGE plpgsql"));
        assert_eq!(statements[1], "SELECT f()");
    }

    #[test]
    fn test_tagged_dollar_quote() {
        let sql = "SELECT $body$ a; $$ b; $body$, 'x'; SELECT 2";
        assert_eq!(count_statements(sql, Dialect::PostgreSql), 2);
        assert_eq!(count_statements("SELECT $$a;b$$", Dialect::PostgreSql), 1);
    }

    #[test]
    fn test_positional_parameter_is_not_a_quote() {
        assert_eq!(count_statements("SELECT $1; SELECT $2", Dialect::PostgreSql), 2);
        assert_eq!(count_statements("SELECT a$b$c; SELECT 2", Dialect::PostgreSql), 2);
    }

    #[test]
    fn test_dollar_is_plain_outside_postgres() {
        assert_eq!(count_statements("SELECT '$$'; SELECT $$a;b$$", Dialect::Sqlite), 3);
    }

    #[test]
    fn test_mysql_backslash_escapes() {
        let sql = r#"INSERT INTO t VALUES ('it\'s; fine', "a\";b"); SELECT 2"#;
        assert_eq!(
            split_statements(sql, Dialect::MySql),
            vec![r#"INSERT INTO t VALUES ('it\'s; fine', "a\";b")"#, "SELECT 2"]
        );
    }

    #[test]
    fn test_backslash_is_literal_in_standard_strings() {
        // 'C:\' closes at the second quote in PostgreSQL and SQLite
        assert_eq!(count_statements(r"SELECT 'C:\'; SELECT 2", Dialect::PostgreSql), 2);
    }

    #[test]
    fn test_mysql_hash_comment() {
        assert_eq!(count_statements("# dump header; v1\nSELECT 1;", Dialect::MySql), 1);
    }
}
