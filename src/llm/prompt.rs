use crate::db::Dialect;

/// Render the single prompt sent to the model for one question.
///
/// Pure: the same inputs always produce the same text.
pub fn render_prompt(dialect: Dialect, schema: &str, question: &str) -> String {
    format!(
        "You are a {dialect} expert.\n\
         Given the database schema below:\n\n\
         {schema}\n\n\
         Write one valid {dialect} query for the following request:\n\
         {question}\n\n\
         Rules:\n\
         - Return only the SQL statement. No explanations or other prose.\n\
         - Do not prefix the statement with a label such as \"SQLQuery:\".\n\
         - Do not wrap the statement in markdown code fences.\n\
         - Do not add a LIMIT clause unless the request explicitly asks for one.\n",
        dialect = dialect.name(),
        schema = schema,
        question = question,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_prompt_snapshot() {
        let prompt = render_prompt(
            Dialect::Sqlite,
            "CREATE TABLE users (\n    id int\n)",
            "how many users are there?",
        );
        assert_eq!(
            prompt,
            "You are a SQLite expert.\n\
             Given the database schema below:\n\n\
             CREATE TABLE users (\n    id int\n)\n\n\
             Write one valid SQLite query for the following request:\n\
             how many users are there?\n\n\
             Rules:\n\
             - Return only the SQL statement. No explanations or other prose.\n\
             - Do not prefix the statement with a label such as \"SQLQuery:\".\n\
             - Do not wrap the statement in markdown code fences.\n\
             - Do not add a LIMIT clause unless the request explicitly asks for one.\n"
        );
    }

    #[test]
    fn test_question_is_passed_verbatim() {
        let question = "  list {everything} -- please ";
        let prompt = render_prompt(Dialect::PostgreSql, "", question);
        assert!(prompt.contains(question));
        assert!(prompt.starts_with("You are a PostgreSQL expert."));
    }
}
