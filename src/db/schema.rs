use tracing::debug;

use super::Database;
use crate::error::AskError;

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDetails {
    pub name: String,
    pub data_type: String,
    pub is_nullable: bool,
    pub is_primary_key: bool,
}

impl ColumnDetails {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            is_nullable: true,
            is_primary_key: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableDescription {
    pub name: String,
    pub columns: Vec<ColumnDetails>,
}

impl TableDescription {
    /// (column name, column type) pairs in declared order.
    pub fn column_pairs(&self) -> Vec<(&str, &str)> {
        self.columns
            .iter()
            .map(|c| (c.name.as_str(), c.data_type.as_str()))
            .collect()
    }

    pub fn ddl(&self) -> String {
        let mut ddl = format!("CREATE TABLE {} (\n", self.name);

        for (i, col) in self.columns.iter().enumerate() {
            let null_str = if col.is_nullable { "" } else { " NOT NULL" };
            let pk_str = if col.is_primary_key {
                " PRIMARY KEY"
            } else {
                ""
            };
            let comma = if i + 1 < self.columns.len() { "," } else { "" };

            ddl.push_str(&format!(
                "    {} {}{}{}{}\n",
                col.name, col.data_type, null_str, pk_str, comma
            ));
        }

        ddl.push(')');
        ddl
    }
}

/// Tables and column types of one database snapshot. Never carries row data.
///
/// Rebuild it with [`describe`] whenever the schema changes.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SchemaDescription {
    pub tables: Vec<TableDescription>,
}

impl SchemaDescription {
    pub fn table(&self, name: &str) -> Option<&TableDescription> {
        self.tables.iter().find(|t| t.name == name)
    }

    pub fn table_names(&self) -> Vec<&str> {
        self.tables.iter().map(|t| t.name.as_str()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Text handed to the language model: one CREATE TABLE block per table.
    pub fn render(&self) -> String {
        self.tables
            .iter()
            .map(TableDescription::ddl)
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// Read the schema of every table in the database's current context.
pub async fn describe(db: &dyn Database) -> Result<SchemaDescription, AskError> {
    let database = db
        .current_database()
        .await
        .map_err(|e| AskError::Introspection(format!("{:#}", e)))?;
    if database.is_none() {
        return Err(AskError::Introspection(
            "connection has no selected database".to_string(),
        ));
    }

    let names = db
        .tables()
        .await
        .map_err(|e| AskError::Introspection(format!("{:#}", e)))?;

    let mut tables = Vec::with_capacity(names.len());
    for name in names {
        let columns = db
            .columns(&name)
            .await
            .map_err(|e| AskError::Introspection(format!("{:#}", e)))?;
        tables.push(TableDescription { name, columns });
    }

    debug!(tables = tables.len(), "schema described");
    Ok(SchemaDescription { tables })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SqliteDatabase;

    #[test]
    fn test_table_ddl() {
        let table = TableDescription {
            name: "users".to_string(),
            columns: vec![
                ColumnDetails {
                    name: "id".to_string(),
                    data_type: "integer".to_string(),
                    is_nullable: false,
                    is_primary_key: true,
                },
                ColumnDetails::new("name", "text"),
            ],
        };
        assert_eq!(
            table.ddl(),
            "CREATE TABLE users (\n    id integer NOT NULL PRIMARY KEY,\n    name text\n)"
        );
    }

    #[test]
    fn test_render_separates_tables() {
        let schema = SchemaDescription {
            tables: vec![
                TableDescription {
                    name: "a".to_string(),
                    columns: vec![ColumnDetails::new("x", "int")],
                },
                TableDescription {
                    name: "b".to_string(),
                    columns: vec![ColumnDetails::new("y", "text")],
                },
            ],
        };
        let text = schema.render();
        assert!(text.contains("CREATE TABLE a (\n    x int\n)\n\nCREATE TABLE b ("));
    }

    #[tokio::test]
    async fn test_describe_lists_tables_and_columns() {
        let db = SqliteDatabase::in_memory().unwrap();
        db.execute("CREATE TABLE users (id int, name text)").await.unwrap();
        db.execute("CREATE TABLE orders (id int, user_id int, total float)")
            .await
            .unwrap();
        db.execute("INSERT INTO users VALUES (1, 'ada')").await.unwrap();

        let schema = describe(&db).await.unwrap();

        assert_eq!(schema.table_names(), vec!["orders", "users"]);
        assert_eq!(
            schema.table("users").unwrap().column_pairs(),
            vec![("id", "int"), ("name", "text")]
        );
        assert_eq!(
            schema.table("orders").unwrap().column_pairs(),
            vec![("id", "int"), ("user_id", "int"), ("total", "float")]
        );
        // row data never leaks into the description
        assert!(!schema.render().contains("ada"));
    }

    #[tokio::test]
    async fn test_describe_empty_database() {
        let db = SqliteDatabase::in_memory().unwrap();
        let schema = describe(&db).await.unwrap();
        assert!(schema.is_empty());
        assert_eq!(schema.render(), "");
    }
}
