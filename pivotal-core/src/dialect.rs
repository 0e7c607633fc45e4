use crate::value::Value;

/// SQL flavour of a connection.
///
/// Everything the engine renders goes through the dialect: parameter
/// placeholders, identifier quoting, inline literals used by the search
/// builder, and the shape of an insert without columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dialect {
    Sqlite,
    Postgres,
    MySql,
}

impl Dialect {
    /// Placeholder for the `n`-th (1-based) bound parameter.
    pub fn placeholder(self, n: usize) -> String {
        match self {
            Dialect::Postgres => format!("${}", n),
            Dialect::Sqlite | Dialect::MySql => "?".to_owned(),
        }
    }

    /// Comma separated placeholders `first..first + count`.
    pub fn placeholders(self, first: usize, count: usize) -> String {
        (first..first + count)
            .map(|n| self.placeholder(n))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Quotes a table or column name.
    pub fn quote_identifier(self, ident: &str) -> String {
        match self {
            Dialect::MySql => format!("`{}`", ident.replace('`', "``")),
            Dialect::Sqlite | Dialect::Postgres => format!("\"{}\"", ident.replace('"', "\"\"")),
        }
    }

    /// Quotes a string literal for inline use.
    pub fn quote_literal(self, text: &str) -> String {
        let escaped = match self {
            Dialect::MySql => text.replace('\\', "\\\\").replace('\'', "''"),
            Dialect::Sqlite | Dialect::Postgres => text.replace('\'', "''"),
        };
        format!("'{}'", escaped)
    }

    pub fn bool_literal(self, value: bool) -> &'static str {
        match (self, value) {
            (Dialect::Sqlite, true) => "1",
            (Dialect::Sqlite, false) => "0",
            (_, true) => "TRUE",
            (_, false) => "FALSE",
        }
    }

    /// Renders a value inline. Arrays are rendered element-wise.
    pub fn literal(self, value: &Value) -> String {
        match value {
            Value::Null => "NULL".to_owned(),
            Value::Bool(b) => self.bool_literal(*b).to_owned(),
            Value::Int(v) => v.to_string(),
            Value::Float(v) => v.to_string(),
            Value::Text(s) => self.quote_literal(s),
            Value::Array(items) => items
                .iter()
                .map(|item| self.literal(item))
                .collect::<Vec<_>>()
                .join(", "),
        }
    }

    /// Whether the generated id can be read back with `RETURNING`.
    pub fn supports_returning(self) -> bool {
        matches!(self, Dialect::Postgres)
    }

    /// `sql` extended to return `column` of the inserted row, when the backend can.
    pub fn returning(self, sql: &str, column: &str) -> String {
        if self.supports_returning() {
            format!("{} RETURNING {}", sql, self.quote_identifier(column))
        } else {
            sql.to_owned()
        }
    }

    /// Insert statement for a row with no explicit columns.
    pub fn insert_default_values(self, table: &str) -> String {
        let table = self.quote_identifier(table);
        match self {
            Dialect::MySql => format!("INSERT INTO {} () VALUES ()", table),
            Dialect::Sqlite | Dialect::Postgres => format!("INSERT INTO {} DEFAULT VALUES", table),
        }
    }
}
