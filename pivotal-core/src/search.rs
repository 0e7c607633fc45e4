use std::fmt::Write;

use smallvec::SmallVec;

use crate::association::LazyAssociation;
use crate::dialect::Dialect;
use crate::entity::Entity;
use crate::error::Result;
use crate::executor::Executor;
use crate::metadata::EntityType;
use crate::value::{Row, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Less,
    LessEq,
    Greater,
    GreaterEq,
    Equal,
    Like,
    In,
    Between,
}

impl Operator {
    pub fn as_sql(self) -> &'static str {
        match self {
            Operator::Less => "<",
            Operator::LessEq => "<=",
            Operator::Greater => ">",
            Operator::GreaterEq => ">=",
            Operator::Equal => "=",
            Operator::Like => "LIKE",
            Operator::In => "IN",
            Operator::Between => "BETWEEN",
        }
    }
}

/// Decorations around a clause.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Glue {
    pub not: bool,
    pub open: bool,
    pub close: bool,
    pub or: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Single(Value),
    Many(SmallVec<[Value; 4]>),
    Range(Value, Value),
}

#[derive(Debug, Clone, PartialEq)]
struct Clause {
    op: Operator,
    column: String,
    operand: Operand,
    glue: Glue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Limit {
    First(u64),
    Range { offset: u64, count: u64 },
}

macro_rules! limit_from {
    ($($t:ty),*) => {
        $(
            impl From<$t> for Limit {
                fn from(n: $t) -> Self {
                    Limit::First(u64::try_from(n).unwrap_or(0))
                }
            }

            impl From<($t, $t)> for Limit {
                fn from((offset, count): ($t, $t)) -> Self {
                    Limit::Range {
                        offset: u64::try_from(offset).unwrap_or(0),
                        count: u64::try_from(count).unwrap_or(0),
                    }
                }
            }
        )*
    };
}

limit_from!(u64, u32, usize, i32, i64);

/// What a search produced.
#[derive(Debug)]
pub enum SearchResult {
    /// Matching ids from a structured search.
    Ids(LazyAssociation),
    /// Rows from a raw query.
    Rows(Vec<Row>),
}

impl SearchResult {
    /// The ids found. Raw rows contribute their `id` column.
    pub fn into_ids(self) -> LazyAssociation {
        match self {
            SearchResult::Ids(ids) => ids,
            SearchResult::Rows(rows) => {
                let mut ids = LazyAssociation::new();
                ids.disable_virtual_mode();
                for id in rows.iter().filter_map(|r| r.id("id")) {
                    ids.append(id);
                }
                ids.enable_virtual_mode();
                ids
            }
        }
    }

    /// The rows returned. Structured searches yield one `id` row per match.
    pub fn into_rows(self) -> Vec<Row> {
        match self {
            SearchResult::Rows(rows) => rows,
            SearchResult::Ids(ids) => ids
                .iter()
                .map(|id| Row::new(vec!["id".to_owned()], vec![Value::Int(id)]))
                .collect(),
        }
    }
}

/// Fluent builder for `SELECT id FROM <table> WHERE ...` searches.
///
/// Glue calls (`not`, `left_paren`, `right_paren`, `or`) decorate the most
/// recently added clause; `not` and `left_paren` issued before any clause
/// decorate the start of the condition instead.
///
/// ```ignore
/// let found = Article::search(&mut ex)
///     .more_than("views", 10)
///     .or()
///     .like("title", "%rust%")
///     .limit_to(5)
///     .start()
///     .await?
///     .into_ids();
/// ```
#[derive(Debug)]
pub struct Search<'a, 'e> {
    ex: &'a mut Executor<'e>,
    table: String,
    target: Option<&'static EntityType>,
    clauses: Vec<Clause>,
    start_glue: Glue,
    order: Vec<String>,
    limit: Option<Limit>,
    distinct: bool,
    raw: Option<String>,
    bound: Vec<Value>,
}

impl<'a, 'e> Search<'a, 'e> {
    /// Searches a table by name. Results are untyped ids.
    pub fn new(ex: &'a mut Executor<'e>, table: impl Into<String>) -> Self {
        Self {
            ex,
            table: table.into(),
            target: None,
            clauses: Vec::new(),
            start_glue: Glue::default(),
            order: Vec::new(),
            limit: None,
            distinct: false,
            raw: None,
            bound: Vec::new(),
        }
    }

    /// Searches the table of `E`; the result collection resolves to `E`.
    pub fn for_entity<E: Entity>(ex: &'a mut Executor<'e>) -> Self {
        let ty = E::entity_type();
        let mut search = Self::new(ex, ty.table());
        search.target = Some(ty);
        search
    }

    fn push(mut self, op: Operator, column: impl Into<String>, operand: Operand) -> Self {
        self.clauses.push(Clause {
            op,
            column: column.into(),
            operand,
            glue: Glue::default(),
        });
        self
    }

    fn single(self, op: Operator, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.push(op, column, Operand::Single(value.into()))
    }

    pub fn less_than(self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.single(Operator::Less, column, value)
    }

    pub fn less_or_equal(self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.single(Operator::LessEq, column, value)
    }

    pub fn more_than(self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.single(Operator::Greater, column, value)
    }

    pub fn more_or_equal(self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.single(Operator::GreaterEq, column, value)
    }

    pub fn equal(self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.single(Operator::Equal, column, value)
    }

    pub fn like(self, column: impl Into<String>, pattern: impl Into<Value>) -> Self {
        self.single(Operator::Like, column, pattern)
    }

    /// `column IN (...)`. An empty list makes the whole search match nothing
    /// without running a query.
    pub fn is_in<I, V>(self, column: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let values = values.into_iter().map(Into::into).collect();
        self.push(Operator::In, column, Operand::Many(values))
    }

    pub fn between(
        self,
        column: impl Into<String>,
        low: impl Into<Value>,
        high: impl Into<Value>,
    ) -> Self {
        self.push(
            Operator::Between,
            column,
            Operand::Range(low.into(), high.into()),
        )
    }

    fn decorate(&mut self, starts: bool, apply: impl FnOnce(&mut Glue)) {
        match self.clauses.last_mut() {
            Some(clause) => apply(&mut clause.glue),
            None if starts => apply(&mut self.start_glue),
            None => {}
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(mut self) -> Self {
        self.decorate(true, |g| g.not = true);
        self
    }

    pub fn left_paren(mut self) -> Self {
        self.decorate(true, |g| g.open = true);
        self
    }

    pub fn right_paren(mut self) -> Self {
        self.decorate(false, |g| g.close = true);
        self
    }

    /// Joins the current clause to the next one with `OR` instead of `AND`.
    pub fn or(mut self) -> Self {
        self.decorate(false, |g| g.or = true);
        self
    }

    pub fn limit_to(mut self, limit: impl Into<Limit>) -> Self {
        self.limit = Some(limit.into());
        self
    }

    /// Appends `ORDER BY` terms such as `"views DESC"`.
    pub fn order_by<I, S>(mut self, rules: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.order.extend(rules.into_iter().map(Into::into));
        self
    }

    pub fn toggle_distinct(mut self) -> Self {
        self.distinct = !self.distinct;
        self
    }

    /// Replaces the compiled query with `sql`; [`start`](Search::start) then returns rows.
    pub fn raw_query(mut self, sql: impl Into<String>) -> Self {
        self.raw = Some(sql.into());
        self
    }

    /// Parameters for placeholders in a raw query or in clause values.
    pub fn bind_values<I, V>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.bound.extend(params.into_iter().map(Into::into));
        self
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// The compiled statement, or `None` when an empty `IN` makes it pointless.
    pub fn to_sql(&self) -> Option<String> {
        if let Some(raw) = &self.raw {
            return Some(raw.clone());
        }
        let has_empty_in = self
            .clauses
            .iter()
            .any(|c| matches!(&c.operand, Operand::Many(v) if v.is_empty()));
        if has_empty_in {
            return None;
        }

        let dialect = self.ex.dialect();
        let mut sql = String::with_capacity(64 + self.clauses.len() * 24);
        sql.push_str("SELECT ");
        if self.distinct {
            sql.push_str("DISTINCT ");
        }
        let _ = write!(sql, "id FROM {}", dialect.quote_identifier(&self.table));

        if !self.clauses.is_empty() {
            sql.push_str(" WHERE");
            render_open(&mut sql, self.start_glue);
            let last = self.clauses.len() - 1;
            for (i, clause) in self.clauses.iter().enumerate() {
                render_open(&mut sql, clause.glue);
                let _ = write!(sql, " {} {} ", clause.column, clause.op.as_sql());
                render_operand(&mut sql, dialect, &clause.operand);
                if clause.glue.close {
                    sql.push_str(" )");
                }
                if i < last {
                    sql.push_str(if clause.glue.or { " OR" } else { " AND" });
                }
            }
        }

        if !self.order.is_empty() {
            let _ = write!(sql, " ORDER BY {}", self.order.join(", "));
        }
        match self.limit {
            Some(Limit::First(n)) => {
                let _ = write!(sql, " LIMIT {}", n);
            }
            Some(Limit::Range { offset, count }) => {
                let _ = write!(sql, " LIMIT {} OFFSET {}", count, offset);
            }
            None => {}
        }
        Some(sql)
    }

    /// Runs the search.
    #[tracing::instrument(skip(self), fields(table = %self.table))]
    pub async fn start(self) -> Result<SearchResult> {
        let context = format!("searching {}", self.table);
        if let Some(raw) = &self.raw {
            let rows = self
                .ex
                .fetch_all(raw, &self.bound)
                .await
                .map_err(|e| self.ex.failed(context, e))?;
            return Ok(SearchResult::Rows(rows));
        }

        let mut found = self.target.map_or_else(LazyAssociation::new, LazyAssociation::of);
        let Some(sql) = self.to_sql() else {
            tracing::debug!(table = %self.table, "empty IN list, search skipped");
            return Ok(SearchResult::Ids(found));
        };

        let rows = self
            .ex
            .fetch_all(&sql, &self.bound)
            .await
            .map_err(|e| self.ex.failed(context, e))?;
        found.disable_virtual_mode();
        for id in rows.iter().filter_map(|r| r.id("id")) {
            found.append(id);
        }
        found.enable_virtual_mode();
        Ok(SearchResult::Ids(found))
    }
}

fn render_open(sql: &mut String, glue: Glue) {
    if glue.not {
        sql.push_str(" NOT");
    }
    if glue.open {
        sql.push_str(" (");
    }
}

fn is_placeholder(text: &str) -> bool {
    if text == "?" {
        return true;
    }
    let mut chars = text.chars();
    match chars.next() {
        Some('$') => !text[1..].is_empty() && text[1..].chars().all(|c| c.is_ascii_digit()),
        Some(':') => {
            chars.next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    }
}

fn render_value(sql: &mut String, dialect: Dialect, value: &Value) {
    match value {
        Value::Text(text) if is_placeholder(text) => sql.push_str(text),
        other => sql.push_str(&dialect.literal(other)),
    }
}

fn render_operand(sql: &mut String, dialect: Dialect, operand: &Operand) {
    match operand {
        Operand::Single(value) => render_value(sql, dialect, value),
        Operand::Range(low, high) => {
            render_value(sql, dialect, low);
            sql.push_str(" AND ");
            render_value(sql, dialect, high);
        }
        Operand::Many(values) => {
            sql.push('(');
            for (i, value) in values.iter().enumerate() {
                if i > 0 {
                    sql.push_str(", ");
                }
                render_value(sql, dialect, value);
            }
            sql.push(')');
        }
    }
}
