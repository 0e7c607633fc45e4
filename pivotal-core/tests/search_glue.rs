use pivotal_core::async_trait::async_trait;
use pivotal_core::{Connection, Dialect, Executor, Id, Row, Search, Value};
use proptest::prelude::*;
use proptest::strategy::ValueTree;
use proptest::test_runner::{Config, TestRunner};

/// Compiles SQL only; any attempt to run a statement fails the test.
struct CompileOnly(Dialect);

#[async_trait]
impl Connection for CompileOnly {
    fn dialect(&self) -> Dialect {
        self.0
    }

    async fn execute(&mut self, sql: &str, _params: &[Value]) -> Result<u64, sqlx::Error> {
        panic!("unexpected statement: {}", sql)
    }

    async fn fetch_all(&mut self, sql: &str, _params: &[Value]) -> Result<Vec<Row>, sqlx::Error> {
        panic!("unexpected query: {}", sql)
    }

    async fn insert(&mut self, sql: &str, _params: &[Value]) -> Result<Option<Id>, sqlx::Error> {
        panic!("unexpected insert: {}", sql)
    }

    async fn batch(&mut self, sql: &str) -> Result<(), sqlx::Error> {
        panic!("unexpected batch: {}", sql)
    }
}

#[derive(Debug, Clone)]
struct ClauseShape {
    op: u8,
    column: String,
    value: i64,
    not: bool,
    or: bool,
}

fn clause_strategy() -> impl Strategy<Value = ClauseShape> {
    (0u8..6, "[a-z_]{1,12}", any::<i64>(), any::<bool>(), any::<bool>()).prop_map(
        |(op, column, value, not, or)| ClauseShape {
            op,
            column,
            value,
            not,
            or,
        },
    )
}

fn apply<'a, 'e>(search: Search<'a, 'e>, clause: &ClauseShape) -> Search<'a, 'e> {
    let column = clause.column.clone();
    let search = match clause.op {
        0 => search.less_than(column, clause.value),
        1 => search.less_or_equal(column, clause.value),
        2 => search.more_than(column, clause.value),
        3 => search.more_or_equal(column, clause.value),
        4 => search.equal(column, clause.value),
        _ => search.is_in(column, [clause.value, clause.value.wrapping_add(1)]),
    };
    let search = if clause.not { search.not() } else { search };
    if clause.or { search.or() } else { search }
}

fn runner(cases: u32) -> TestRunner {
    TestRunner::new(Config {
        cases,
        failure_persistence: None,
        ..Config::default()
    })
}

#[test]
fn connectives_join_clauses_and_never_trail() {
    let mut conn = CompileOnly(Dialect::Sqlite);
    let mut ex = Executor::new(&mut conn);
    let mut runner = runner(128);
    let clauses = proptest::collection::vec(clause_strategy(), 0..8);

    for _ in 0..128 {
        let clauses = clauses.new_tree(&mut runner).unwrap().current();
        let search = clauses
            .iter()
            .fold(Search::new(&mut ex, "items"), |s, c| apply(s, c));
        let sql = search.to_sql().unwrap();

        let connectives = sql.matches(" AND ").count() + sql.matches(" OR ").count();
        assert_eq!(connectives, clauses.len().saturating_sub(1), "{}", sql);
        for tail in [" AND", " OR", " NOT", " (", " WHERE"] {
            assert!(!sql.ends_with(tail), "{}", sql);
        }
        assert_eq!(sql.contains(" WHERE "), !clauses.is_empty(), "{}", sql);
        assert_eq!(sql.matches(" NOT ").count(), clauses.iter().filter(|c| c.not).count());
    }
}

#[test]
fn empty_in_anywhere_disables_the_query() {
    let mut conn = CompileOnly(Dialect::Postgres);
    let mut ex = Executor::new(&mut conn);
    let mut runner = runner(64);
    let clauses = proptest::collection::vec(clause_strategy(), 0..6);

    for _ in 0..64 {
        let clauses = clauses.new_tree(&mut runner).unwrap().current();
        let search = clauses
            .iter()
            .fold(Search::new(&mut ex, "items"), |s, c| apply(s, c))
            .is_in("id", Vec::<Value>::new());
        assert!(search.to_sql().is_none());
    }
}

#[test]
fn text_values_are_quoted_literals() {
    let mut conn = CompileOnly(Dialect::Postgres);
    let mut ex = Executor::new(&mut conn);
    let mut runner = runner(128);
    let text = "[A-Za-z0-9 '\\\\%_]{1,24}";

    for _ in 0..128 {
        let text = text.new_tree(&mut runner).unwrap().current();
        let sql = Search::new(&mut ex, "items")
            .like("name", text.as_str())
            .to_sql()
            .unwrap();
        let expected = format!("name LIKE '{}'", text.replace('\'', "''"));
        assert!(sql.ends_with(&expected), "{}", sql);
    }
}

#[tokio::test]
async fn empty_in_start_runs_nothing() {
    let mut conn = CompileOnly(Dialect::MySql);
    let mut ex = Executor::new(&mut conn);
    let found = Search::new(&mut ex, "items")
        .equal("a", 1)
        .is_in("b", Vec::<i64>::new())
        .start()
        .await
        .unwrap()
        .into_ids();
    assert!(found.is_empty());
}
