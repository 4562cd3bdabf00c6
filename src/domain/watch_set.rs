//! Watched queries attached to a subscription.

use serde::Serialize;
use utoipa::ToSchema;

use crate::error::NotifyError;

/// Shape of a prepared statement, as far as watching is concerned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum QueryShape {
    /// A row-set producing query over the listed objects.
    RowSet {
        /// Objects named in the `FROM` clause, in order.
        objects: Vec<String>,
    },
    /// Anything else (DDL, DML, PL/SQL blocks).
    Other,
}

/// A parsed statement handed over by the statement layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PreparedQuery {
    text: String,
    shape: QueryShape,
}

impl PreparedQuery {
    /// Parses statement text into a prepared query.
    ///
    /// Only `SELECT ... FROM a[, b ...]` statements (joins included) come out as
    /// [`QueryShape::RowSet`]; every other statement is [`QueryShape::Other`].
    #[must_use]
    pub fn parse(text: &str) -> Self {
        let text = text.trim().trim_end_matches(';').trim().to_string();
        let shape = parse_shape(&text);
        Self { text, shape }
    }

    /// Returns the normalized statement text.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Returns the classified shape.
    #[must_use]
    pub const fn shape(&self) -> &QueryShape {
        &self.shape
    }

    /// Returns the watched objects of a row-set query.
    ///
    /// # Errors
    ///
    /// Returns [`NotifyError::UnsupportedQuery`] if the statement does not
    /// produce a row set.
    pub fn watched_objects(&self) -> Result<&[String], NotifyError> {
        match &self.shape {
            QueryShape::RowSet { objects } => Ok(objects),
            QueryShape::Other => Err(NotifyError::UnsupportedQuery(self.text.clone())),
        }
    }
}

const CLAUSE_KEYWORDS: [&str; 8] = [
    "where", "group", "order", "having", "connect", "start", "for", "union",
];

fn parse_shape(text: &str) -> QueryShape {
    let lower = text.to_ascii_lowercase();
    let mut words = lower.split_whitespace();
    if words.next() != Some("select") {
        return QueryShape::Other;
    }
    if !words.any(|w| w == "from") {
        return QueryShape::Other;
    }

    // FROM clause runs until the next clause keyword. Items are separated
    // by commas or `join`, and each starts with `object [alias]`.
    let clause = words
        .take_while(|w| !CLAUSE_KEYWORDS.contains(w))
        .collect::<Vec<_>>()
        .join(" ");
    let objects: Vec<String> = clause
        .split(',')
        .flat_map(|item| item.split(" join "))
        .filter_map(|item| item.split_whitespace().next())
        .map(str::to_string)
        .collect();

    if objects.is_empty() {
        QueryShape::Other
    } else {
        QueryShape::RowSet { objects }
    }
}

/// Ordered collection of queries watched by one subscription.
#[derive(Debug, Clone, Default)]
pub struct WatchSet {
    queries: Vec<PreparedQuery>,
}

impl WatchSet {
    /// Creates an empty watch set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a query, keeping attachment order.
    ///
    /// # Errors
    ///
    /// Returns [`NotifyError::UnsupportedQuery`] if the query does not
    /// produce a row set.
    pub fn push(&mut self, query: PreparedQuery) -> Result<(), NotifyError> {
        query.watched_objects()?;
        self.queries.push(query);
        Ok(())
    }

    /// Returns `true` if any watched query reads from `object`.
    #[must_use]
    pub fn covers(&self, object: &str) -> bool {
        self.queries.iter().any(|q| {
            q.watched_objects()
                .is_ok_and(|objects| objects.iter().any(|o| o.eq_ignore_ascii_case(object)))
        })
    }

    /// Iterates over the watched queries in attachment order.
    pub fn iter(&self) -> impl Iterator<Item = &PreparedQuery> {
        self.queries.iter()
    }

    /// Returns the number of watched queries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.queries.len()
    }

    /// Returns `true` if nothing is watched yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }
}

/// Text of a watched query, as reported in summaries.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct WatchedQuery {
    /// Normalized statement text.
    pub text: String,
    /// Objects the query reads from.
    pub objects: Vec<String>,
}

impl From<&PreparedQuery> for WatchedQuery {
    fn from(query: &PreparedQuery) -> Self {
        Self {
            text: query.text.clone(),
            objects: query
                .watched_objects()
                .map(<[String]>::to_vec)
                .unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_select_is_row_set() {
        let query = PreparedQuery::parse("select * from table1");
        assert_eq!(
            query.shape(),
            &QueryShape::RowSet {
                objects: vec!["table1".to_string()]
            }
        );
    }

    #[test]
    fn select_lists_every_object_before_where() {
        let query = PreparedQuery::parse("SELECT a.x FROM t1 a, t2 b WHERE a.id = b.id;");
        let objects = query.watched_objects().unwrap_or_default();
        assert_eq!(objects, ["t1", "t2"]);
        assert_eq!(query.text(), "SELECT a.x FROM t1 a, t2 b WHERE a.id = b.id");
    }

    #[test]
    fn joined_tables_are_watched() {
        let query = PreparedQuery::parse("select * from t1 a left join t2 b on a.id = b.id");
        assert_eq!(query.watched_objects().unwrap_or_default(), ["t1", "t2"]);

        let query = PreparedQuery::parse("SELECT * FROM t1 JOIN t2 USING (id), t3 WHERE 1 = 1");
        assert_eq!(query.watched_objects().unwrap_or_default(), ["t1", "t2", "t3"]);
    }

    #[test]
    fn dml_is_not_watchable() {
        let query = PreparedQuery::parse("insert into table1 values(1)");
        assert!(matches!(
            query.watched_objects(),
            Err(NotifyError::UnsupportedQuery(_))
        ));
    }

    #[test]
    fn select_without_from_is_not_watchable() {
        let query = PreparedQuery::parse("select sysdate");
        assert_eq!(query.shape(), &QueryShape::Other);
    }

    #[test]
    fn watch_set_keeps_order_and_covers_objects() {
        let mut set = WatchSet::new();
        assert!(set.push(PreparedQuery::parse("select * from table1")).is_ok());
        assert!(set.push(PreparedQuery::parse("select * from table2")).is_ok());
        assert!(set.push(PreparedQuery::parse("drop table table3")).is_err());

        assert_eq!(set.len(), 2);
        assert!(set.covers("TABLE2"));
        assert!(!set.covers("table3"));
        let texts: Vec<&str> = set.iter().map(PreparedQuery::text).collect();
        assert_eq!(texts, ["select * from table1", "select * from table2"]);
    }
}
