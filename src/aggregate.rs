//! Per-query result tables.
//!
//! Each query owns one [`QueryTable`] of parallel columns. Rows go in only
//! through [`Aggregator::push`], which appends to every column at once, so row
//! `i` of every column describes the same article.

use crate::models::{EnrichedArticle, Query};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Columns {
    pub titles: Vec<String>,
    pub dates: Vec<String>,
    pub urls: Vec<String>,
    pub positive: Vec<String>,
    pub negative: Vec<String>,
    pub neutral: Vec<String>,
    pub summaries: Vec<Option<String>>,
    pub credentials: Vec<Option<String>>,
}

impl Columns {
    fn push(&mut self, item: &EnrichedArticle) {
        let [positive, negative, neutral] = item.sentiment.percentages();
        self.titles.push(item.article.title().to_string());
        self.dates.push(item.article.published_at().to_string());
        self.urls.push(item.article.source_url().to_string());
        self.positive.push(positive);
        self.negative.push(negative);
        self.neutral.push(neutral);
        self.summaries.push(item.summary.as_ref().map(|s| s.text.clone()));
        self.credentials.push(item.summary.as_ref().and_then(|s| s.credential.clone()));
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryTable {
    pub query: Query,
    columns: Columns,
}

impl QueryTable {
    fn new(query: Query) -> Self {
        Self {
            query,
            columns: Columns::default(),
        }
    }

    pub fn columns(&self) -> &Columns {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.titles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether any row carries a summary (successful or not).
    pub fn has_summaries(&self) -> bool {
        self.columns.summaries.iter().any(Option::is_some)
    }
}

/// All query tables of a run, in query order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultTable {
    pub tables: Vec<QueryTable>,
}

impl ResultTable {
    pub fn total_rows(&self) -> usize {
        self.tables.iter().map(QueryTable::len).sum()
    }

    pub fn get(&self, query: &Query) -> Option<&QueryTable> {
        self.tables.iter().find(|t| &t.query == query)
    }
}

/// Builds a [`ResultTable`]; consumed by [`Aggregator::finish`].
#[derive(Debug, Default)]
pub struct Aggregator {
    table: ResultTable,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make sure `query` has a table, even if it never gets a row.
    pub fn begin_query(&mut self, query: &Query) {
        if self.table.get(query).is_none() {
            self.table.tables.push(QueryTable::new(query.clone()));
        }
    }

    pub fn push(&mut self, query: &Query, item: &EnrichedArticle) {
        self.begin_query(query);
        if let Some(table) = self.table.tables.iter_mut().find(|t| &t.query == query) {
            table.columns.push(item);
            debug!(%query, rows = table.len(), "Row appended");
        }
    }

    pub fn finish(self) -> ResultTable {
        self.table
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Article, PublishedAt, SentimentScore, Summary};

    fn enriched(title: &str, summary: Option<Summary>) -> EnrichedArticle {
        EnrichedArticle {
            article: Article::new(
                title,
                PublishedAt::Raw("01/07/2024 10:00".into()),
                "Corpo.",
                format!("https://g1.globo.com/{title}"),
            )
            .unwrap(),
            source: "g1".into(),
            summary,
            sentiment: SentimentScore::from_probabilities(0.75, 0.1, 0.15).unwrap(),
        }
    }

    #[test]
    fn test_columns_stay_aligned() {
        let q = Query::new("ELON MUSK");
        let mut agg = Aggregator::new();
        agg.begin_query(&q);
        agg.push(&q, &enriched("a", None));
        agg.push(
            &q,
            &enriched(
                "b",
                Some(Summary {
                    text: "Resumo b".into(),
                    credential: Some("A".into()),
                }),
            ),
        );
        agg.push(&q, &enriched("c", Some(Summary::unavailable(Some("B".into())))));

        let table = agg.finish();
        let t = table.get(&q).unwrap();
        let c = t.columns();
        assert_eq!(t.len(), 3);
        for len in [
            c.dates.len(),
            c.urls.len(),
            c.positive.len(),
            c.negative.len(),
            c.neutral.len(),
            c.summaries.len(),
            c.credentials.len(),
        ] {
            assert_eq!(len, 3);
        }
        assert_eq!(c.titles[1], "b");
        assert_eq!(c.urls[1], "https://g1.globo.com/b");
        assert_eq!(c.summaries[1].as_deref(), Some("Resumo b"));
        assert_eq!(c.credentials[2].as_deref(), Some("B"));
        assert_eq!(c.summaries[0], None);
        assert_eq!(c.positive[2], "75.0%");
        assert!(t.has_summaries());
    }

    #[test]
    fn test_every_query_gets_a_table_in_order() {
        let mut agg = Aggregator::new();
        let q1 = Query::new("LULA");
        let q2 = Query::new("ELON MUSK");
        agg.begin_query(&q1);
        agg.begin_query(&q2);
        agg.begin_query(&q1);
        agg.push(&q2, &enriched("x", None));

        let table = agg.finish();
        assert_eq!(table.tables.len(), 2);
        assert_eq!(table.tables[0].query, q1);
        assert!(table.tables[0].is_empty());
        assert!(!table.tables[0].has_summaries());
        assert_eq!(table.total_rows(), 1);
    }
}
