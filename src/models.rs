//! Data models for scraped articles and their enriched representations.
//!
//! This module defines the core data structures used throughout the application:
//! - [`Query`] and [`ArticleRef`]: what to search for and what was found
//! - [`Article`]: structured content extracted from one article page
//! - [`SentimentScore`] and [`Summary`]: enrichment results
//! - [`EnrichedArticle`]: an article together with its enrichment
//!
//! Everything here is created and consumed within a single run.

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Text substituted for a summary when the summarization service fails.
pub const SUMMARY_SENTINEL: &str = "Resumo não disponível devido a um erro.";

/// Maximum length of a successful summary, in characters.
pub const MAX_SUMMARY_CHARS: usize = 512;

/// A search term, usually the name of a public figure.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Query(String);

impl Query {
    pub fn new(term: impl Into<String>) -> Self {
        Self(term.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A candidate article URL discovered by a source listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArticleRef {
    pub source_url: String,
    pub query: Query,
}

/// Publication timestamp of an article.
///
/// Sites either expose a machine-readable timestamp, which is converted to the
/// reference offset, or only a human-readable local string that is kept as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PublishedAt {
    Zoned(DateTime<FixedOffset>),
    Raw(String),
}

impl PublishedAt {
    pub fn as_zoned(&self) -> Option<&DateTime<FixedOffset>> {
        match self {
            PublishedAt::Zoned(dt) => Some(dt),
            PublishedAt::Raw(_) => None,
        }
    }
}

impl fmt::Display for PublishedAt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PublishedAt::Zoned(dt) => write!(f, "{}", dt.format("%d/%m/%Y %H:%M")),
            PublishedAt::Raw(raw) => f.write_str(raw),
        }
    }
}

/// Structured content of a single article page.
///
/// Construct through [`Article::new`], which enforces a non-empty title and
/// body. Fields are read-only after construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Article {
    title: String,
    published_at: PublishedAt,
    body: String,
    source_url: String,
}

impl Article {
    /// Returns `None` when the title or body is blank.
    pub fn new(
        title: impl Into<String>,
        published_at: PublishedAt,
        body: impl Into<String>,
        source_url: impl Into<String>,
    ) -> Option<Self> {
        let title = title.into().trim().to_string();
        let body = body.into().trim().to_string();
        if title.is_empty() || body.is_empty() {
            return None;
        }
        Some(Self {
            title,
            published_at,
            body,
            source_url: source_url.into(),
        })
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn published_at(&self) -> &PublishedAt {
        &self.published_at
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn source_url(&self) -> &str {
        &self.source_url
    }
}

/// Three-way sentiment distribution: each value in `[0, 1]`, summing to 1.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SentimentScore {
    positive: f64,
    negative: f64,
    neutral: f64,
}

impl SentimentScore {
    /// Build a score from class probabilities, renormalizing so they sum to 1.
    ///
    /// Returns `None` for negative, non-finite or all-zero inputs.
    pub fn from_probabilities(positive: f64, negative: f64, neutral: f64) -> Option<Self> {
        let values = [positive, negative, neutral];
        if values.iter().any(|v| !v.is_finite() || *v < 0.0) {
            return None;
        }
        let total: f64 = values.iter().sum();
        if total <= 0.0 {
            return None;
        }
        Some(Self {
            positive: positive / total,
            negative: negative / total,
            neutral: neutral / total,
        })
    }

    /// Softmax over raw model logits ordered positive, negative, neutral.
    pub fn from_logits(logits: [f64; 3]) -> Option<Self> {
        if logits.iter().any(|v| !v.is_finite()) {
            return None;
        }
        let max = logits.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let exps = logits.map(|l| (l - max).exp());
        Self::from_probabilities(exps[0], exps[1], exps[2])
    }

    pub fn positive(&self) -> f64 {
        self.positive
    }

    pub fn negative(&self) -> f64 {
        self.negative
    }

    pub fn neutral(&self) -> f64 {
        self.neutral
    }

    /// Percentages with one decimal place, e.g. `"75.0%"`, ordered positive,
    /// negative, neutral.
    pub fn percentages(&self) -> [String; 3] {
        [self.positive, self.negative, self.neutral].map(to_percentage)
    }
}

fn to_percentage(value: f64) -> String {
    format!("{:.1}%", value * 100.0)
}

/// Result of a summarization call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub text: String,
    /// Label of the credential that served (or last attempted) the call.
    pub credential: Option<String>,
}

impl Summary {
    pub fn unavailable(credential: Option<String>) -> Self {
        Self {
            text: SUMMARY_SENTINEL.to_string(),
            credential,
        }
    }

    pub fn is_unavailable(&self) -> bool {
        self.text == SUMMARY_SENTINEL
    }
}

/// An article after enrichment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedArticle {
    pub article: Article,
    /// Name of the source adapter that produced the article.
    pub source: String,
    pub summary: Option<Summary>,
    pub sentiment: SentimentScore,
}
