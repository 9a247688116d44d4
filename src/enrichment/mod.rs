//! Article enrichment: optional summary, then a sentiment score.
//!
//! Sentiment runs on the summary when one was produced, and on the article
//! body when summarization is disabled or returned the unavailable sentinel.

pub mod sentiment;
pub mod summarizer;

use crate::error::EnrichError;
use crate::models::{Article, EnrichedArticle, Summary};
use sentiment::SentimentClassifier;
use tracing::{debug, instrument};

/// Produce a short summary of an article body. Never fails: errors become
/// [`Summary::unavailable`].
pub trait Summarizer {
    async fn summarize(&self, text: &str) -> Summary;
}

#[derive(Debug)]
pub struct Enricher<S, C> {
    summarizer: Option<S>,
    classifier: C,
}

impl<S, C> Enricher<S, C>
where
    S: Summarizer,
    C: SentimentClassifier,
{
    pub fn new(summarizer: Option<S>, classifier: C) -> Self {
        Self { summarizer, classifier }
    }

    pub fn summarizes(&self) -> bool {
        self.summarizer.is_some()
    }

    #[instrument(level = "info", skip_all, fields(url = %article.source_url()))]
    pub async fn enrich(
        &self,
        article: Article,
        source: &str,
    ) -> Result<EnrichedArticle, EnrichError> {
        let summary = match &self.summarizer {
            Some(summarizer) => Some(summarizer.summarize(article.body()).await),
            None => None,
        };

        let (sentiment_input, on_summary) = match &summary {
            Some(s) if !s.is_unavailable() => (s.text.as_str(), true),
            _ => (article.body(), false),
        };
        debug!(on_summary, "Scoring sentiment");
        let sentiment = self.classifier.classify(sentiment_input).await?;
        debug!(
            positive = sentiment.positive(),
            negative = sentiment.negative(),
            neutral = sentiment.neutral(),
            "Sentiment scored"
        );

        Ok(EnrichedArticle {
            article,
            source: source.to_string(),
            summary,
            sentiment,
        })
    }
}
