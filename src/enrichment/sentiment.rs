//! Three-class sentiment scoring over HTTP.
//!
//! [`HttpSentimentClassifier`] talks to a text-classification server with the
//! text-embeddings-inference `/predict` contract: the request is
//! `{"inputs": "...", "truncate": true}` and the response a list of
//! `{label, score}` pairs, one per class. The server is expected to serve a
//! Portuguese financial-news model such as `lucas-leme/FinBERT-PT-BR`.

use crate::config::{LabelNames, SentimentConfig};
use crate::error::EnrichError;
use crate::models::SentimentScore;
use crate::utils::{clip_chars, truncate_for_log};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, instrument};

/// Score one text.
pub trait SentimentClassifier {
    async fn classify(&self, text: &str) -> Result<SentimentScore, EnrichError>;
}

#[derive(Debug, Serialize)]
struct PredictRequest<'a> {
    inputs: &'a str,
    truncate: bool,
}

#[derive(Debug, Deserialize)]
struct LabelScore {
    label: String,
    score: f64,
}

/// Single inputs come back as a flat list; some servers wrap it in a batch.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PredictResponse {
    Single(Vec<LabelScore>),
    Batch(Vec<Vec<LabelScore>>),
}

impl PredictResponse {
    fn into_scores(self) -> Vec<LabelScore> {
        match self {
            PredictResponse::Single(scores) => scores,
            PredictResponse::Batch(batch) => batch.into_iter().next().unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpSentimentClassifier {
    client: reqwest::Client,
    url: String,
    labels: LabelNames,
    max_chars: usize,
}

impl HttpSentimentClassifier {
    pub fn new(config: &SentimentConfig) -> Result<Self, EnrichError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self {
            client,
            url: format!("{}/predict", config.endpoint.trim_end_matches('/')),
            labels: config.labels.clone(),
            max_chars: config.max_chars,
        })
    }
}

impl SentimentClassifier for HttpSentimentClassifier {
    #[instrument(level = "debug", skip_all, fields(chars = text.chars().count()))]
    async fn classify(&self, text: &str) -> Result<SentimentScore, EnrichError> {
        let inputs = clip_chars(text, self.max_chars);
        let response = self
            .client
            .post(&self.url)
            .json(&PredictRequest {
                inputs: &inputs,
                truncate: true,
            })
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EnrichError::Api {
                status,
                body: truncate_for_log(&body, 300),
            });
        }
        let parsed: PredictResponse = response
            .json()
            .await
            .map_err(|e| EnrichError::Malformed(e.to_string()))?;
        let score = to_score(&parsed.into_scores(), &self.labels)?;
        debug!(?score, "Classified");
        Ok(score)
    }
}

/// Map `{label, score}` pairs onto positive/negative/neutral.
///
/// Configured names are matched case-insensitively; generic `LABEL_0..2`
/// names fall back to the fixed order positive, negative, neutral.
fn to_score(scores: &[LabelScore], names: &LabelNames) -> Result<SentimentScore, EnrichError> {
    let find = |name: &str, fallback: &str| {
        scores
            .iter()
            .find(|s| s.label.eq_ignore_ascii_case(name))
            .or_else(|| scores.iter().find(|s| s.label.eq_ignore_ascii_case(fallback)))
            .map(|s| s.score)
            .ok_or_else(|| EnrichError::Malformed(format!("label {name} missing from response")))
    };
    let values = [
        find(&names.positive, "LABEL_0")?,
        find(&names.negative, "LABEL_1")?,
        find(&names.neutral, "LABEL_2")?,
    ];
    // Servers started with raw scores return logits instead of probabilities.
    let score = if values.iter().all(|v| (0.0..=1.0).contains(v)) {
        SentimentScore::from_probabilities(values[0], values[1], values[2])
    } else {
        SentimentScore::from_logits(values)
    };
    score.ok_or_else(|| EnrichError::Malformed("scores are not a probability distribution".into()))
}
