//! Run configuration loaded from a YAML file.
//!
//! Queries, date ranges, delays, service endpoints and the output location
//! all live here instead of in the code. API keys are never stored in the
//! file: each credential names the environment variable that holds its key.
//!
//! ```yaml
//! queries: ["ELON MUSK", "MARK ZUCKERBERG"]
//! sources: [g1, cnn]
//! date_ranges:
//!   g1: { start: 2024-08-01, end: 2024-09-23 }
//! enrichment:
//!   delay_ms: 4000
//!   summarizer:
//!     credentials:
//!       - { label: primary, api_key_env: GEMINI_KEY_A }
//!       - { label: secondary, api_key_env: GEMINI_KEY_B }
//! output:
//!   dir: ./out
//! ```

use crate::enrichment::summarizer::Credential;
use crate::error::ConfigError;
use crate::models::Query;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, TimeDelta};
use serde::Deserialize;
use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use tracing::{info, instrument};

/// Sites with a source adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Cnn,
    G1,
    Investing,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SourceKind::Cnn => "cnn",
            SourceKind::G1 => "g1",
            SourceKind::Investing => "investing",
        })
    }
}

/// Inclusive range of whole days, interpreted in the reference offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    /// First and last instant of the range: 00:00:00 on `start` through
    /// 23:59:59 on `end`.
    pub fn bounds(&self, offset: FixedOffset) -> (DateTime<FixedOffset>, DateTime<FixedOffset>) {
        let to_utc = TimeDelta::seconds(i64::from(offset.local_minus_utc()));
        let first = self.start.and_time(NaiveTime::MIN);
        let last = self.end.and_time(NaiveTime::MIN) + TimeDelta::seconds(86_399);
        (
            DateTime::from_naive_utc_and_offset(first - to_utc, offset),
            DateTime::from_naive_utc_and_offset(last - to_utc, offset),
        )
    }

    /// Whether `instant` falls inside the range as seen from `offset`.
    pub fn contains(&self, instant: &DateTime<FixedOffset>, offset: FixedOffset) -> bool {
        let (first, last) = self.bounds(offset);
        *instant >= first && *instant <= last
    }
}

/// Optional per-source date filters.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DateRanges {
    pub cnn: Option<DateRange>,
    pub g1: Option<DateRange>,
    pub investing: Option<DateRange>,
}

impl DateRanges {
    pub fn for_source(&self, kind: SourceKind) -> Option<DateRange> {
        match kind {
            SourceKind::Cnn => self.cnn,
            SourceKind::G1 => self.g1,
            SourceKind::Investing => self.investing,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrowserKind {
    Chrome,
    Edge,
    Firefox,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    /// Base URL of a running WebDriver server (chromedriver, msedgedriver, geckodriver).
    pub webdriver_url: String,
    pub browser: BrowserKind,
    /// How long to wait for a content marker to appear.
    pub wait_timeout_secs: u64,
    pub poll_interval_ms: u64,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            webdriver_url: "http://localhost:9515".to_string(),
            browser: BrowserKind::Chrome,
            wait_timeout_secs: 10,
            poll_interval_ms: 250,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub user_agent: String,
    pub request_timeout_secs: u64,
    /// Minimum spacing between consecutive page fetches.
    pub politeness_delay_ms: u64,
    /// Articles fetched and enriched at once within a query.
    pub article_concurrency: usize,
    /// Required only by browser-driven sources.
    pub browser: Option<BrowserConfig>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("{}/{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")),
            request_timeout_secs: 30,
            politeness_delay_ms: 0,
            article_concurrency: 1,
            browser: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CredentialConfig {
    pub label: String,
    pub api_key_env: String,
    /// Overrides the summarizer-wide instruction for calls made with this key.
    #[serde(default)]
    pub instruction: Option<String>,
}

pub const DEFAULT_INSTRUCTION: &str = "Retorne para mim apenas uma String que seja um resumo do texto abaixo, ela deve ser curta, com no máximo 512 caracteres mas que contenha todas as informações.";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SummarizerConfig {
    pub endpoint: String,
    pub model: String,
    pub instruction: String,
    pub credentials: Vec<CredentialConfig>,
    /// Try the next credentials in rotation before giving up on a call.
    pub fallback_on_error: bool,
    pub max_retries: usize,
    pub retry_base_delay_ms: u64,
    pub request_timeout_secs: u64,
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            model: "gemini-1.5-flash".to_string(),
            instruction: DEFAULT_INSTRUCTION.to_string(),
            credentials: Vec::new(),
            fallback_on_error: false,
            max_retries: 0,
            retry_base_delay_ms: 1000,
            request_timeout_secs: 60,
        }
    }
}

impl SummarizerConfig {
    /// Resolve every credential's key through `lookup` (normally the process
    /// environment).
    pub fn resolve_credentials<F>(&self, lookup: F) -> Result<Vec<Credential>, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        self.credentials
            .iter()
            .map(|c| {
                let api_key = lookup(&c.api_key_env)
                    .filter(|k| !k.trim().is_empty())
                    .ok_or_else(|| ConfigError::MissingCredential {
                        label: c.label.clone(),
                        var: c.api_key_env.clone(),
                    })?;
                Ok(Credential {
                    label: c.label.clone(),
                    api_key,
                    instruction: c.instruction.clone().unwrap_or_else(|| self.instruction.clone()),
                })
            })
            .collect()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LabelNames {
    pub positive: String,
    pub negative: String,
    pub neutral: String,
}

impl Default for LabelNames {
    fn default() -> Self {
        Self {
            positive: "POSITIVE".to_string(),
            negative: "NEGATIVE".to_string(),
            neutral: "NEUTRAL".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SentimentConfig {
    /// Base URL of the classification server; requests go to `{endpoint}/predict`.
    pub endpoint: String,
    pub labels: LabelNames,
    /// Client-side cap on input length; the server truncates to the model's
    /// token budget on top of this.
    pub max_chars: usize,
    pub request_timeout_secs: u64,
}

impl Default for SentimentConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8080".to_string(),
            labels: LabelNames::default(),
            max_chars: 4000,
            request_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EnrichmentConfig {
    /// Minimum spacing between consecutive outbound summarization calls.
    pub delay_ms: u64,
    /// Summarization is enabled when this section is present.
    pub summarizer: Option<SummarizerConfig>,
    pub sentiment: SentimentConfig,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            delay_ms: 4000,
            summarizer: None,
            sentiment: SentimentConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub dir: String,
    pub file_name: String,
    /// Also write the result table as JSON next to the workbook.
    pub json: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: ".".to_string(),
            file_name: "Sentimentos_das_Noticias.xml".to_string(),
            json: false,
        }
    }
}

fn default_sources() -> Vec<SourceKind> {
    vec![SourceKind::G1]
}

fn default_utc_offset_hours() -> i32 {
    // America/Sao_Paulo has had no daylight saving time since 2019.
    -3
}

/// Everything a run needs besides secrets.
#[derive(Debug, Clone, Deserialize)]
pub struct RunConfig {
    pub queries: Vec<String>,
    #[serde(default = "default_sources")]
    pub sources: Vec<SourceKind>,
    #[serde(default)]
    pub date_ranges: DateRanges,
    #[serde(default = "default_utc_offset_hours")]
    pub reference_utc_offset_hours: i32,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub enrichment: EnrichmentConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

impl RunConfig {
    /// Read and validate a YAML configuration file.
    #[instrument(level = "info", skip_all, fields(path = %path.as_ref().display()))]
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config = Self::from_yaml_str(&text)?;
        info!(
            queries = config.queries.len(),
            sources = ?config.sources,
            "Loaded configuration"
        );
        Ok(config)
    }

    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        let config: RunConfig = serde_yaml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply command-line overrides; empty overrides leave the file's values.
    pub fn with_overrides(
        mut self,
        queries: Vec<String>,
        sources: Vec<SourceKind>,
        output_dir: Option<String>,
        no_summary: bool,
    ) -> Result<Self, ConfigError> {
        if !queries.is_empty() {
            self.queries = queries;
        }
        if !sources.is_empty() {
            self.sources = sources;
        }
        if let Some(dir) = output_dir {
            self.output.dir = dir;
        }
        if no_summary {
            self.enrichment.summarizer = None;
        }
        self.validate()?;
        Ok(self)
    }

    /// Configured queries, trimmed, blanks dropped, in order.
    pub fn query_list(&self) -> Vec<Query> {
        self.queries
            .iter()
            .map(|q| q.trim())
            .filter(|q| !q.is_empty())
            .map(Query::new)
            .collect()
    }

    pub fn reference_offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.reference_utc_offset_hours * 3600)
            .unwrap_or_else(|| FixedOffset::west_opt(3 * 3600).unwrap())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.queries.iter().all(|q| q.trim().is_empty()) {
            return Err(ConfigError::Invalid("at least one query is required".into()));
        }
        if self.sources.is_empty() {
            return Err(ConfigError::Invalid("at least one source is required".into()));
        }
        let unique: HashSet<_> = self.sources.iter().collect();
        if unique.len() != self.sources.len() {
            return Err(ConfigError::Invalid("sources must not repeat".into()));
        }
        if !(-12..=14).contains(&self.reference_utc_offset_hours) {
            return Err(ConfigError::Invalid(format!(
                "reference_utc_offset_hours {} is out of range",
                self.reference_utc_offset_hours
            )));
        }
        if self.fetch.article_concurrency == 0 {
            return Err(ConfigError::Invalid("fetch.article_concurrency must be at least 1".into()));
        }
        for kind in &self.sources {
            if let Some(range) = self.date_ranges.for_source(*kind) {
                if range.start > range.end {
                    return Err(ConfigError::Invalid(format!(
                        "date range for {kind} starts after it ends"
                    )));
                }
            }
        }
        if let Some(summarizer) = &self.enrichment.summarizer {
            if summarizer.credentials.is_empty() {
                return Err(ConfigError::Invalid(
                    "enrichment.summarizer needs at least one credential".into(),
                ));
            }
        }
        if self.output.file_name.trim().is_empty() {
            return Err(ConfigError::Invalid("output.file_name must not be empty".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::collections::HashMap;

    const FULL: &str = r#"
queries: ["ELON MUSK", "MARK ZUCKERBERG"]
sources: [g1, investing]
date_ranges:
  g1: { start: 2024-08-01, end: 2024-09-23 }
fetch:
  politeness_delay_ms: 500
  browser:
    webdriver_url: http://localhost:4444
    browser: edge
enrichment:
  delay_ms: 4000
  summarizer:
    fallback_on_error: true
    credentials:
      - { label: primary, api_key_env: KEY_A }
      - { label: secondary, api_key_env: KEY_B, instruction: "Resuma." }
output:
  dir: ./out
  json: true
"#;

    #[test]
    fn test_query_list_drops_blanks() {
        let config = RunConfig::from_yaml_str("queries: [' ELON MUSK ', '', LULA]").unwrap();
        assert_eq!(config.query_list(), vec![Query::new("ELON MUSK"), Query::new("LULA")]);
    }

    #[test]
    fn test_parses_full_config() {
        let config = RunConfig::from_yaml_str(FULL).unwrap();
        assert_eq!(config.queries, vec!["ELON MUSK", "MARK ZUCKERBERG"]);
        assert_eq!(config.sources, vec![SourceKind::G1, SourceKind::Investing]);
        assert!(config.date_ranges.g1.is_some());
        assert!(config.date_ranges.cnn.is_none());
        let browser = config.fetch.browser.as_ref().unwrap();
        assert_eq!(browser.browser, BrowserKind::Edge);
        assert_eq!(browser.wait_timeout_secs, 10);
        let summarizer = config.enrichment.summarizer.as_ref().unwrap();
        assert!(summarizer.fallback_on_error);
        assert_eq!(summarizer.model, "gemini-1.5-flash");
        assert_eq!(config.output.file_name, "Sentimentos_das_Noticias.xml");
        assert!(config.output.json);
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = RunConfig::from_yaml_str("queries: [\"LUIZA TRAJANO\"]").unwrap();
        assert_eq!(config.sources, vec![SourceKind::G1]);
        assert_eq!(config.enrichment.delay_ms, 4000);
        assert!(config.enrichment.summarizer.is_none());
        assert_eq!(config.fetch.article_concurrency, 1);
        assert_eq!(config.reference_offset(), FixedOffset::west_opt(3 * 3600).unwrap());
    }

    #[test]
    fn test_rejects_invalid_configs() {
        assert!(RunConfig::from_yaml_str("queries: []").is_err());
        assert!(RunConfig::from_yaml_str("queries: [a]\nsources: [g1, g1]").is_err());
        assert!(
            RunConfig::from_yaml_str(
                "queries: [a]\ndate_ranges:\n  g1: { start: 2024-09-01, end: 2024-08-01 }"
            )
            .is_err()
        );
        assert!(
            RunConfig::from_yaml_str("queries: [a]\nenrichment:\n  summarizer:\n    credentials: []")
                .is_err()
        );
    }

    #[test]
    fn test_resolve_credentials() {
        let config = RunConfig::from_yaml_str(FULL).unwrap();
        let summarizer = config.enrichment.summarizer.unwrap();
        let env: HashMap<&str, &str> = [("KEY_A", "aaa"), ("KEY_B", "bbb")].into();
        let creds = summarizer
            .resolve_credentials(|v| env.get(v).map(|s| s.to_string()))
            .unwrap();
        assert_eq!(creds.len(), 2);
        assert_eq!(creds[0].label, "primary");
        assert_eq!(creds[0].instruction, DEFAULT_INSTRUCTION);
        assert_eq!(creds[1].api_key, "bbb");
        assert_eq!(creds[1].instruction, "Resuma.");

        let err = summarizer.resolve_credentials(|_| None).unwrap_err();
        assert!(matches!(err, ConfigError::MissingCredential { .. }));
    }

    #[test]
    fn test_overrides() {
        let config = RunConfig::from_yaml_str(FULL)
            .unwrap()
            .with_overrides(
                vec!["BETO SICUPIRA".into()],
                vec![SourceKind::Cnn],
                Some("/tmp/x".into()),
                true,
            )
            .unwrap();
        assert_eq!(config.queries, vec!["BETO SICUPIRA"]);
        assert_eq!(config.sources, vec![SourceKind::Cnn]);
        assert_eq!(config.output.dir, "/tmp/x");
        assert!(config.enrichment.summarizer.is_none());
    }

    #[test]
    fn test_date_range_is_inclusive_of_whole_days() {
        let offset = FixedOffset::west_opt(3 * 3600).unwrap();
        let range = DateRange {
            start: NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
            end: NaiveDate::from_ymd_opt(2024, 8, 1).unwrap(),
        };
        let inside_end = offset.with_ymd_and_hms(2024, 8, 1, 23, 0, 0).unwrap();
        let at_start = offset.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let after = offset.with_ymd_and_hms(2024, 8, 2, 0, 0, 0).unwrap();
        let before = offset.with_ymd_and_hms(2024, 5, 31, 23, 59, 59).unwrap();
        assert!(range.contains(&inside_end, offset));
        assert!(range.contains(&at_start, offset));
        assert!(!range.contains(&after, offset));
        assert!(!range.contains(&before, offset));
        let utc_late = chrono::Utc.with_ymd_and_hms(2024, 8, 2, 2, 0, 0).unwrap().fixed_offset();
        assert!(range.contains(&utc_late, offset));
    }
}
