//! Structural and quality validation gates.
//!
//! A stateless rule engine checking candidate items against per-kind
//! thresholds before they are handed to the writer. Errors reject an item;
//! warnings travel with it as provenance. Retrying a validation failure
//! will not fix invalid input, so rejected items are never queued.

use chrono::DateTime;
use regex::Regex;
use std::collections::HashMap;

use crate::config::ValidationConfig;
use crate::models::{CandidateItem, ContentKind, ValidationResult};

/// Rule engine configured with per-kind thresholds.
pub struct Validator {
    config: ValidationConfig,
    url_re: Regex,
}

/// Aggregate outcome of [`Validator::validate_batch`].
#[derive(Debug, Clone, serde::Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub valid: usize,
    pub invalid: usize,
    pub with_warnings: usize,
    pub success_rate: f64,
    /// Error categories (message prefix before the first colon) by
    /// descending frequency.
    pub top_error_categories: Vec<(String, usize)>,
}

impl Validator {
    pub fn new(config: ValidationConfig) -> Self {
        // Conservative: scheme, host, optional port, optional path. Anything
        // fancier than that in a feed URL is usually a scraping artifact.
        let url_re = Regex::new(r"^https?://[A-Za-z0-9][A-Za-z0-9.-]*(:\d{1,5})?(/[^\s]*)?$")
            .expect("static regex");
        Validator { config, url_re }
    }

    /// Check one candidate item. Field errors and threshold violations
    /// reject; soft limits (short transcript, long tags) only warn.
    pub fn validate(&self, item: &CandidateItem) -> ValidationResult {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        for (field, value) in [
            ("id", item.id.as_str()),
            ("source", item.source.as_str()),
            ("title", item.title.as_str()),
            ("date", item.date.as_str()),
            ("ingested_at", item.ingested_at.as_str()),
        ] {
            if value.trim().is_empty() {
                errors.push(format!("missing_field: required field '{}' is empty", field));
            }
        }

        match &item.content_hash {
            None => errors.push("content_hash: field is required".to_string()),
            Some(hash) => {
                if !is_well_formed_sha256(hash) {
                    errors.push(format!(
                        "content_hash: '{}' is not a 64-character hex SHA-256",
                        truncate(hash, 80)
                    ));
                }
            }
        }

        for (field, value) in [("date", &item.date), ("ingested_at", &item.ingested_at)] {
            if !value.trim().is_empty() && parse_iso8601(value).is_none() {
                errors.push(format!("bad_date: field '{}' is not ISO-8601: '{}'", field, value));
            }
        }

        if let Some(url) = &item.url {
            if !self.url_re.is_match(url) {
                errors.push(format!("bad_url: '{}' is not a valid http(s) URL", truncate(url, 120)));
            }
        }

        self.check_kind_rules(item, &mut errors, &mut warnings);

        if let Some(tags) = &item.tags {
            for tag in tags {
                if tag.trim().is_empty() {
                    warnings.push("tags: empty tag".to_string());
                } else if tag.chars().count() > self.config.max_tag_length {
                    warnings.push(format!(
                        "tags: tag '{}' exceeds {} characters",
                        truncate(tag, 60),
                        self.config.max_tag_length
                    ));
                }
            }
        }

        ValidationResult {
            is_valid: errors.is_empty(),
            errors,
            warnings,
            metadata: serde_json::json!({ "kind": item.kind.as_str() }),
        }
    }

    fn check_kind_rules(
        &self,
        item: &CandidateItem,
        errors: &mut Vec<String>,
        warnings: &mut Vec<String>,
    ) {
        let body_len = item.body.chars().count();
        match item.kind {
            ContentKind::Article | ContentKind::Newsletter => {
                if body_len < self.config.min_article_body {
                    errors.push(format!(
                        "short_body: {} body has {} characters, minimum is {}",
                        item.kind, body_len, self.config.min_article_body
                    ));
                }
            }
            ContentKind::Podcast | ContentKind::Video => {
                if body_len < self.config.min_media_description {
                    errors.push(format!(
                        "short_body: {} description has {} characters, minimum is {}",
                        item.kind, body_len, self.config.min_media_description
                    ));
                }
                if let Some(transcript) = &item.transcript {
                    let t_len = transcript.chars().count();
                    if t_len < self.config.min_transcript {
                        warnings.push(format!(
                            "short_transcript: {} characters, expected at least {}",
                            t_len, self.config.min_transcript
                        ));
                    }
                }
            }
            ContentKind::Email => {
                if body_len < self.config.min_email_body {
                    errors.push(format!(
                        "short_body: email body has {} characters, minimum is {}",
                        body_len, self.config.min_email_body
                    ));
                }
                if item.sender.as_deref().map_or(true, |s| s.trim().is_empty()) {
                    errors.push("missing_field: email requires a sender".to_string());
                }
                if item.recipient.as_deref().map_or(true, |s| s.trim().is_empty()) {
                    errors.push("missing_field: email requires a recipient".to_string());
                }
            }
        }
    }

    /// Validate many items, preserving input order, and summarize.
    pub fn validate_batch(&self, items: &[CandidateItem]) -> (Vec<ValidationResult>, BatchSummary) {
        let results: Vec<ValidationResult> = items.iter().map(|i| self.validate(i)).collect();

        let valid = results.iter().filter(|r| r.is_valid).count();
        let with_warnings = results.iter().filter(|r| !r.warnings.is_empty()).count();

        let mut categories: HashMap<String, usize> = HashMap::new();
        for result in &results {
            for error in &result.errors {
                let category = error.split(':').next().unwrap_or("other").to_string();
                *categories.entry(category).or_default() += 1;
            }
        }
        let mut top_error_categories: Vec<(String, usize)> = categories.into_iter().collect();
        top_error_categories.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        let summary = BatchSummary {
            total: items.len(),
            valid,
            invalid: items.len() - valid,
            with_warnings,
            success_rate: if items.is_empty() {
                1.0
            } else {
                valid as f64 / items.len() as f64
            },
            top_error_categories,
        };

        (results, summary)
    }
}

/// Accept `Z`-suffixed and offset forms; chrono treats `Z` as +00:00.
fn parse_iso8601(value: &str) -> Option<DateTime<chrono::FixedOffset>> {
    DateTime::parse_from_rfc3339(value.trim()).ok()
}

fn is_well_formed_sha256(hash: &str) -> bool {
    hash.len() == 64
        && hash
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity;

    fn base_item(kind: ContentKind, body: &str) -> CandidateItem {
        CandidateItem {
            id: "item-1".to_string(),
            kind,
            source: "feed".to_string(),
            title: "A title".to_string(),
            body: body.to_string(),
            url: None,
            guid: None,
            date: "2025-06-01T12:00:00Z".to_string(),
            ingested_at: "2025-06-01T12:05:00+00:00".to_string(),
            content_hash: Some(identity::content_hash("A title", body)),
            transcript: None,
            sender: None,
            recipient: None,
            tags: None,
            metadata: serde_json::Value::Null,
        }
    }

    fn validator() -> Validator {
        Validator::new(ValidationConfig::default())
    }

    #[test]
    fn test_article_at_boundary_is_valid() {
        let body = "x".repeat(300);
        let result = validator().validate(&base_item(ContentKind::Article, &body));
        assert!(result.is_valid, "errors: {:?}", result.errors);
    }

    #[test]
    fn test_article_below_boundary_mentions_threshold() {
        let body = "x".repeat(299);
        let result = validator().validate(&base_item(ContentKind::Article, &body));
        assert!(!result.is_valid);
        assert!(result.errors.iter().any(|e| e.contains("300")));
    }

    #[test]
    fn test_missing_required_fields() {
        let mut item = base_item(ContentKind::Article, &"x".repeat(300));
        item.id = String::new();
        item.source = "  ".to_string();
        let result = validator().validate(&item);
        assert_eq!(
            result.errors.iter().filter(|e| e.starts_with("missing_field")).count(),
            2
        );
    }

    #[test]
    fn test_bad_content_hash_rejected() {
        let mut item = base_item(ContentKind::Article, &"x".repeat(300));
        item.content_hash = Some("not-a-hash".to_string());
        assert!(!validator().validate(&item).is_valid);

        item.content_hash = None;
        assert!(!validator().validate(&item).is_valid);

        // Uppercase hex is not canonical
        item.content_hash = Some("A".repeat(64));
        assert!(!validator().validate(&item).is_valid);
    }

    #[test]
    fn test_bad_date_is_error_not_warning() {
        let mut item = base_item(ContentKind::Article, &"x".repeat(300));
        item.date = "June 1st 2025".to_string();
        let result = validator().validate(&item);
        assert!(!result.is_valid);
        assert!(result.errors.iter().any(|e| e.starts_with("bad_date")));
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_z_suffix_date_accepted() {
        let mut item = base_item(ContentKind::Article, &"x".repeat(300));
        item.date = "2025-01-02T03:04:05Z".to_string();
        assert!(validator().validate(&item).is_valid);
    }

    #[test]
    fn test_podcast_short_transcript_is_warning() {
        let mut item = base_item(ContentKind::Podcast, &"d".repeat(100));
        item.transcript = Some("too short".to_string());
        let result = validator().validate(&item);
        assert!(result.is_valid);
        assert!(result.warnings.iter().any(|w| w.starts_with("short_transcript")));
    }

    #[test]
    fn test_podcast_short_description_is_error() {
        let item = base_item(ContentKind::Podcast, &"d".repeat(99));
        assert!(!validator().validate(&item).is_valid);
    }

    #[test]
    fn test_email_requires_sender_and_recipient() {
        let mut item = base_item(ContentKind::Email, &"b".repeat(50));
        let result = validator().validate(&item);
        assert!(!result.is_valid);
        assert_eq!(result.errors.len(), 2);

        item.sender = Some("a@example.com".to_string());
        item.recipient = Some("b@example.com".to_string());
        assert!(validator().validate(&item).is_valid);
    }

    #[test]
    fn test_url_field_checked() {
        let mut item = base_item(ContentKind::Article, &"x".repeat(300));
        item.url = Some("https://example.com:8080/a/b".to_string());
        assert!(validator().validate(&item).is_valid);

        item.url = Some("ftp://example.com/x".to_string());
        assert!(!validator().validate(&item).is_valid);

        item.url = Some("https://exa mple.com".to_string());
        assert!(!validator().validate(&item).is_valid);
    }

    #[test]
    fn test_long_tag_is_warning_only() {
        let mut item = base_item(ContentKind::Article, &"x".repeat(300));
        item.tags = Some(vec!["ok".to_string(), "t".repeat(51)]);
        let result = validator().validate(&item);
        assert!(result.is_valid);
        assert_eq!(result.warnings.len(), 1);
    }

    #[test]
    fn test_batch_preserves_order_and_summarizes() {
        let good = base_item(ContentKind::Article, &"x".repeat(300));
        let mut short = base_item(ContentKind::Article, "tiny");
        short.url = Some("nope".to_string());
        let items = vec![good.clone(), short, good];

        let (results, summary) = validator().validate_batch(&items);
        assert_eq!(results.len(), 3);
        assert!(results[0].is_valid);
        assert!(!results[1].is_valid);
        assert!(results[2].is_valid);

        assert_eq!(summary.total, 3);
        assert_eq!(summary.valid, 2);
        assert_eq!(summary.invalid, 1);
        assert!((summary.success_rate - 2.0 / 3.0).abs() < 1e-9);
        let categories: Vec<&str> =
            summary.top_error_categories.iter().map(|(c, _)| c.as_str()).collect();
        assert!(categories.contains(&"short_body"));
        assert!(categories.contains(&"bad_url"));
    }

    #[test]
    fn test_empty_batch() {
        let (results, summary) = validator().validate_batch(&[]);
        assert!(results.is_empty());
        assert_eq!(summary.success_rate, 1.0);
    }
}
