// Product image search
//
// Issues one "Brand Model" query per draft, scrapes image URLs out of the
// HTML response and scores them by domain reputation and URL keywords.
// Everything here is best-effort: a draft without images is acceptable.

use regex::Regex;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::debug;

use stockflow_core::{Result, StockflowConfig, StockflowError};

const SEARCH_TIMEOUT: Duration = Duration::from_secs(15);
const MIN_CONFIDENCE: f64 = 0.50;
const TOP_N: usize = 3;

/// Domains that overwhelmingly serve real product imagery
const REPUTABLE_DOMAINS: &[(&str, f64)] = &[
    ("shopify.com", 0.35),
    ("cloudfront.net", 0.25),
    ("amazonaws.com", 0.25),
    ("media-amazon.com", 0.30),
    ("alicdn.com", 0.20),
    ("walmartimages.com", 0.30),
];

const POSITIVE_KEYWORDS: &[&str] = &["product", "catalog", "item", "cdn", "large", "main"];
const NEGATIVE_KEYWORDS: &[&str] = &["sprite", "icon", "logo", "banner", "avatar", "pixel"];

#[derive(Debug, Clone)]
pub struct ImageCandidate {
    pub url: String,
    pub source_domain: String,
    pub confidence: f64,
}

fn img_src_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"<img[^>]+src=["'](https?://[^"']+\.(?:jpe?g|png|webp)[^"']*)["']"#).unwrap()
    })
}

/// Score a single image URL in [0, 1]
pub fn score_image_url(url: &str) -> f64 {
    let lower = url.to_lowercase();
    let mut score: f64 = 0.45;
    for (domain, bonus) in REPUTABLE_DOMAINS {
        if lower.contains(domain) {
            score += bonus;
            break;
        }
    }
    if POSITIVE_KEYWORDS.iter().any(|k| lower.contains(k)) {
        score += 0.15;
    }
    if NEGATIVE_KEYWORDS.iter().any(|k| lower.contains(k)) {
        score -= 0.40;
    }
    score.clamp(0.0, 1.0)
}

/// Extract, score and rank image candidates from an HTML page
pub fn rank_images(html: &str) -> Vec<ImageCandidate> {
    let mut candidates: Vec<ImageCandidate> = img_src_pattern()
        .captures_iter(html)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .map(|url| {
            let domain = url
                .split('/')
                .nth(2)
                .unwrap_or("")
                .trim_start_matches("www.")
                .to_string();
            ImageCandidate {
                confidence: score_image_url(&url),
                source_domain: domain,
                url,
            }
        })
        .filter(|c| c.confidence >= MIN_CONFIDENCE)
        .collect();

    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    candidates.dedup_by(|a, b| a.url == b.url);
    candidates.truncate(TOP_N);
    candidates
}

pub struct ImageSearchClient {
    http: reqwest::Client,
    base_url: String,
}

impl ImageSearchClient {
    pub fn new(config: &StockflowConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: config.image_search_url.clone(),
        }
    }

    /// Top candidates for one "Brand Model" query
    pub async fn search(&self, query: &str) -> Result<Vec<ImageCandidate>> {
        let response = self
            .http
            .get(&self.base_url)
            .query(&[("q", query)])
            .timeout(SEARCH_TIMEOUT)
            .send()
            .await
            .map_err(|e| StockflowError::transient(format!("image search: {e}")))?;

        let html = response
            .text()
            .await
            .map_err(|e| StockflowError::transient(format!("image search body: {e}")))?;

        let candidates = rank_images(&html);
        debug!(query, candidates = candidates.len(), "image search ranked");
        Ok(candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reputable_product_urls_outrank_chrome() {
        let product = score_image_url("https://cdn.shopify.com/s/files/product/widget-a-large.jpg");
        let logo = score_image_url("https://example.com/assets/logo.png");
        assert!(product >= 0.85);
        assert!(logo < MIN_CONFIDENCE);
    }

    #[test]
    fn rank_images_returns_top_three_above_threshold() {
        let html = r#"
            <img src="https://cdn.shopify.com/product/a-main.jpg">
            <img src="https://media-amazon.com/images/item-b-large.jpeg">
            <img src="https://example.com/catalog/c.png">
            <img src="https://example.com/sprite-sheet.png">
            <img src="https://walmartimages.com/product/d.webp">
        "#;
        let ranked = rank_images(html);
        assert_eq!(ranked.len(), 3);
        assert!(ranked.iter().all(|c| c.confidence >= MIN_CONFIDENCE));
        assert!(ranked.windows(2).all(|w| w[0].confidence >= w[1].confidence));
        assert!(!ranked.iter().any(|c| c.url.contains("sprite")));
    }

    #[test]
    fn empty_page_yields_no_candidates() {
        assert!(rank_images("<html><body>no images</body></html>").is_empty());
    }
}
