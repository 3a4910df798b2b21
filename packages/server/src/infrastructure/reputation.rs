//! IP reputation lookup against an external abuse-confidence service.
//!
//! Lookup failures are recoverable: they log and count as a zero score, so
//! an outage never blocks logins. Scores are cached per IP.

use std::collections::HashMap;

use tokio::sync::Mutex;

use crate::settings::Settings;

pub struct ReputationChecker {
    api_url: Option<String>,
    api_key: Option<String>,
    threshold: i64,
    http: reqwest::Client,
    cache: Mutex<HashMap<String, i64>>,
}

impl ReputationChecker {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            api_url: settings.abuse_api_url.clone(),
            api_key: settings.abuse_api_key.clone(),
            threshold: settings.maximum_abuse_confidence_score,
            http: reqwest::Client::new(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// The abuse confidence score for an IP; 0 when lookups are disabled
    /// or failing.
    pub async fn confidence_score(&self, ip: &str) -> i64 {
        let Some(api_url) = &self.api_url else {
            return 0;
        };

        if let Some(score) = self.cache.lock().await.get(ip) {
            return *score;
        }

        let response = self
            .http
            .get(api_url)
            .query(&[("ipAddress", ip)])
            .header("Key", self.api_key.as_deref().unwrap_or(""))
            .header("Accept", "application/json")
            .send()
            .await;

        let score = match response {
            Ok(response) => match response.json::<serde_json::Value>().await {
                Ok(body) => body["data"]["abuseConfidenceScore"].as_i64().unwrap_or(0),
                Err(e) => {
                    tracing::warn!("Malformed abuse score response for {}: {}", ip, e);
                    return 0;
                }
            },
            Err(e) => {
                tracing::warn!("Abuse score lookup failed for {}: {}", ip, e);
                return 0;
            }
        };

        self.cache.lock().await.insert(ip.to_string(), score);
        score
    }

    /// Whether the IP is over the configured abuse threshold.
    pub async fn is_abusive(&self, ip: &str) -> bool {
        self.confidence_score(ip).await > self.threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_disabled_checker_scores_zero() {
        let checker = ReputationChecker::from_settings(&Settings::default());

        assert_eq!(checker.confidence_score("1.2.3.4").await, 0);
        assert!(!checker.is_abusive("1.2.3.4").await);
    }

    #[tokio::test]
    async fn test_cached_score_is_reused() {
        let checker = ReputationChecker::from_settings(&Settings::default());
        checker.cache.lock().await.insert("1.2.3.4".to_string(), 99);

        // cache hit short-circuits, even though no API is configured
        let mut with_url = Settings::default();
        with_url.abuse_api_url = Some("http://reputation.invalid/check".to_string());
        let checker_with_url = ReputationChecker::from_settings(&with_url);
        checker_with_url
            .cache
            .lock()
            .await
            .insert("1.2.3.4".to_string(), 99);

        assert_eq!(checker_with_url.confidence_score("1.2.3.4").await, 99);
        assert!(checker_with_url.is_abusive("1.2.3.4").await);
        assert_eq!(checker.confidence_score("1.2.3.4").await, 0);
    }
}
