//! Anthropic Claude reasoning integration.
//!
//! Implements `ReasoningService` using the Anthropic Messages API. Handles
//! prompt construction, response parsing, and retries with exponential
//! backoff on rate limits and server errors.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};

use super::ReasoningService;
use crate::types::Opportunity;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";
const DEFAULT_MAX_TOKENS: u32 = 500;

/// Maximum retries on rate limit / server errors.
const MAX_RETRIES: u32 = 3;

/// Base delay for exponential backoff (ms).
const BASE_BACKOFF_MS: u64 = 1000;

// ---------------------------------------------------------------------------
// API types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: Option<String>,
}

/// The JSON verdict the model is asked to return.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Assessment {
    pub action: TradeAction,
    pub confidence_score: Decimal,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub risk_assessment: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeAction {
    Buy,
    Pass,
    Wait,
}

impl Assessment {
    /// Confidence the assessment lends the trade. Anything but BUY is zero.
    pub fn effective_confidence(&self) -> Decimal {
        match self.action {
            TradeAction::Buy => self.confidence_score.clamp(Decimal::ZERO, Decimal::ONE),
            TradeAction::Pass | TradeAction::Wait => Decimal::ZERO,
        }
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct AnthropicReasoner {
    http: Client,
    api_key: SecretString,
    model: String,
    max_tokens: u32,
    total_calls: AtomicU64,
}

impl AnthropicReasoner {
    pub fn new(api_key: SecretString, model: Option<String>, max_tokens: Option<u32>) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .context("Failed to build Anthropic HTTP client")?;

        Ok(Self {
            http,
            api_key,
            model: model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            max_tokens: max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            total_calls: AtomicU64::new(0),
        })
    }

    /// Send a messages request with retry + backoff.
    async fn call_api(&self, system: &str, user_message: &str) -> Result<String> {
        let request = MessagesRequest {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            messages: vec![Message {
                role: "user".to_string(),
                content: user_message.to_string(),
            }],
            system: Some(system.to_string()),
        };

        let mut last_error = None;

        for attempt in 0..=MAX_RETRIES {
            if attempt > 0 {
                let delay = BASE_BACKOFF_MS * 2u64.pow(attempt - 1);
                debug!(attempt, delay_ms = delay, "Retrying Anthropic API call");
                tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
            }

            let resp = self
                .http
                .post(ANTHROPIC_API_URL)
                .header("x-api-key", self.api_key.expose_secret().as_str())
                .header("anthropic-version", ANTHROPIC_VERSION)
                .header("content-type", "application/json")
                .json(&request)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let body: MessagesResponse = response
                            .json()
                            .await
                            .context("Failed to parse Anthropic response")?;
                        self.total_calls.fetch_add(1, Ordering::Relaxed);
                        return Ok(body
                            .content
                            .iter()
                            .filter_map(|b| b.text.as_deref())
                            .collect::<Vec<_>>()
                            .join(""));
                    }

                    // Retryable errors: 429 (rate limit), 500+, 529 (overloaded)
                    if status.as_u16() == 429 || status.as_u16() >= 500 {
                        let error_text = response.text().await.unwrap_or_default();
                        warn!(status = %status, attempt, error = %error_text, "Retryable Anthropic API error");
                        last_error = Some(format!("HTTP {status}: {error_text}"));
                        continue;
                    }

                    let error_text = response.text().await.unwrap_or_default();
                    anyhow::bail!("Anthropic API error {status}: {error_text}");
                }
                Err(e) => {
                    warn!(attempt, error = %e, "Anthropic request failed");
                    last_error = Some(format!("Request error: {e}"));
                    continue;
                }
            }
        }

        anyhow::bail!(
            "Anthropic API failed after {} retries: {}",
            MAX_RETRIES,
            last_error.unwrap_or_default()
        )
    }

    pub fn system_prompt() -> &'static str {
        "You are the trade reviewer for a memory-hardware arbitrage desk. \
         You receive one buy-low/sell-high opportunity at a time and judge \
         whether the predicted profit will actually be realized.\n\n\
         Consider:\n\
         1. Whether the margin is sustainable until the item is resold.\n\
         2. Seller reliability on the buy-side marketplace.\n\
         3. Demand and resale liquidity on the sell-side marketplace.\n\
         4. How stale or noisy the quoted prices may be.\n\n\
         Reply with a single JSON object in exactly this format:\n\
         {\"action\": \"BUY\" | \"PASS\" | \"WAIT\", \"confidence_score\": 0.0-1.0, \
         \"reasoning\": \"brief explanation\", \"risk_assessment\": \"key risks\"}"
    }

    pub fn build_prompt(opportunity: &Opportunity) -> String {
        let mut prompt = String::with_capacity(600);
        prompt.push_str("OPPORTUNITY:\n");
        prompt.push_str(&format!("- Product: {}\n", opportunity.product_id));
        prompt.push_str(&format!(
            "- Buy from: {} at ${}\n",
            opportunity.buy_marketplace, opportunity.buy_price
        ));
        prompt.push_str(&format!(
            "- Sell on: {} at ${}\n",
            opportunity.sell_marketplace, opportunity.sell_price
        ));
        prompt.push_str(&format!("- Estimated costs: ${}\n", opportunity.estimated_costs));
        prompt.push_str(&format!("- Net profit: ${}\n", opportunity.net_profit()));
        prompt.push_str(&format!("- Margin: {:.1}%\n", opportunity.margin_pct()));
        prompt.push_str(&format!("- Rule-based confidence: {:.2}\n", opportunity.confidence));
        prompt.push_str(&format!(
            "- Prices as of: {}\n",
            opportunity.computed_at.format("%Y-%m-%d %H:%M UTC")
        ));
        prompt
    }

    /// Parse the JSON verdict, tolerating markdown code fences around it.
    pub fn parse_assessment(text: &str) -> Result<Assessment> {
        let json = Self::extract_json(text)
            .ok_or_else(|| anyhow::anyhow!("No JSON object in reasoning response"))?;
        serde_json::from_str(json).context("Malformed assessment JSON")
    }

    fn extract_json(text: &str) -> Option<&str> {
        let start = text.find('{')?;
        let end = text.rfind('}')?;
        (end > start).then(|| &text[start..=end])
    }

    /// Total number of successful API calls made.
    pub fn total_calls(&self) -> u64 {
        self.total_calls.load(Ordering::Relaxed)
    }
}

// ---------------------------------------------------------------------------
// ReasoningService implementation
// ---------------------------------------------------------------------------

#[async_trait]
impl ReasoningService for AnthropicReasoner {
    async fn assess(&self, opportunity: &Opportunity) -> Result<Decimal> {
        let user_msg = Self::build_prompt(opportunity);

        debug!(
            route = %opportunity.route(),
            model = %self.model,
            "Requesting trade assessment"
        );

        let text = self
            .call_api(Self::system_prompt(), &user_msg)
            .await
            .context("Anthropic API call failed")?;
        let assessment = Self::parse_assessment(&text)?;
        let confidence = assessment.effective_confidence();

        info!(
            route = %opportunity.route(),
            action = ?assessment.action,
            confidence = %confidence,
            reasoning = %assessment.reasoning,
            "Trade assessment complete"
        );

        Ok(confidence)
    }

    fn model_name(&self) -> String {
        self.model.clone()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
