//! Scripted model client for tests
//!
//! Replies are keyed by a substring matched against the prompt or the model
//! id. Each key holds a FIFO queue; the last reply sticks once the queue
//! drains, so "rate limited twice, then succeed" scripts naturally.

use crate::client::ModelClient;
use crate::types::{CompletionRequest, RawCompletion};
use async_trait::async_trait;
use sprout_core::{Pricing, Result, SproutError};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// One scripted reply
#[derive(Debug, Clone)]
pub enum MockReply {
    /// Succeed with this text; token counts derived from lengths
    Text(String),
    /// Succeed with explicit (possibly invalid) token counts
    Counted {
        text: String,
        input_tokens: i64,
        output_tokens: i64,
    },
    /// Sleep before succeeding, to trip the dispatcher deadline
    Slow { text: String, delay: Duration },
    RateLimited { retry_after_secs: Option<u64> },
    Unavailable(String),
    TokenLimit,
}

struct Rule {
    needle: String,
    replies: VecDeque<MockReply>,
    sticky: Option<MockReply>,
}

/// Mock model client for testing
pub struct MockModelClient {
    rules: Mutex<Vec<Rule>>,
    default_reply: MockReply,
    calls: Mutex<Vec<CompletionRequest>>,
    prices: HashMap<String, Pricing>,
    fail_pricing: bool,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

/// Counts a call as in flight for its whole duration, sleeps included
struct InFlightGuard<'a> {
    counter: &'a AtomicUsize,
}

impl<'a> InFlightGuard<'a> {
    fn enter(counter: &'a AtomicUsize, peak: &'a AtomicUsize) -> Self {
        let now = counter.fetch_add(1, Ordering::SeqCst) + 1;
        peak.fetch_max(now, Ordering::SeqCst);
        Self { counter }
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Default for MockModelClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MockModelClient {
    pub fn new() -> Self {
        Self {
            rules: Mutex::new(Vec::new()),
            default_reply: MockReply::Text("ok".to_string()),
            calls: Mutex::new(Vec::new()),
            prices: HashMap::new(),
            fail_pricing: false,
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        }
    }

    /// Queue a reply for requests whose prompt or model contains `needle`
    pub fn with_reply(self, needle: &str, reply: MockReply) -> Self {
        {
            let mut rules = self.rules.lock().unwrap();
            if let Some(rule) = rules.iter_mut().find(|r| r.needle == needle) {
                rule.replies.push_back(reply);
            } else {
                rules.push(Rule {
                    needle: needle.to_string(),
                    replies: VecDeque::from([reply]),
                    sticky: None,
                });
            }
        }
        self
    }

    /// Reply used when no rule matches
    pub fn with_default(mut self, reply: MockReply) -> Self {
        self.default_reply = reply;
        self
    }

    pub fn with_pricing(mut self, model: &str, pricing: Pricing) -> Self {
        self.prices.insert(model.to_string(), pricing);
        self
    }

    /// Make pricing() fail, for refresh-degradation tests
    pub fn with_pricing_error(mut self) -> Self {
        self.fail_pricing = true;
        self
    }

    /// Every request seen so far, in arrival order
    pub fn calls(&self) -> Vec<CompletionRequest> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Highest number of calls observed in flight at once, for
    /// concurrency-cap tests
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    fn next_reply(&self, request: &CompletionRequest) -> MockReply {
        let mut rules = self.rules.lock().unwrap();
        for rule in rules.iter_mut() {
            if request.prompt.contains(&rule.needle) || request.model.contains(&rule.needle) {
                if let Some(reply) = rule.replies.pop_front() {
                    rule.sticky = Some(reply.clone());
                    return reply;
                }
                if let Some(reply) = &rule.sticky {
                    return reply.clone();
                }
            }
        }
        self.default_reply.clone()
    }
}

#[async_trait]
impl ModelClient for MockModelClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<RawCompletion> {
        let _in_flight = InFlightGuard::enter(&self.in_flight, &self.peak_in_flight);
        self.calls.lock().unwrap().push(request.clone());

        match self.next_reply(request) {
            MockReply::Text(text) => Ok(RawCompletion {
                input_tokens: request.prompt.len() as i64 / 4 + 1,
                output_tokens: text.len() as i64 / 4 + 1,
                text,
            }),
            MockReply::Counted {
                text,
                input_tokens,
                output_tokens,
            } => Ok(RawCompletion {
                text,
                input_tokens,
                output_tokens,
            }),
            MockReply::Slow { text, delay } => {
                tokio::time::sleep(delay).await;
                Ok(RawCompletion {
                    input_tokens: request.prompt.len() as i64 / 4 + 1,
                    output_tokens: text.len() as i64 / 4 + 1,
                    text,
                })
            }
            MockReply::RateLimited { retry_after_secs } => {
                Err(SproutError::RateLimited { retry_after_secs })
            }
            MockReply::Unavailable(msg) => Err(SproutError::Unavailable(msg)),
            MockReply::TokenLimit => Err(SproutError::TokenLimitExceeded {
                model: request.model.clone(),
            }),
        }
    }

    async fn pricing(&self) -> Result<HashMap<String, Pricing>> {
        if self.fail_pricing {
            return Err(SproutError::Unavailable("pricing endpoint down".to_string()));
        }
        Ok(self.prices.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_sequence_then_sticky() {
        let client = MockModelClient::new()
            .with_reply(
                "m1",
                MockReply::RateLimited {
                    retry_after_secs: None,
                },
            )
            .with_reply("m1", MockReply::Text("done".to_string()));

        let request = CompletionRequest::new("m1", "hello", 64);

        assert!(client.complete(&request).await.is_err());
        assert_eq!(client.complete(&request).await.unwrap().text, "done");
        // Queue drained: last reply sticks
        assert_eq!(client.complete(&request).await.unwrap().text, "done");
        assert_eq!(client.call_count(), 3);
    }

    #[tokio::test]
    async fn test_unmatched_requests_use_default() {
        let client = MockModelClient::new().with_reply("special", MockReply::TokenLimit);
        let request = CompletionRequest::new("m1", "ordinary prompt", 64);

        let raw = client.complete(&request).await.unwrap();
        assert_eq!(raw.text, "ok");
        assert!(raw.input_tokens > 0);
    }

    #[tokio::test]
    async fn test_needle_matches_prompt() {
        let client =
            MockModelClient::new().with_reply("src/index.js", MockReply::Text("code".to_string()));
        let request = CompletionRequest::new("m2", "Generate the file src/index.js now", 64);

        assert_eq!(client.complete(&request).await.unwrap().text, "code");
        assert_eq!(client.calls()[0].model, "m2");
    }

    #[tokio::test]
    async fn test_peak_in_flight_sees_overlapping_calls() {
        let client = std::sync::Arc::new(MockModelClient::new().with_default(MockReply::Slow {
            text: "ok".to_string(),
            delay: Duration::from_millis(20),
        }));
        let request = CompletionRequest::new("m1", "hello", 64);

        let mut handles = Vec::new();
        for _ in 0..2 {
            let client = std::sync::Arc::clone(&client);
            let request = request.clone();
            handles.push(tokio::spawn(async move { client.complete(&request).await }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(client.peak_in_flight(), 2);
    }
}
