//! Model call gateway.
//!
//! Every model call goes through [`Gateway::call`]. Intents are routed to one of two
//! provider chains. Each chain has a primary provider that is retried with linear
//! backoff while it reports rate limiting, and an ordered list of fallbacks that are
//! tried once each. A primary that fails is switched off for the rest of the run.

use anyhow::Result;
use std::fmt;
use std::rc::Rc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::ai::{AIProvider, ChatCompletionsProvider, GeminiProvider, HuggingFaceProvider, ProviderError};
use crate::config::Config;

pub const DEFAULT_RANKING_MODEL: &str = "llama-3.3-70b-versatile";
pub const DEFAULT_DRAFTING_MODEL: &str = "gemini-2.0-flash";
pub const DEFAULT_TOGETHER_MODEL: &str = "meta-llama/Meta-Llama-3.1-70B-Instruct-Turbo";
pub const DEFAULT_OPENROUTER_MODEL: &str = "meta-llama/llama-3.1-8b-instruct:free";
pub const DEFAULT_HUGGINGFACE_MODEL: &str = "meta-llama/Meta-Llama-3-8B-Instruct";

pub const MAX_PRIMARY_ATTEMPTS: u32 = 3;
pub const DEFAULT_BACKOFF_STEP: Duration = Duration::from_secs(5);

/// Blocks the pipeline between calls. Swapped out in tests.
pub trait Pacer {
    fn pause(&self, duration: Duration);
}

pub struct ThreadPacer;

impl Pacer for ThreadPacer {
    fn pause(&self, duration: Duration) {
        if !duration.is_zero() {
            std::thread::sleep(duration);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainKind {
    Ranking,
    Drafting,
}

impl fmt::Display for ChainKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChainKind::Ranking => f.write_str("ranking"),
            ChainKind::Drafting => f.write_str("drafting"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    Rank,
    Judge,
    Draft,
    Refine,
    Extract,
}

impl Intent {
    pub fn chain(self) -> ChainKind {
        match self {
            Intent::Rank | Intent::Judge | Intent::Extract => ChainKind::Ranking,
            Intent::Draft | Intent::Refine => ChainKind::Drafting,
        }
    }
}

/// One structured request to a model.
#[derive(Debug, Clone)]
pub struct ModelRequest {
    pub intent: Intent,
    pub prompt: String,
    pub system: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub json_output: bool,
    pub backoff_step: Option<Duration>,
}

impl ModelRequest {
    pub fn new(intent: Intent, prompt: impl Into<String>) -> Self {
        Self {
            intent,
            prompt: prompt.into(),
            system: None,
            temperature: 0.7,
            max_tokens: 1000,
            json_output: false,
            backoff_step: None,
        }
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Ask providers that support it for a bare JSON object.
    pub fn json_output(mut self) -> Self {
        self.json_output = true;
        self
    }

    /// Override the rate-limit backoff step for this call.
    pub fn backoff_step(mut self, step: Duration) -> Self {
        self.backoff_step = Some(step);
        self
    }
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("all {chain} providers are out of quota: {last}")]
    QuotaExhausted { chain: ChainKind, last: ProviderError },

    #[error("all {chain} providers failed: {last}")]
    Exhausted { chain: ChainKind, last: ProviderError },

    #[error("no {chain} provider available")]
    Unavailable { chain: ChainKind },
}

impl GatewayError {
    pub fn is_quota(&self) -> bool {
        matches!(self, GatewayError::QuotaExhausted { .. })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub step: Duration,
}

impl RetryPolicy {
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.step * attempt
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_PRIMARY_ATTEMPTS,
            step: DEFAULT_BACKOFF_STEP,
        }
    }
}

#[derive(Debug)]
enum CallState {
    Trying { attempt: u32 },
    Backoff { attempt: u32, wait: Duration },
    Fallback { next: usize },
    Failed,
}

pub struct ProviderChain {
    kind: ChainKind,
    primary: Option<Box<dyn AIProvider>>,
    primary_available: bool,
    fallbacks: Vec<Box<dyn AIProvider>>,
}

impl ProviderChain {
    pub fn new(
        kind: ChainKind,
        primary: Option<Box<dyn AIProvider>>,
        fallbacks: Vec<Box<dyn AIProvider>>,
    ) -> Self {
        Self {
            kind,
            primary,
            primary_available: true,
            fallbacks,
        }
    }

    #[cfg(test)]
    pub fn empty(kind: ChainKind) -> Self {
        Self::new(kind, None, Vec::new())
    }

    pub fn primary_available(&self) -> bool {
        self.primary.is_some() && self.primary_available
    }

    pub fn describe(&self) -> String {
        let mut names: Vec<&str> = Vec::new();
        if let Some(primary) = &self.primary {
            names.push(primary.name());
        }
        names.extend(self.fallbacks.iter().map(|p| p.name()));
        if names.is_empty() {
            "none".to_string()
        } else {
            names.join(" -> ")
        }
    }

    fn call(
        &mut self,
        request: &ModelRequest,
        policy: RetryPolicy,
        pacer: &dyn Pacer,
    ) -> Result<String, GatewayError> {
        let mut failures: Vec<ProviderError> = Vec::new();
        let mut state = if self.primary_available() {
            CallState::Trying { attempt: 1 }
        } else {
            CallState::Fallback { next: 0 }
        };

        loop {
            state = match state {
                CallState::Trying { attempt } => {
                    match self.primary.as_deref().map(|p| p.complete(request)) {
                        None => CallState::Fallback { next: 0 },
                        Some(Ok(text)) => return Ok(text),
                        Some(Err(err)) if err.is_rate_limit() && attempt < policy.max_attempts => {
                            let wait = policy.backoff(attempt);
                            warn!(
                                chain = %self.kind,
                                attempt,
                                wait_secs = wait.as_secs_f32(),
                                "Rate limited, backing off"
                            );
                            failures.push(err);
                            CallState::Backoff { attempt, wait }
                        }
                        Some(Err(err)) => {
                            warn!(
                                chain = %self.kind,
                                error = %err,
                                "Primary provider failed, switching to fallbacks for the rest of this run"
                            );
                            self.primary_available = false;
                            failures.push(err);
                            CallState::Fallback { next: 0 }
                        }
                    }
                }
                CallState::Backoff { attempt, wait } => {
                    pacer.pause(wait);
                    CallState::Trying { attempt: attempt + 1 }
                }
                CallState::Fallback { next } => match self.fallbacks.get(next) {
                    Some(provider) => {
                        info!(chain = %self.kind, provider = provider.name(), "Using fallback provider");
                        match provider.complete(request) {
                            Ok(text) => return Ok(text),
                            Err(err) => {
                                warn!(chain = %self.kind, error = %err, "Fallback provider failed");
                                failures.push(err);
                                CallState::Fallback { next: next + 1 }
                            }
                        }
                    }
                    None => CallState::Failed,
                },
                CallState::Failed => return Err(self.failure(failures)),
            };
            debug!(chain = %self.kind, ?state, "Gateway transition");
        }
    }

    fn failure(&self, failures: Vec<ProviderError>) -> GatewayError {
        let chain = self.kind;
        let all_quota = failures.iter().all(|e| e.is_quota());
        match failures.into_iter().last() {
            None => GatewayError::Unavailable { chain },
            Some(last) if all_quota => GatewayError::QuotaExhausted { chain, last },
            Some(last) => GatewayError::Exhausted { chain, last },
        }
    }
}

/// Owns both provider chains and their availability flags for one run.
pub struct Gateway {
    ranking: ProviderChain,
    drafting: ProviderChain,
    policy: RetryPolicy,
    pacer: Rc<dyn Pacer>,
}

impl Gateway {
    pub fn new(ranking: ProviderChain, drafting: ProviderChain, pacer: Rc<dyn Pacer>) -> Self {
        Self {
            ranking,
            drafting,
            policy: RetryPolicy::default(),
            pacer,
        }
    }

    /// Build both chains from whichever API keys are configured.
    pub fn from_config(config: &Config, pacer: Rc<dyn Pacer>) -> Result<Self> {
        let keys = &config.api_keys;

        let ranking_primary: Option<Box<dyn AIProvider>> = match keys.groq() {
            Some(key) => {
                let model = config.models.ranking.as_deref().unwrap_or(DEFAULT_RANKING_MODEL);
                Some(Box::new(ChatCompletionsProvider::groq(key, model)?))
            }
            None => None,
        };
        let mut ranking_fallbacks: Vec<Box<dyn AIProvider>> = Vec::new();
        let groq_fallback = &config.fallback_models.groq_fallback;
        if groq_fallback.enabled {
            if let Some(key) = keys.together() {
                let model = groq_fallback.model.as_deref().unwrap_or(DEFAULT_TOGETHER_MODEL);
                ranking_fallbacks.push(Box::new(ChatCompletionsProvider::together(key, model)?));
            }
            if let Some(key) = keys.huggingface() {
                ranking_fallbacks.push(Box::new(HuggingFaceProvider::new(key, DEFAULT_HUGGINGFACE_MODEL)?));
            }
        }

        let drafting_primary: Option<Box<dyn AIProvider>> = match keys.gemini() {
            Some(key) => {
                let model = config.models.drafting.as_deref().unwrap_or(DEFAULT_DRAFTING_MODEL);
                Some(Box::new(GeminiProvider::new(key, model)?))
            }
            None => None,
        };
        let mut drafting_fallbacks: Vec<Box<dyn AIProvider>> = Vec::new();
        let gemini_fallback = &config.fallback_models.gemini_fallback;
        if gemini_fallback.enabled {
            if let Some(key) = keys.openrouter() {
                let model = gemini_fallback.model.as_deref().unwrap_or(DEFAULT_OPENROUTER_MODEL);
                drafting_fallbacks.push(Box::new(ChatCompletionsProvider::openrouter(key, model)?));
            }
            if let Some(key) = keys.huggingface() {
                drafting_fallbacks.push(Box::new(HuggingFaceProvider::new(key, DEFAULT_HUGGINGFACE_MODEL)?));
            }
        }

        let gateway = Self::new(
            ProviderChain::new(ChainKind::Ranking, ranking_primary, ranking_fallbacks),
            ProviderChain::new(ChainKind::Drafting, drafting_primary, drafting_fallbacks),
            pacer,
        );
        info!(
            ranking = %gateway.ranking.describe(),
            drafting = %gateway.drafting.describe(),
            "Model providers configured"
        );
        Ok(gateway)
    }

    pub fn call(&mut self, request: &ModelRequest) -> Result<String, GatewayError> {
        let policy = match request.backoff_step {
            Some(step) => RetryPolicy { step, ..self.policy },
            None => self.policy,
        };
        let pacer = Rc::clone(&self.pacer);
        let chain = match request.intent.chain() {
            ChainKind::Ranking => &mut self.ranking,
            ChainKind::Drafting => &mut self.drafting,
        };
        chain.call(request, policy, pacer.as_ref())
    }

    /// Block for a fixed throttle delay.
    pub fn pause(&self, duration: Duration) {
        self.pacer.pause(duration);
    }

    pub fn primary_available(&self, chain: ChainKind) -> bool {
        match chain {
            ChainKind::Ranking => self.ranking.primary_available(),
            ChainKind::Drafting => self.drafting.primary_available(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{RecordingPacer, ScriptedProvider, gateway_with, rate_limited, timed_out};

    #[test]
    fn test_rate_limited_primary_gets_three_tries_then_falls_back() {
        let (primary, primary_calls) = ScriptedProvider::new("groq", |_, _| Err(rate_limited("groq")));
        let (fallback, fallback_calls) = ScriptedProvider::new("together", |_, _| Ok("fallback answer".to_string()));
        let pacer = Rc::new(RecordingPacer::default());
        let mut gateway = gateway_with(
            ProviderChain::new(ChainKind::Ranking, Some(primary), vec![fallback]),
            ProviderChain::empty(ChainKind::Drafting),
            &pacer,
        );

        let text = gateway.call(&ModelRequest::new(Intent::Rank, "rate this")).unwrap();

        assert_eq!(text, "fallback answer");
        assert_eq!(primary_calls.get(), 3);
        assert_eq!(fallback_calls.get(), 1);
        let pauses = pacer.pauses();
        assert_eq!(pauses, vec![Duration::from_secs(5), Duration::from_secs(10)]);
        assert!(pauses.windows(2).all(|w| w[0] < w[1]));
        assert!(!gateway.primary_available(ChainKind::Ranking));
    }

    #[test]
    fn test_unavailable_primary_is_never_retried_in_the_same_run() {
        let (primary, primary_calls) = ScriptedProvider::new("gemini", |_, _| Err(rate_limited("gemini")));
        let (fallback, fallback_calls) = ScriptedProvider::new("openrouter", |i, _| Ok(format!("letter {i}")));
        let pacer = Rc::new(RecordingPacer::default());
        let mut gateway = gateway_with(
            ProviderChain::empty(ChainKind::Ranking),
            ProviderChain::new(ChainKind::Drafting, Some(primary), vec![fallback]),
            &pacer,
        );

        gateway.call(&ModelRequest::new(Intent::Draft, "write")).unwrap();
        let second = gateway.call(&ModelRequest::new(Intent::Refine, "rewrite")).unwrap();
        let third = gateway.call(&ModelRequest::new(Intent::Draft, "write")).unwrap();

        assert_eq!(primary_calls.get(), 3);
        assert_eq!(fallback_calls.get(), 3);
        assert_eq!(second, "letter 1");
        assert_eq!(third, "letter 2");
    }

    #[test]
    fn test_other_errors_fall_through_without_retry() {
        let (primary, primary_calls) = ScriptedProvider::new("groq", |_, _| Err(timed_out("groq")));
        let (fallback, _) = ScriptedProvider::new("together", |_, _| Ok("ok".to_string()));
        let pacer = Rc::new(RecordingPacer::default());
        let mut gateway = gateway_with(
            ProviderChain::new(ChainKind::Ranking, Some(primary), vec![fallback]),
            ProviderChain::empty(ChainKind::Drafting),
            &pacer,
        );

        assert_eq!(gateway.call(&ModelRequest::new(Intent::Judge, "judge")).unwrap(), "ok");
        assert_eq!(primary_calls.get(), 1);
        assert!(pacer.pauses().is_empty());
    }

    #[test]
    fn test_rate_limit_recovery_keeps_primary() {
        let (primary, primary_calls) = ScriptedProvider::new("groq", |i, _| {
            if i == 0 { Err(rate_limited("groq")) } else { Ok("scored".to_string()) }
        });
        let pacer = Rc::new(RecordingPacer::default());
        let mut gateway = gateway_with(
            ProviderChain::new(ChainKind::Ranking, Some(primary), Vec::new()),
            ProviderChain::empty(ChainKind::Drafting),
            &pacer,
        );

        let request = ModelRequest::new(Intent::Rank, "rate").backoff_step(Duration::from_secs(20));
        assert_eq!(gateway.call(&request).unwrap(), "scored");
        assert_eq!(primary_calls.get(), 2);
        assert_eq!(pacer.pauses(), vec![Duration::from_secs(20)]);
        assert!(gateway.primary_available(ChainKind::Ranking));
    }

    #[test]
    fn test_each_fallback_tried_once_then_exhausted() {
        let (primary, _) = ScriptedProvider::new("groq", |_, _| Err(timed_out("groq")));
        let (first, first_calls) = ScriptedProvider::new("together", |_, _| Err(timed_out("together")));
        let (second, second_calls) = ScriptedProvider::new("huggingface", |_, _| Err(timed_out("huggingface")));
        let pacer = Rc::new(RecordingPacer::default());
        let mut gateway = gateway_with(
            ProviderChain::new(ChainKind::Ranking, Some(primary), vec![first, second]),
            ProviderChain::empty(ChainKind::Drafting),
            &pacer,
        );

        let err = gateway.call(&ModelRequest::new(Intent::Rank, "rate")).unwrap_err();
        assert!(matches!(err, GatewayError::Exhausted { chain: ChainKind::Ranking, .. }));
        assert!(err.to_string().contains("huggingface"));
        assert_eq!(first_calls.get(), 1);
        assert_eq!(second_calls.get(), 1);
    }

    #[test]
    fn test_quota_on_every_provider_is_reported_as_quota() {
        let (primary, _) = ScriptedProvider::new("gemini", |_, _| {
            Err(ProviderError::QuotaExceeded {
                provider: "gemini".to_string(),
                message: "insufficient_quota".to_string(),
            })
        });
        let pacer = Rc::new(RecordingPacer::default());
        let mut gateway = gateway_with(
            ProviderChain::empty(ChainKind::Ranking),
            ProviderChain::new(ChainKind::Drafting, Some(primary), Vec::new()),
            &pacer,
        );

        let err = gateway.call(&ModelRequest::new(Intent::Draft, "write")).unwrap_err();
        assert!(err.is_quota());
    }

    #[test]
    fn test_empty_chain_is_unavailable() {
        let pacer = Rc::new(RecordingPacer::default());
        let mut gateway = gateway_with(
            ProviderChain::empty(ChainKind::Ranking),
            ProviderChain::empty(ChainKind::Drafting),
            &pacer,
        );
        let err = gateway.call(&ModelRequest::new(Intent::Judge, "judge")).unwrap_err();
        assert!(matches!(err, GatewayError::Unavailable { chain: ChainKind::Ranking }));
    }

    #[test]
    fn test_intents_route_to_their_chain() {
        assert_eq!(Intent::Rank.chain(), ChainKind::Ranking);
        assert_eq!(Intent::Judge.chain(), ChainKind::Ranking);
        assert_eq!(Intent::Extract.chain(), ChainKind::Ranking);
        assert_eq!(Intent::Draft.chain(), ChainKind::Drafting);
        assert_eq!(Intent::Refine.chain(), ChainKind::Drafting);
    }

    #[test]
    fn test_from_config_skips_providers_without_keys() {
        let config: Config = serde_json::from_str(
            r#"{
                "api_keys": { "groq_api_key": "g", "huggingface_api_key": "h" },
                "fallback_models": { "gemini_fallback": { "enabled": false } }
            }"#,
        )
        .unwrap();
        let gateway = Gateway::from_config(&config, Rc::new(RecordingPacer::default())).unwrap();
        assert_eq!(gateway.ranking.describe(), "groq -> huggingface");
        assert_eq!(gateway.drafting.describe(), "none");
        assert!(gateway.primary_available(ChainKind::Ranking));
        assert!(!gateway.primary_available(ChainKind::Drafting));
    }
}
