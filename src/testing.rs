//! Scripted providers and a recording pacer for pipeline tests.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

use crate::ai::{AIProvider, ProviderError};
use crate::gateway::{Gateway, ModelRequest, Pacer, ProviderChain};
use crate::models::JobRecord;

type Responder = Box<dyn Fn(usize, &ModelRequest) -> Result<String, ProviderError>>;

/// Answers each call with `responder(call_index, request)`.
pub struct ScriptedProvider {
    name: String,
    responder: Responder,
    calls: Rc<Cell<usize>>,
}

impl ScriptedProvider {
    pub fn new(
        name: &str,
        responder: impl Fn(usize, &ModelRequest) -> Result<String, ProviderError> + 'static,
    ) -> (Box<dyn AIProvider>, Rc<Cell<usize>>) {
        let calls = Rc::new(Cell::new(0));
        let provider = Self {
            name: name.to_string(),
            responder: Box::new(responder),
            calls: Rc::clone(&calls),
        };
        (Box::new(provider), calls)
    }
}

impl AIProvider for ScriptedProvider {
    fn complete(&self, request: &ModelRequest) -> Result<String, ProviderError> {
        let index = self.calls.get();
        self.calls.set(index + 1);
        (self.responder)(index, request)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[derive(Default)]
pub struct RecordingPacer {
    pauses: RefCell<Vec<Duration>>,
}

impl RecordingPacer {
    pub fn pauses(&self) -> Vec<Duration> {
        self.pauses.borrow().clone()
    }
}

impl Pacer for RecordingPacer {
    fn pause(&self, duration: Duration) {
        self.pauses.borrow_mut().push(duration);
    }
}

pub fn gateway_with(ranking: ProviderChain, drafting: ProviderChain, pacer: &Rc<RecordingPacer>) -> Gateway {
    let pacer: Rc<dyn Pacer> = Rc::clone(pacer) as Rc<dyn Pacer>;
    Gateway::new(ranking, drafting, pacer)
}

pub fn rate_limited(provider: &str) -> ProviderError {
    ProviderError::RateLimited {
        provider: provider.to_string(),
        message: "Rate limit reached".to_string(),
    }
}

pub fn timed_out(provider: &str) -> ProviderError {
    ProviderError::Transport {
        provider: provider.to_string(),
        message: "operation timed out".to_string(),
    }
}

pub fn quota_exceeded(provider: &str) -> ProviderError {
    ProviderError::QuotaExceeded {
        provider: provider.to_string(),
        message: "insufficient_quota".to_string(),
    }
}

pub fn job(title: &str, company: &str, link: &str) -> JobRecord {
    JobRecord {
        title: title.to_string(),
        company: company.to_string(),
        link: link.to_string(),
        location: "London, UK".to_string(),
        description: format!("{title} role at {company}"),
        ..Default::default()
    }
}
