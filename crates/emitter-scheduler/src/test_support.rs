//! Hand-written collaborator fakes for unit tests.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use emitter_core::error::{EmitterError, Result};
use emitter_core::traits::{ArtifactRenderer, Channel, RecipientSource};
use emitter_core::types::{Artifact, OutgoingContent, Recipient, SendOutcome};

/// Channel that replays scripted outcomes and records every call.
pub struct ScriptedChannel {
    script: Mutex<VecDeque<SendOutcome>>,
    fallback: SendOutcome,
    per_recipient: HashMap<String, SendOutcome>,
    hang: bool,
    calls: Mutex<Vec<(String, OutgoingContent)>>,
}

impl ScriptedChannel {
    fn build(script: Vec<SendOutcome>, fallback: SendOutcome) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback,
            per_recipient: HashMap::new(),
            hang: false,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Same outcome forever.
    pub fn always(outcome: SendOutcome) -> Self {
        Self::build(Vec::new(), outcome)
    }

    /// Outcomes in order, then plain success.
    pub fn script(outcomes: Vec<SendOutcome>) -> Self {
        Self::build(outcomes, SendOutcome::Delivered { handle: None })
    }

    /// Never answers.
    pub fn hanging() -> Self {
        let mut channel = Self::always(SendOutcome::Delivered { handle: None });
        channel.hang = true;
        channel
    }

    /// Fixed outcome for one recipient, overriding the script.
    pub fn with_recipient(mut self, recipient: &str, outcome: SendOutcome) -> Self {
        self.per_recipient.insert(recipient.to_string(), outcome);
        self
    }

    pub fn calls(&self) -> Vec<(String, OutgoingContent)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, recipient: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|(r, _)| r == recipient).count()
    }
}

#[async_trait]
impl Channel for ScriptedChannel {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn send(&self, recipient: &str, content: &OutgoingContent) -> SendOutcome {
        self.calls
            .lock()
            .unwrap()
            .push((recipient.to_string(), content.clone()));
        if self.hang {
            std::future::pending::<()>().await;
        }
        if let Some(outcome) = self.per_recipient.get(recipient) {
            return outcome.clone();
        }
        let next = self.script.lock().unwrap().pop_front();
        next.unwrap_or_else(|| self.fallback.clone())
    }
}

/// Fixed recipient list.
pub struct StaticRecipients {
    recipients: Mutex<Vec<Recipient>>,
    pub queries: AtomicUsize,
}

impl StaticRecipients {
    pub fn new(recipients: Vec<Recipient>) -> Self {
        Self {
            recipients: Mutex::new(recipients),
            queries: AtomicUsize::new(0),
        }
    }

    pub fn ids(ids: &[&str]) -> Self {
        Self::new(ids.iter().map(|id| Recipient::new(*id, 0.0)).collect())
    }

    pub fn set(&self, recipients: Vec<Recipient>) {
        *self.recipients.lock().unwrap() = recipients;
    }
}

#[async_trait]
impl RecipientSource for StaticRecipients {
    async fn eligible_recipients(&self) -> Result<Vec<Recipient>> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        Ok(self.recipients.lock().unwrap().clone())
    }
}

/// Renderer returning fixed bytes, or failing on demand.
pub struct FakeRenderer {
    fail: bool,
    pub renders: AtomicUsize,
}

impl FakeRenderer {
    pub fn ok() -> Self {
        Self {
            fail: false,
            renders: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            renders: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ArtifactRenderer for FakeRenderer {
    async fn render(&self) -> Result<Artifact> {
        self.renders.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(EmitterError::Render("template missing".into()));
        }
        Ok(Artifact::new(vec![0x89, b'P', b'N', b'G'], "chart.png").with_caption("Daily chart"))
    }
}
