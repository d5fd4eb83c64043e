//! The human-in-the-loop answer source.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::Result;

/// One option presented to the human: a short key plus a display label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AskOption {
    pub key: String,
    pub label: String,
}

impl AskOption {
    pub fn new(key: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            label: label.into(),
        }
    }
}

/// The human's answer: a key matching one of the options, or a skip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnswerValue {
    Skipped,
    Key(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Answer {
    pub value: AnswerValue,
}

impl Answer {
    pub fn key(key: impl Into<String>) -> Self {
        Self {
            value: AnswerValue::Key(key.into()),
        }
    }

    pub fn skipped() -> Self {
        Self {
            value: AnswerValue::Skipped,
        }
    }
}

/// The abstract source of human answers at wait-human nodes.
#[async_trait]
pub trait Interviewer: Send + Sync {
    async fn ask(&self, prompt: &str, options: &[AskOption]) -> Result<Answer>;
}

/// Deterministic queue-backed interviewer for tests: consumes a
/// pre-loaded FIFO of answer keys and skips once exhausted.
#[derive(Default)]
pub struct QueueInterviewer {
    answers: Mutex<VecDeque<Answer>>,
}

impl QueueInterviewer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_keys<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let answers = keys.into_iter().map(|key| Answer::key(key)).collect();
        Self {
            answers: Mutex::new(answers),
        }
    }

    pub fn push(&self, answer: Answer) {
        self.answers.lock().unwrap().push_back(answer);
    }

    pub fn remaining(&self) -> usize {
        self.answers.lock().unwrap().len()
    }
}

#[async_trait]
impl Interviewer for QueueInterviewer {
    async fn ask(&self, _prompt: &str, _options: &[AskOption]) -> Result<Answer> {
        Ok(self
            .answers
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(Answer::skipped))
    }
}

/// Always skips; the default for non-interactive runs.
pub struct SkippingInterviewer;

#[async_trait]
impl Interviewer for SkippingInterviewer {
    async fn ask(&self, _prompt: &str, _options: &[AskOption]) -> Result<Answer> {
        Ok(Answer::skipped())
    }
}
