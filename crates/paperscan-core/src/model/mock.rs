//! Mock model binder for testing.

use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use super::{BindError, Generation, GenerativeModel, ModelBinder, RequestError};

/// A scripted reply for [`MockBinder`].
#[derive(Clone, Debug)]
pub enum MockReply {
    /// Successful request returning this body.
    Text(String),
    /// Request blocked by the provider.
    Blocked(String),
    /// Transport or provider failure.
    Error(String),
}

#[derive(Default)]
struct MockState {
    /// Pending replies, stored reversed so `pop()` yields the next one.
    replies: Mutex<Vec<MockReply>>,
    fallback: Option<MockReply>,
    failing_keys: Mutex<HashSet<String>>,
    binds: Mutex<Vec<String>>,
    calls: Mutex<Vec<String>>,
    prompts: Mutex<Vec<String>>,
}

/// A hand-rolled mock implementing [`ModelBinder`] for tests.
///
/// Clones share state, so a test can keep one handle while the client owns
/// another. Every bound model records which key served each request.
#[derive(Clone)]
pub struct MockBinder {
    state: Arc<MockState>,
}

impl MockBinder {
    /// Every request returns `reply`.
    pub fn new(reply: MockReply) -> Self {
        Self {
            state: Arc::new(MockState {
                fallback: Some(reply),
                ..MockState::default()
            }),
        }
    }

    /// Requests return `replies` in order, repeating the last one when exhausted.
    pub fn with_sequence(mut replies: Vec<MockReply>) -> Self {
        let fallback = replies.last().cloned();
        replies.reverse();
        Self {
            state: Arc::new(MockState {
                replies: Mutex::new(replies),
                fallback,
                ..MockState::default()
            }),
        }
    }

    /// Binding `key` fails with [`BindError::Rejected`].
    pub fn failing_key(self, key: &str) -> Self {
        self.state
            .failing_keys
            .lock()
            .unwrap()
            .insert(key.to_string());
        self
    }

    /// Keys passed to `bind()`, successful or not.
    pub fn binds(&self) -> Vec<String> {
        self.state.binds.lock().unwrap().clone()
    }

    /// Key used by each `generate()` call, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.state.calls.lock().unwrap().clone()
    }

    /// User text sent by each `generate()` call.
    pub fn prompts(&self) -> Vec<String> {
        self.state.prompts.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.state.calls.lock().unwrap().len()
    }

    fn next_reply(&self) -> MockReply {
        let mut seq = self.state.replies.lock().unwrap();
        seq.pop()
            .or_else(|| self.state.fallback.clone())
            .unwrap_or_else(|| MockReply::Text("{}".into()))
    }
}

impl ModelBinder for MockBinder {
    fn name(&self) -> &str {
        "Mock"
    }

    fn bind(&self, api_key: &str) -> Result<Box<dyn GenerativeModel>, BindError> {
        self.state.binds.lock().unwrap().push(api_key.to_string());
        if self.state.failing_keys.lock().unwrap().contains(api_key) {
            return Err(BindError::Rejected(format!("key {api_key} rejected")));
        }
        Ok(Box::new(MockModel {
            key: api_key.to_string(),
            binder: self.clone(),
        }))
    }
}

struct MockModel {
    key: String,
    binder: MockBinder,
}

impl GenerativeModel for MockModel {
    fn generate<'a>(
        &'a self,
        user_text: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Generation, RequestError>> + Send + 'a>> {
        self.binder.state.calls.lock().unwrap().push(self.key.clone());
        self.binder
            .state
            .prompts
            .lock()
            .unwrap()
            .push(user_text.to_string());
        let reply = self.binder.next_reply();

        Box::pin(async move {
            match reply {
                MockReply::Text(body) => Ok(Generation::Text(body)),
                MockReply::Blocked(reason) => Ok(Generation::Blocked { reason }),
                MockReply::Error(msg) => Err(RequestError::Other(msg)),
            }
        })
    }
}
