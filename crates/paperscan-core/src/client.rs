//! LLM client with per-key call budgets.
//!
//! Each key serves at most [`CALL_BUDGET`] successful requests before the
//! client moves on to the next key in the pool, wrapping at the end. The
//! budget check happens before a request, so the first call after a reset
//! always uses key 0. Failed and blocked requests do not consume budget.
//!
//! [`MetadataExtractionClient::extract`] never fails: every problem is logged
//! and turned into [`PaperFields::not_found`].

use thiserror::Error;

use crate::config_file::{ConfigFile, PromptConfig};
use crate::keys::ApiKeyPool;
use crate::model::gemini::{GeminiBinder, GeminiSettings};
use crate::model::{BindError, Generation, GenerativeModel, ModelBinder, RequestError};
use crate::response::{excerpt, fields_from_response};
use crate::{ConfigError, PaperFields};

/// Successful requests allowed per key before rotating.
pub const CALL_BUDGET: u32 = 3;

/// Input text is cut to this many characters before it is sent.
pub const MAX_INPUT_CHARS: usize = 15_000;

const USER_PROMPT_PREFIX: &str = "Paper text:\n";

/// Which key is active and how much of its budget is spent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RotationState {
    pub current_index: usize,
    pub calls_since_rotation: u32,
}

impl RotationState {
    fn budget_exhausted(&self) -> bool {
        self.calls_since_rotation >= CALL_BUDGET
    }

    fn advance(&mut self, pool_size: usize) {
        self.current_index = (self.current_index + 1) % pool_size;
        self.calls_since_rotation = 0;
    }
}

#[derive(Error, Debug)]
pub enum ClientError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to initialize {provider} model: {source}")]
    Init { provider: String, source: BindError },
}

/// Reasons a single extraction fell back to the empty-sentinel record.
#[derive(Error, Debug)]
enum ExtractError {
    #[error("could not bind API key #{index}: {source}")]
    Rebind { index: usize, source: BindError },
    #[error("no model bound")]
    Unbound,
    #[error("input text is empty")]
    EmptyInput,
    #[error("request blocked by provider: {0}")]
    Blocked(String),
    #[error(transparent)]
    Request(#[from] RequestError),
}

pub struct MetadataExtractionClient {
    keys: ApiKeyPool,
    binder: Box<dyn ModelBinder>,
    model: Option<Box<dyn GenerativeModel>>,
    rotation: RotationState,
}

impl std::fmt::Debug for MetadataExtractionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataExtractionClient")
            .field("keys", &self.keys)
            .field("binder", &self.binder.name())
            .field("model", &self.model.as_ref().map(|_| "<bound>"))
            .field("rotation", &self.rotation)
            .finish()
    }
}

impl MetadataExtractionClient {
    /// Bind the first key through `binder`. Fails if that binding fails.
    pub fn new(keys: ApiKeyPool, binder: Box<dyn ModelBinder>) -> Result<Self, ClientError> {
        let model = binder.bind(keys.get(0)).map_err(|source| ClientError::Init {
            provider: binder.name().to_string(),
            source,
        })?;
        tracing::info!(
            provider = binder.name(),
            keys = keys.len(),
            "model initialized"
        );
        Ok(Self {
            keys,
            binder,
            model: Some(model),
            rotation: RotationState::default(),
        })
    }

    /// Build a Gemini-backed client from `config`, reading keys from the
    /// environment under the configured prefix.
    pub fn gemini(config: &ConfigFile) -> Result<Self, ClientError> {
        let keys = ApiKeyPool::from_env(&config.key_prefix())?;
        let prompt = PromptConfig::from_config(config);
        let binder = GeminiBinder::new(GeminiSettings {
            model: config.model_name(),
            endpoint: config.endpoint(),
            system_instruction: prompt.system_prompt,
            timeout: config.timeout(),
        })
        .map_err(|source| ClientError::Init {
            provider: "Gemini".to_string(),
            source,
        })?;
        Self::new(keys, Box::new(binder))
    }

    pub fn rotation(&self) -> RotationState {
        self.rotation
    }

    pub fn is_bound(&self) -> bool {
        self.model.is_some()
    }

    pub fn pool_size(&self) -> usize {
        self.keys.len()
    }

    /// Start a fresh budget on key 0. Called at the start of every processing unit.
    pub fn reset_rotation(&mut self) {
        self.rotation = RotationState::default();
        if let Err(e) = self.rebind() {
            tracing::error!(key_index = 0, error = %e, "failed to rebind first API key");
        }
    }

    /// Extract metadata from first-page `text`.
    pub async fn extract(&mut self, text: &str) -> PaperFields {
        match self.try_extract(text).await {
            Ok(fields) => fields,
            Err(ExtractError::EmptyInput) => {
                tracing::warn!("empty input text, skipping model request");
                PaperFields::not_found()
            }
            Err(ExtractError::Blocked(reason)) => {
                tracing::warn!(
                    key_index = self.rotation.current_index,
                    reason = %reason,
                    "request blocked by provider"
                );
                PaperFields::not_found()
            }
            Err(e) => {
                tracing::error!(
                    key_index = self.rotation.current_index,
                    error = %e,
                    "metadata extraction failed"
                );
                PaperFields::not_found()
            }
        }
    }

    async fn try_extract(&mut self, text: &str) -> Result<PaperFields, ExtractError> {
        if self.rotation.budget_exhausted() {
            self.rotate()?;
        }
        let model = self.model.as_ref().ok_or(ExtractError::Unbound)?;

        if text.trim().is_empty() {
            return Err(ExtractError::EmptyInput);
        }

        let prompt = format!("{USER_PROMPT_PREFIX}{}", excerpt(text, MAX_INPUT_CHARS));
        match model.generate(&prompt).await? {
            Generation::Blocked { reason } => Err(ExtractError::Blocked(reason)),
            Generation::Text(body) => {
                self.rotation.calls_since_rotation += 1;
                tracing::debug!(
                    key_index = self.rotation.current_index,
                    calls = self.rotation.calls_since_rotation,
                    "model request succeeded"
                );
                Ok(fields_from_response(&body))
            }
        }
    }

    /// Move to the next key. On a failed bind the budget stays spent, so the
    /// following call rotates again instead of stalling on the bad key.
    fn rotate(&mut self) -> Result<(), ExtractError> {
        self.rotation.advance(self.keys.len());
        let index = self.rotation.current_index;
        tracing::info!(key_index = index, "rotating to next API key");
        self.rebind().map_err(|source| {
            self.rotation.calls_since_rotation = CALL_BUDGET;
            ExtractError::Rebind { index, source }
        })
    }

    fn rebind(&mut self) -> Result<(), BindError> {
        match self.binder.bind(self.keys.get(self.rotation.current_index)) {
            Ok(model) => {
                self.model = Some(model);
                Ok(())
            }
            Err(e) => {
                self.model = None;
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NOT_FOUND;
    use crate::model::mock::{MockBinder, MockReply};

    const PAPER_JSON: &str = r#"{"author":"A. Smith","year":2020,"title":"On Keys","abstract":"We rotate."}"#;

    fn pool(keys: &[&str]) -> ApiKeyPool {
        ApiKeyPool::new(keys.iter().map(|k| k.to_string()).collect(), "TEST_KEY").unwrap()
    }

    fn client(keys: &[&str], binder: &MockBinder) -> MetadataExtractionClient {
        MetadataExtractionClient::new(pool(keys), Box::new(binder.clone())).unwrap()
    }

    #[tokio::test]
    async fn rotates_every_third_call_and_wraps() {
        let binder = MockBinder::new(MockReply::Text(PAPER_JSON.into()));
        let mut c = client(&["k0", "k1"], &binder);

        for _ in 0..7 {
            let fields = c.extract("some first page text").await;
            assert_eq!(fields.author, "A. Smith");
        }
        assert_eq!(
            binder.calls(),
            vec!["k0", "k0", "k0", "k1", "k1", "k1", "k0"]
        );
        assert_eq!(
            c.rotation(),
            RotationState {
                current_index: 0,
                calls_since_rotation: 1
            }
        );
    }

    #[tokio::test]
    async fn fewer_calls_than_budget_never_rotate() {
        let binder = MockBinder::new(MockReply::Text(PAPER_JSON.into()));
        let mut c = client(&["k0", "k1"], &binder);
        c.extract("a").await;
        c.extract("b").await;
        assert_eq!(binder.calls(), vec!["k0", "k0"]);
        assert_eq!(c.rotation().current_index, 0);
    }

    #[tokio::test]
    async fn reset_restores_first_key_and_zero_count() {
        let binder = MockBinder::new(MockReply::Text(PAPER_JSON.into()));
        let mut c = client(&["k0", "k1", "k2"], &binder);
        for _ in 0..5 {
            c.extract("text").await;
        }
        assert_eq!(c.rotation().current_index, 1);

        c.reset_rotation();
        assert_eq!(c.rotation(), RotationState::default());
        assert!(c.is_bound());

        c.extract("text").await;
        assert_eq!(binder.calls().last().unwrap(), "k0");
    }

    #[tokio::test]
    async fn empty_text_makes_no_request() {
        let binder = MockBinder::new(MockReply::Text(PAPER_JSON.into()));
        let mut c = client(&["k0"], &binder);
        assert_eq!(c.extract("").await, PaperFields::not_found());
        assert_eq!(c.extract("  \n\t ").await, PaperFields::not_found());
        assert_eq!(binder.call_count(), 0);
        assert_eq!(c.rotation().calls_since_rotation, 0);
    }

    #[tokio::test]
    async fn blocked_and_failed_requests_do_not_consume_budget() {
        let binder = MockBinder::with_sequence(vec![
            MockReply::Blocked("SAFETY".into()),
            MockReply::Error("connection reset".into()),
            MockReply::Text(PAPER_JSON.into()),
        ]);
        let mut c = client(&["k0", "k1"], &binder);

        assert_eq!(c.extract("t").await, PaperFields::not_found());
        assert_eq!(c.extract("t").await, PaperFields::not_found());
        assert_eq!(c.rotation().calls_since_rotation, 0);

        let fields = c.extract("t").await;
        assert_eq!(fields.title, "On Keys");
        assert_eq!(c.rotation().calls_since_rotation, 1);
        assert_eq!(binder.calls(), vec!["k0", "k0", "k0"]);
    }

    #[tokio::test]
    async fn unparsable_body_still_counts_as_a_call() {
        let binder = MockBinder::new(MockReply::Text("not a json".into()));
        let mut c = client(&["k0", "k1"], &binder);
        for _ in 0..4 {
            let fields = c.extract("t").await;
            assert_eq!(fields.author, NOT_FOUND);
        }
        assert_eq!(binder.calls(), vec!["k0", "k0", "k0", "k1"]);
    }

    #[tokio::test]
    async fn input_is_truncated() {
        let binder = MockBinder::new(MockReply::Text(PAPER_JSON.into()));
        let mut c = client(&["k0"], &binder);
        let text = "é".repeat(MAX_INPUT_CHARS + 500);
        c.extract(&text).await;

        let prompt = &binder.prompts()[0];
        let body = prompt.strip_prefix(USER_PROMPT_PREFIX).unwrap();
        assert_eq!(body.chars().count(), MAX_INPUT_CHARS);
    }

    #[tokio::test]
    async fn failed_rebind_returns_sentinel_then_skips_key() {
        let binder = MockBinder::new(MockReply::Text(PAPER_JSON.into())).failing_key("bad");
        let mut c = client(&["k0", "bad", "k2"], &binder);
        for _ in 0..3 {
            c.extract("t").await;
        }

        // Budget spent: rotation to "bad" fails, no request is made.
        assert_eq!(c.extract("t").await, PaperFields::not_found());
        assert!(!c.is_bound());
        assert_eq!(binder.call_count(), 3);

        assert_eq!(
            c.rotation(),
            RotationState {
                current_index: 1,
                calls_since_rotation: CALL_BUDGET
            }
        );

        // Next call moves past the broken key.
        assert_eq!(c.extract("t").await.author, "A. Smith");
        assert_eq!(binder.calls(), vec!["k0", "k0", "k0", "k2"]);
        assert_eq!(binder.binds(), vec!["k0", "bad", "k2"]);
    }

    #[tokio::test]
    async fn failed_reset_stays_on_first_key_and_makes_no_request() {
        let binder = MockBinder::new(MockReply::Text(PAPER_JSON.into()));
        let mut c = client(&["k0", "k1"], &binder);
        let _ = binder.clone().failing_key("k0");

        c.reset_rotation();
        assert!(!c.is_bound());

        for _ in 0..2 {
            assert_eq!(c.extract("some first page text").await, PaperFields::not_found());
        }
        assert_eq!(binder.call_count(), 0);
        assert_eq!(c.rotation(), RotationState::default());
        assert_eq!(binder.binds(), vec!["k0", "k0"]);
    }

    #[test]
    fn construction_fails_when_first_key_cannot_bind() {
        let binder = MockBinder::new(MockReply::Text(PAPER_JSON.into())).failing_key("k0");
        let err = MetadataExtractionClient::new(pool(&["k0", "k1"]), Box::new(binder)).unwrap_err();
        assert!(matches!(err, ClientError::Init { .. }));
    }

    #[test]
    fn debug_hides_keys() {
        let binder = MockBinder::new(MockReply::Text(PAPER_JSON.into()));
        let c = client(&["super-secret"], &binder);
        assert!(!format!("{:?}", c).contains("super-secret"));
    }
}
