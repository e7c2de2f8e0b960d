//! Token endpoint doubles.

use std::{
    collections::VecDeque,
    sync::{Mutex, MutexGuard, PoisonError},
};

use async_trait::async_trait;
use quickchat_session::{AccessToken, Identity, TokenError, TokenSource};

use crate::SimBackend;

/// Token source that replays a fixed script of responses.
///
/// Every request is recorded. Once the script runs out, requests fail with
/// [`TokenError::Request`].
#[derive(Debug, Default)]
pub struct ScriptedTokenSource {
    inner: Mutex<Scripted>,
}

#[derive(Debug, Default)]
struct Scripted {
    responses: VecDeque<Result<AccessToken, TokenError>>,
    requests: Vec<Identity>,
}

impl ScriptedTokenSource {
    /// Source that answers with `responses` in order.
    pub fn new(responses: impl IntoIterator<Item = Result<AccessToken, TokenError>>) -> Self {
        Self {
            inner: Mutex::new(Scripted {
                responses: responses.into_iter().collect(),
                requests: Vec::new(),
            }),
        }
    }

    fn inner(&self) -> MutexGuard<'_, Scripted> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue another response.
    pub fn push(&self, response: Result<AccessToken, TokenError>) {
        self.inner().responses.push_back(response);
    }

    /// Identities requested so far.
    pub fn requests(&self) -> Vec<Identity> {
        self.inner().requests.clone()
    }
}

#[async_trait]
impl TokenSource for ScriptedTokenSource {
    async fn fetch_token(&self, identity: &Identity) -> Result<AccessToken, TokenError> {
        let mut inner = self.inner();
        inner.requests.push(identity.clone());
        inner
            .responses
            .pop_front()
            .unwrap_or_else(|| Err(TokenError::Request("no scripted response".into())))
    }
}

/// Token source that mints tokens on a [`SimBackend`].
#[derive(Clone)]
pub struct SimTokenSource {
    backend: SimBackend,
}

impl SimTokenSource {
    /// Issue tokens valid on `backend`.
    pub fn new(backend: SimBackend) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl TokenSource for SimTokenSource {
    async fn fetch_token(&self, identity: &Identity) -> Result<AccessToken, TokenError> {
        Ok(self.backend.issue_token(identity.clone()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_responses_then_exhaustion() {
        let source = ScriptedTokenSource::new([Ok(AccessToken::new("tok123"))]);
        let alice = Identity::new("alice");

        assert_eq!(source.fetch_token(&alice).await.unwrap().expose(), "tok123");
        assert!(matches!(source.fetch_token(&alice).await, Err(TokenError::Request(_))));
        assert_eq!(source.requests(), vec![alice.clone(), alice]);
    }

    #[tokio::test]
    async fn sim_tokens_are_distinct() {
        let source = SimTokenSource::new(SimBackend::new());
        let alice = Identity::new("alice");

        let first = source.fetch_token(&alice).await.unwrap();
        let second = source.fetch_token(&alice).await.unwrap();

        assert_ne!(first, second);
    }
}
