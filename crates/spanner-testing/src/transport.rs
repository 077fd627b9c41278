//! Transport factory that hands out a shared [`MockSpanner`].

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use spanner_auth::CredentialsProvider;
use spanner_protocol::{RpcError, SpannerRpc, TransportFactory, TransportOptions};

use crate::mock::MockSpanner;

#[derive(Debug, Default)]
struct FactoryState {
    created: Vec<TransportOptions>,
    authenticated: Vec<bool>,
    failures: VecDeque<RpcError>,
}

/// A [`TransportFactory`] whose transports all talk to one [`MockSpanner`].
#[derive(Debug)]
pub struct MockTransportFactory {
    spanner: Arc<MockSpanner>,
    state: Mutex<FactoryState>,
}

impl MockTransportFactory {
    /// Create a factory serving `spanner`.
    #[must_use]
    pub fn new(spanner: Arc<MockSpanner>) -> Self {
        Self {
            spanner,
            state: Mutex::new(FactoryState::default()),
        }
    }

    /// The service behind every transport.
    #[must_use]
    pub fn spanner(&self) -> &Arc<MockSpanner> {
        &self.spanner
    }

    /// Fail the next transport creation with `error`.
    pub fn fail_next(&self, error: RpcError) {
        self.state.lock().failures.push_back(error);
    }

    /// Number of transports created.
    #[must_use]
    pub fn created(&self) -> usize {
        self.state.lock().created.len()
    }

    /// Options of every transport created, in order.
    #[must_use]
    pub fn created_options(&self) -> Vec<TransportOptions> {
        self.state.lock().created.clone()
    }

    /// Whether each created transport was given a token source.
    #[must_use]
    pub fn authenticated(&self) -> Vec<bool> {
        self.state.lock().authenticated.clone()
    }
}

#[async_trait]
impl TransportFactory for MockTransportFactory {
    async fn create(
        &self,
        options: &TransportOptions,
        credentials: Option<Arc<dyn CredentialsProvider>>,
    ) -> Result<Arc<dyn SpannerRpc>, RpcError> {
        let mut state = self.state.lock();
        if let Some(error) = state.failures.pop_front() {
            return Err(error);
        }
        tracing::debug!(endpoint = %options.endpoint, "mock transport created");
        state.created.push(options.clone());
        state.authenticated.push(credentials.is_some());
        Ok(Arc::clone(&self.spanner) as Arc<dyn SpannerRpc>)
    }
}
