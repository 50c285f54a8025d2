//! Test doubles shared by the unit tests.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::api::{ApiError, ApiRequest, Envelope, Transport};

type Responder = Arc<dyn Fn(&ApiRequest) -> (Duration, Result<Envelope, ApiError>) + Send + Sync>;

/// Transport answering from canned responses and recording every request.
/// Unknown endpoints answer 404.
#[derive(Default)]
pub(crate) struct FakeTransport {
    responders: Mutex<HashMap<String, Responder>>,
    requests: Mutex<Vec<ApiRequest>>,
}

impl FakeTransport {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn respond(&self, endpoint: &str, envelope: Envelope) {
        self.respond_with(endpoint, move |_| (Duration::ZERO, Ok(envelope.clone())));
    }

    pub(crate) fn fail(&self, endpoint: &str, message: &str) {
        let message = message.to_string();
        self.respond_with(endpoint, move |_| {
            (Duration::ZERO, Err(ApiError::ServerError(message.clone())))
        });
    }

    pub(crate) fn respond_with<F>(&self, endpoint: &str, responder: F)
    where
        F: Fn(&ApiRequest) -> (Duration, Result<Envelope, ApiError>) + Send + Sync + 'static,
    {
        self.responders
            .lock()
            .insert(endpoint.to_string(), Arc::new(responder));
    }

    pub(crate) fn requests(&self) -> Vec<ApiRequest> {
        self.requests.lock().clone()
    }

    pub(crate) fn calls(&self, endpoint: &str) -> usize {
        self.requests
            .lock()
            .iter()
            .filter(|r| r.endpoint == endpoint)
            .count()
    }

    pub(crate) fn total_calls(&self) -> usize {
        self.requests.lock().len()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn request(&self, request: &ApiRequest) -> Result<Envelope, ApiError> {
        self.requests.lock().push(request.clone());
        let responder = self.responders.lock().get(&request.endpoint).cloned();
        let Some(responder) = responder else {
            return Err(ApiError::NotFound(request.endpoint.clone()));
        };
        let (delay, result) = responder(request);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        result
    }
}
