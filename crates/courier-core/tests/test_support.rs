//! Shared test support utilities for integration tests

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use courier_core::http::{
    Method, OutboundRequest, RawResponse, StatusCode, TransferObserver, Transport, TransportError,
};
use courier_core::{Endpoint, HttpClient, HttpClientBuilder};
use reqwest::header::HeaderMap;
use url::Url;

/// What the mock transport saw for one call
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<Vec<u8>>,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

type Handler =
    Box<dyn Fn(&RecordedRequest, usize) -> Result<RawResponse, TransportError> + Send + Sync>;

/// Scripted transport recording every request it receives
pub struct MockTransport {
    handler: Handler,
    requests: Mutex<Vec<RecordedRequest>>,
    latency: Option<Duration>,
}

impl MockTransport {
    /// Answer with `handler(request, zero_based_call_index)`
    pub fn new(
        handler: impl Fn(&RecordedRequest, usize) -> Result<RawResponse, TransportError>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        Self {
            handler: Box::new(handler),
            requests: Mutex::new(Vec::new()),
            latency: None,
        }
    }

    /// Answer from `script` in order, repeating the last entry once exhausted
    pub fn sequence(script: Vec<Result<RawResponse, TransportError>>) -> Self {
        let script = Mutex::new(VecDeque::from(script));
        Self::new(move |_, _| {
            let mut script = script.lock().unwrap();
            if script.len() > 1 {
                script.pop_front().unwrap()
            } else {
                script.front().cloned().expect("empty script")
            }
        })
    }

    /// Always answer `status` with `body`
    pub fn always(status: u16, body: &str) -> Self {
        let body = body.to_string();
        Self::new(move |_, _| Ok(response(status, &body)))
    }

    /// Sleep before answering
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(
        &self,
        request: OutboundRequest,
        observer: Option<Arc<dyn TransferObserver>>,
    ) -> Result<RawResponse, TransportError> {
        let recorded = RecordedRequest {
            method: request.method().clone(),
            url: request.url().clone(),
            headers: request.headers().clone(),
            body: request
                .body()
                .and_then(|body| body.as_bytes())
                .map(|bytes| bytes.to_vec()),
        };
        let index = {
            let mut requests = self.requests.lock().unwrap();
            requests.push(recorded.clone());
            requests.len() - 1
        };

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let outcome = (self.handler)(&recorded, index);
        if let (Ok(response), Some(observer)) = (&outcome, &observer) {
            let total = response.body.len() as u64;
            observer.on_progress(total, Some(total));
        }
        outcome
    }
}

/// Build a response with a JSON (or plain) body
pub fn response(status: u16, body: &str) -> RawResponse {
    RawResponse::new(
        StatusCode::from_u16(status).unwrap(),
        HeaderMap::new(),
        body.to_string(),
    )
}

pub fn ok(body: &str) -> Result<RawResponse, TransportError> {
    Ok(response(200, body))
}

pub fn status(code: u16) -> Result<RawResponse, TransportError> {
    Ok(response(code, r#"{"error": {"message": "scripted failure"}}"#))
}

/// Builder pointed at the mock with instant retries
pub fn builder(transport: &Arc<MockTransport>) -> HttpClientBuilder {
    HttpClient::builder("https://api.example.com/v1").shared_transport(transport.clone())
}

pub fn client(transport: &Arc<MockTransport>) -> HttpClient {
    builder(transport).build().unwrap()
}

pub fn json_endpoint(path: &str) -> Endpoint<serde_json::Value> {
    Endpoint::get(path)
}
