//! Test doubles for exercising the client without network calls.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, RwLock};

use crate::error::{Result, TwitterError};
use crate::transport::Transport;
use crate::types::{ApiRequest, RawResponse};

#[derive(Debug, Clone)]
enum Step {
    Respond(RawResponse),
    Timeout,
}

/// Transport that replays a fixed script of responses in order.
///
/// Once the script runs out it answers with the fallback response, or a
/// 200 with an empty JSON object when none is set.
#[derive(Default, Clone)]
pub struct ScriptedTransport {
    script: Arc<RwLock<VecDeque<Step>>>,
    fallback: Option<RawResponse>,
    requests: Arc<RwLock<Vec<ApiRequest>>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response.
    pub fn with_response(self, response: RawResponse) -> Self {
        self.script
            .write()
            .unwrap()
            .push_back(Step::Respond(response));
        self
    }

    /// Queue a 200 whose body is the given JSON value.
    pub fn with_json(self, body: serde_json::Value) -> Self {
        self.with_response(RawResponse::ok(body.to_string()))
    }

    /// Queue a timed-out call.
    pub fn with_timeout(self) -> Self {
        self.script.write().unwrap().push_back(Step::Timeout);
        self
    }

    /// Response used after the script is exhausted.
    pub fn with_fallback(mut self, response: RawResponse) -> Self {
        self.fallback = Some(response);
        self
    }

    /// Every request received so far, in order.
    pub fn requests(&self) -> Vec<ApiRequest> {
        self.requests.read().unwrap().clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: &ApiRequest) -> Result<RawResponse> {
        self.requests.write().unwrap().push(request.clone());

        let step = self.script.write().unwrap().pop_front();
        match step {
            Some(Step::Respond(response)) => Ok(response),
            Some(Step::Timeout) => Err(TwitterError::Timeout {
                endpoint: request.endpoint.clone(),
                timeout_secs: 0,
            }),
            None => Ok(self
                .fallback
                .clone()
                .unwrap_or_else(|| RawResponse::ok("{}"))),
        }
    }
}

/// Build a search page body with `count` tweets starting at id `first_id`.
pub fn search_page_json(first_id: u64, count: usize, next_token: Option<&str>) -> serde_json::Value {
    let data: Vec<serde_json::Value> = (0..count as u64)
        .map(|offset| {
            let id = first_id + offset;
            serde_json::json!({
                "id": id.to_string(),
                "author_id": format!("{}", 1000 + id),
                "text": format!("tweet {}", id),
                "public_metrics": {
                    "retweet_count": 1,
                    "reply_count": 2,
                    "like_count": 3,
                    "quote_count": 4
                }
            })
        })
        .collect();

    let mut meta = serde_json::json!({ "result_count": count });
    if let Some(token) = next_token {
        meta["next_token"] = serde_json::Value::String(token.to_string());
    }

    if count == 0 {
        serde_json::json!({ "meta": meta })
    } else {
        serde_json::json!({ "data": data, "meta": meta })
    }
}
