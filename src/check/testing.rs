//! Test doubles shared by check and lifecycle tests.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{HttpResponse, HttpTransport};
use crate::error::{AppError, Result};
use crate::instance::Credentials;

/// Replays canned responses and records who asked for what.
#[derive(Default)]
pub struct ScriptedTransport {
    pub responses: Mutex<VecDeque<Result<HttpResponse>>>,
    pub calls: Mutex<Vec<(String, Credentials)>>,
    /// Returned once the script is exhausted; `None` means connection refused.
    pub fallback: Option<u16>,
}

impl ScriptedTransport {
    pub fn with_statuses(statuses: &[u16]) -> Self {
        let responses = statuses
            .iter()
            .map(|&status| {
                Ok(HttpResponse {
                    status,
                    body: String::new(),
                })
            })
            .collect();
        Self {
            responses: Mutex::new(responses),
            ..Self::default()
        }
    }

    pub fn passwords(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(_, c)| c.password.clone())
            .collect()
    }
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn get(&self, url: &str, credentials: &Credentials) -> Result<HttpResponse> {
        self.calls
            .lock()
            .unwrap()
            .push((url.to_string(), credentials.clone()));
        let next = self.responses.lock().unwrap().pop_front();
        match (next, self.fallback) {
            (Some(response), _) => response,
            (None, Some(status)) => Ok(HttpResponse {
                status,
                body: "[nt:base]".to_string(),
            }),
            (None, None) => Err(AppError::network_with_url(url, "connection refused")),
        }
    }
}
