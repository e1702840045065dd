// src/notify/send_api.rs
// Managed send-API transport: one JSON POST per digest, bearer-token auth,
// transient HTTP failures retried with the shared policy.

use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::Client;
use serde::Serialize;

use super::{Digest, DigestTransport};
use crate::retry::{check_status, RetryError, RetryPolicy};

/// Cap on a single POST so a stalled connection cannot outlive the retry
/// policy's attempt count.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub struct SendApiTransport {
    endpoint: String,
    token: Option<String>,
    client: Client,
    retry: RetryPolicy,
}

#[derive(Serialize)]
struct SendRequest<'a> {
    from: &'a str,
    to: &'a [String],
    #[serde(skip_serializing_if = "<[_]>::is_empty")]
    reply_to: &'a [String],
    subject: &'a str,
    text: &'a str,
}

impl SendApiTransport {
    pub fn new(endpoint: String, token: Option<String>, retry: RetryPolicy) -> Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("building send api client")?;
        Ok(Self {
            endpoint,
            token,
            client,
            retry,
        })
    }
}

#[async_trait::async_trait]
impl DigestTransport for SendApiTransport {
    async fn send(&self, digest: &Digest) -> anyhow::Result<()> {
        let payload = SendRequest {
            from: &digest.sender,
            to: &digest.recipients,
            reply_to: &digest.reply_to,
            subject: &digest.subject,
            text: &digest.body,
        };

        self.retry
            .run("send api", || async {
                let mut req = self.client.post(&self.endpoint).json(&payload);
                if let Some(token) = &self.token {
                    req = req.bearer_auth(token);
                }
                let resp = req.send().await.map_err(RetryError::transient)?;
                check_status(resp)?;
                Ok(())
            })
            .await
            .context("send api dispatch")?;

        tracing::info!(
            transport = self.name(),
            recipients = digest.recipients.len(),
            "digest dispatched"
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "send-api"
    }
}
