//! REST implementation of [`AssociationNotifier`].
//!
//! Every call is a single JSON `POST` carrying the shared secret.  Calls are
//! never retried: the session manager treats notifications as
//! fire-and-forget, so a lost call is logged and dropped.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use pl_domain::config::NotifierConfig;
use pl_domain::error::{Error, Result};
use pl_domain::notify::{Association, AssociationNotifier, ConnectedNotice};
use pl_domain::trace::TraceEvent;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Client
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone)]
pub struct HttpNotifier {
    http: Client,
    base_url: String,
    secret: Option<String>,
    associate_path: String,
    connected_path: String,
    timeout: Duration,
}

/// Request body: the payload fields plus the shared secret.
#[derive(Serialize)]
struct Signed<'a, T: Serialize> {
    #[serde(flatten)]
    payload: &'a T,
    #[serde(skip_serializing_if = "Option::is_none")]
    secret: Option<&'a str>,
}

/// The parts of the service's reply we look at.  Anything else is ignored.
#[derive(Debug, Default, Deserialize)]
struct Reply {
    #[serde(default)]
    success: Option<bool>,
    #[serde(default, alias = "error")]
    message: Option<String>,
}

impl HttpNotifier {
    /// Build a notifier from config, reading the secret from
    /// `cfg.secret_env`.  A missing secret is allowed; the field is omitted.
    pub fn new(cfg: &NotifierConfig) -> Result<Self> {
        let secret = std::env::var(&cfg.secret_env).ok().filter(|s| !s.is_empty());
        if secret.is_none() {
            tracing::warn!(env = %cfg.secret_env, "notifier secret not set; calls will be unsigned");
        }
        Self::with_secret(cfg, secret)
    }

    pub fn with_secret(cfg: &NotifierConfig, secret: Option<String>) -> Result<Self> {
        let timeout = Duration::from_millis(cfg.timeout_ms);
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;

        Ok(Self {
            http,
            base_url: cfg.base_url.trim_end_matches('/').to_owned(),
            secret,
            associate_path: cfg.associate_path.clone(),
            connected_path: cfg.connected_path.clone(),
            timeout,
        })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    async fn post<T: Serialize>(&self, path: &str, session_key: &str, payload: &T) -> Result<()> {
        let url = self.url(path);
        let endpoint = format!("POST {path}");
        let body = Signed {
            payload,
            secret: self.secret.as_deref(),
        };

        let start = Instant::now();
        let result = self
            .http
            .post(&url)
            .header("X-Client-Type", "pairlink")
            .header("X-Trace-Id", Uuid::new_v4().to_string())
            .json(&body)
            .send()
            .await;
        let duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

        let resp = match result {
            Ok(resp) => resp,
            Err(e) => {
                TraceEvent::NotificationSent {
                    endpoint: endpoint.clone(),
                    session_key: session_key.to_owned(),
                    status: e.status().map(|s| s.as_u16()).unwrap_or(0),
                    duration_ms,
                }
                .emit();
                return Err(from_reqwest(e));
            }
        };

        let status = resp.status();
        TraceEvent::NotificationSent {
            endpoint: endpoint.clone(),
            session_key: session_key.to_owned(),
            status: status.as_u16(),
            duration_ms,
        }
        .emit();

        let text = resp.text().await.map_err(from_reqwest)?;
        if !status.is_success() {
            return Err(Error::Rejected {
                endpoint,
                message: format!("{status}: {text}"),
            });
        }

        // Non-JSON or empty bodies count as success; only an explicit
        // `"success": false` is a rejection.
        let reply: Reply = serde_json::from_str(&text).unwrap_or_default();
        if reply.success == Some(false) {
            return Err(Error::Rejected {
                endpoint,
                message: reply.message.unwrap_or_else(|| "success=false".into()),
            });
        }

        tracing::debug!(session_key = %session_key, endpoint = %endpoint, "notification accepted");
        Ok(())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait]
impl AssociationNotifier for HttpNotifier {
    async fn associate(&self, association: &Association) -> Result<()> {
        self.post(&self.associate_path, &association.session_key, association)
            .await
    }

    async fn session_connected(&self, notice: &ConnectedNotice) -> Result<()> {
        self.post(&self.connected_path, &notice.session_key, notice)
            .await
    }
}

fn from_reqwest(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout(e.to_string())
    } else {
        Error::Http(e.to_string())
    }
}
