use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use pl_domain::config::BridgeConfig;
use pl_sessions::{
    ConnectionState, DeliveryReceipt, EventSink, HandleSpec, MessageContent, ProviderError,
    SendOptions, SessionHandle, SessionProvider,
};

use crate::process::HelperProcess;
use crate::protocol::BridgeOp;

/// Opens one helper process per session.
pub struct StdioProvider {
    config: BridgeConfig,
}

impl StdioProvider {
    pub fn new(config: BridgeConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl SessionProvider for StdioProvider {
    async fn connect(
        &self,
        spec: HandleSpec,
        events: EventSink,
    ) -> Result<Arc<dyn SessionHandle>, ProviderError> {
        tokio::fs::create_dir_all(&spec.data_dir)
            .await
            .map_err(|e| ProviderError::new(format!("cannot create {}: {e}", spec.data_dir.display())))?;
        let process = HelperProcess::spawn(&self.config, &spec.session_key, &spec.data_dir, events)?;
        Ok(Arc::new(BridgeHandle { process }))
    }
}

struct BridgeHandle {
    process: HelperProcess,
}

#[derive(Deserialize)]
struct ResolveResult {
    canonical: Option<String>,
}

#[derive(Deserialize)]
struct StateResult {
    state: ConnectionState,
}

fn decode<T: serde::de::DeserializeOwned>(op: &str, value: serde_json::Value) -> Result<T, ProviderError> {
    serde_json::from_value(value)
        .map_err(|e| ProviderError::new(format!("malformed {op} result from helper: {e}")))
}

#[async_trait]
impl SessionHandle for BridgeHandle {
    async fn initialize(&self) -> Result<(), ProviderError> {
        self.process.request(BridgeOp::Initialize).await?;
        Ok(())
    }

    async fn send(
        &self,
        target: &str,
        content: &MessageContent,
        options: &SendOptions,
    ) -> Result<DeliveryReceipt, ProviderError> {
        let value = self
            .process
            .request(BridgeOp::send(target, content, options))
            .await?;
        if value.is_null() {
            return Ok(DeliveryReceipt::default());
        }
        decode("send", value)
    }

    async fn resolve_target(&self, address: &str) -> Result<Option<String>, ProviderError> {
        let value = self
            .process
            .request(BridgeOp::ResolveTarget {
                address: address.to_owned(),
            })
            .await?;
        Ok(decode::<ResolveResult>("resolve_target", value)?.canonical)
    }

    async fn connection_state(&self) -> Result<ConnectionState, ProviderError> {
        if !self.process.is_alive() {
            return Ok(ConnectionState::Closed);
        }
        let value = self.process.request(BridgeOp::ConnectionState).await?;
        Ok(decode::<StateResult>("connection_state", value)?.state)
    }

    async fn destroy(&self) -> Result<(), ProviderError> {
        self.process.shutdown().await?;
        Ok(())
    }
}
