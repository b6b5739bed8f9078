//! Inline provider: dynamic configuration embedded in the static file.

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::config::dynamic::Configuration;
use crate::provider::{
    ConfigurationFragment, FragmentSender, Provider, ProviderError, ProviderMessage,
};

pub const INLINE_PROVIDER: &str = "inline";

/// Emits a fixed configuration once and withdraws it on shutdown.
pub struct InlineProvider {
    configuration: Configuration,
}

impl InlineProvider {
    pub fn new(configuration: Configuration) -> Self {
        Self { configuration }
    }
}

#[async_trait]
impl Provider for InlineProvider {
    fn name(&self) -> &str {
        INLINE_PROVIDER
    }

    async fn provide(
        self: Box<Self>,
        tx: FragmentSender,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), ProviderError> {
        let fragment = ConfigurationFragment::new(INLINE_PROVIDER, self.configuration)?;
        tx.send(ProviderMessage::Fragment(fragment))
            .map_err(|_| ProviderError::ChannelClosed)?;

        let _ = shutdown.recv().await;
        let _ = tx.send(ProviderMessage::Withdrawn {
            provider: INLINE_PROVIDER.to_string(),
        });
        Ok(())
    }
}
