//! Programmatic provider handle.

use crate::config::dynamic::Configuration;
use crate::provider::{ConfigurationFragment, FragmentSender, ProviderError, ProviderMessage};

/// Lets embedding code act as a provider: push complete configurations and
/// withdraw them. Cloning the handle shares the same provider identity.
#[derive(Debug, Clone)]
pub struct ProviderHandle {
    name: String,
    tx: FragmentSender,
}

impl ProviderHandle {
    pub fn new(name: impl Into<String>, tx: FragmentSender) -> Self {
        Self {
            name: name.into(),
            tx,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Replace this provider's configuration.
    pub fn publish(&self, configuration: Configuration) -> Result<(), ProviderError> {
        let fragment = ConfigurationFragment::new(self.name.clone(), configuration)?;
        self.tx
            .send(ProviderMessage::Fragment(fragment))
            .map_err(|_| ProviderError::ChannelClosed)
    }

    /// Remove this provider's configuration.
    pub fn withdraw(&self) -> Result<(), ProviderError> {
        self.tx
            .send(ProviderMessage::Withdrawn {
                provider: self.name.clone(),
            })
            .map_err(|_| ProviderError::ChannelClosed)
    }
}
