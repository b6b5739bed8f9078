//! Configuration providers and the fragment channel.
//!
//! # Data Flow
//! ```text
//! file.rs / inline.rs / ProviderHandle (one task each)
//!     → ConfigurationFragment (names qualified with "@provider")
//!     → FragmentSender (unbounded, many producers)
//!     → Aggregator (single consumer)
//!
//! On shutdown or source loss:
//!     → ProviderMessage::Withdrawn { provider }
//! ```
//!
//! # Design Decisions
//! - A fragment is a provider's complete view, never a delta
//! - Names are qualified when the fragment is built, so the aggregator
//!   never has to guess which provider a bare name belongs to
//! - Names that already contain `@` are explicit cross-provider references

pub mod file;
pub mod handle;
pub mod inline;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::config::dynamic::{Configuration, ServiceSpec};
use crate::config::loader::ConfigError;

pub use file::FileProvider;
pub use handle::ProviderHandle;
pub use inline::InlineProvider;

/// Separator between an entity name and its provider.
pub const PROVIDER_SEPARATOR: char = '@';

/// Qualify `name` with `provider` unless it is already qualified.
pub fn qualify(name: &str, provider: &str) -> String {
    if name.contains(PROVIDER_SEPARATOR) {
        name.to_string()
    } else {
        format!("{}{}{}", name, PROVIDER_SEPARATOR, provider)
    }
}

/// Error type for providers.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("invalid provider name {0:?}")]
    InvalidName(String),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("watch error: {0}")]
    Watch(#[from] notify::Error),

    #[error("fragment channel closed")]
    ChannelClosed,
}

/// One provider's complete, qualified view of its configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigurationFragment {
    provider: String,
    configuration: Configuration,
}

impl ConfigurationFragment {
    /// Build a fragment, qualifying every name and reference with `provider`.
    pub fn new(provider: impl Into<String>, raw: Configuration) -> Result<Self, ProviderError> {
        let provider = provider.into();
        if provider.is_empty() || provider.contains(PROVIDER_SEPARATOR) {
            return Err(ProviderError::InvalidName(provider));
        }
        let configuration = qualify_configuration(raw, &provider);
        Ok(Self {
            provider,
            configuration,
        })
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn configuration(&self) -> &Configuration {
        &self.configuration
    }
}

/// Message on the fragment channel.
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderMessage {
    /// Replaces the provider's previous fragment.
    Fragment(ConfigurationFragment),
    /// The provider is gone; its entries must be removed.
    Withdrawn { provider: String },
}

impl ProviderMessage {
    pub fn provider(&self) -> &str {
        match self {
            ProviderMessage::Fragment(f) => f.provider(),
            ProviderMessage::Withdrawn { provider } => provider,
        }
    }
}

pub type FragmentSender = mpsc::UnboundedSender<ProviderMessage>;
pub type FragmentReceiver = mpsc::UnboundedReceiver<ProviderMessage>;

/// Create the fragment channel shared by all providers.
pub fn fragment_channel() -> (FragmentSender, FragmentReceiver) {
    mpsc::unbounded_channel()
}

/// A source of dynamic configuration.
#[async_trait]
pub trait Provider: Send {
    /// Name used to qualify this provider's entries.
    fn name(&self) -> &str;

    /// Emit fragments until shutdown, then emit `Withdrawn`.
    async fn provide(
        self: Box<Self>,
        tx: FragmentSender,
        shutdown: broadcast::Receiver<()>,
    ) -> Result<(), ProviderError>;
}

/// Run a provider on its own task, logging how it ends.
pub fn spawn_provider(
    provider: Box<dyn Provider>,
    tx: FragmentSender,
    shutdown: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    let name = provider.name().to_string();
    tokio::spawn(async move {
        tracing::info!(provider = %name, "Provider starting");
        match provider.provide(tx.clone(), shutdown).await {
            Ok(()) => tracing::info!(provider = %name, "Provider stopped"),
            Err(e) => {
                tracing::error!(provider = %name, error = %e, "Provider failed");
                // Stale routes must not outlive their source.
                let _ = tx.send(ProviderMessage::Withdrawn { provider: name });
            }
        }
    })
}

fn qualify_configuration(raw: Configuration, provider: &str) -> Configuration {
    let routers = raw
        .routers
        .into_iter()
        .map(|(name, mut router)| {
            router.service = qualify(&router.service, provider);
            router.middlewares = router
                .middlewares
                .iter()
                .map(|m| qualify(m, provider))
                .collect();
            if let Some(options) = router.tls.as_mut().and_then(|t| t.options.as_mut()) {
                *options = qualify(options, provider);
            }
            (qualify(&name, provider), router)
        })
        .collect();

    let services = raw
        .services
        .into_iter()
        .map(|(name, mut service)| {
            match &mut service {
                ServiceSpec::LoadBalancer(_) => {}
                ServiceSpec::Weighted(w) => {
                    for child in &mut w.services {
                        child.name = qualify(&child.name, provider);
                    }
                }
                ServiceSpec::Mirroring(m) => {
                    m.service = qualify(&m.service, provider);
                    for mirror in &mut m.mirrors {
                        mirror.name = qualify(&mirror.name, provider);
                    }
                }
            }
            (qualify(&name, provider), service)
        })
        .collect();

    let middlewares = raw
        .middlewares
        .into_iter()
        .map(|(name, mut middleware)| {
            if middleware.chain_members().is_some() {
                // Non-string members stay put for the schema check to reject.
                if let Some(Value::Array(members)) = middleware.params.get_mut("middlewares") {
                    for member in members.iter_mut() {
                        if let Value::String(name) = member {
                            *name = qualify(name, provider);
                        }
                    }
                }
            }
            (qualify(&name, provider), middleware)
        })
        .collect();

    let tls_options = raw
        .tls_options
        .into_iter()
        .map(|(name, options)| (qualify(&name, provider), options))
        .collect();

    Configuration {
        routers,
        services,
        middlewares,
        tls_options,
    }
}
