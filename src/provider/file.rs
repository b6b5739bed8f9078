//! File provider: dynamic configuration from a watched file.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{broadcast, mpsc};

use crate::config::loader::load_dynamic;
use crate::provider::{
    ConfigurationFragment, FragmentSender, Provider, ProviderError, ProviderMessage,
};

/// Provider name used when none is given.
pub const FILE_PROVIDER: &str = "file";

/// Emits the contents of one dynamic configuration file, and re-emits it
/// whenever the file changes.
pub struct FileProvider {
    name: String,
    path: PathBuf,
    watch: bool,
}

impl FileProvider {
    pub fn new(path: impl Into<PathBuf>, watch: bool) -> Self {
        Self {
            name: FILE_PROVIDER.to_string(),
            path: path.into(),
            watch,
        }
    }

    /// Override the provider name (defaults to `file`).
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Load the file and send it as a fragment.
    ///
    /// A file that fails to load is logged and skipped; the previously sent
    /// fragment stays in effect.
    fn load_and_send(&self, tx: &FragmentSender) -> Result<(), ProviderError> {
        let fragment = match load_dynamic(&self.path)
            .map_err(ProviderError::from)
            .and_then(|config| ConfigurationFragment::new(self.name.clone(), config))
        {
            Ok(fragment) => fragment,
            Err(e) => {
                tracing::error!(
                    provider = %self.name,
                    path = ?self.path,
                    error = %e,
                    "Failed to load dynamic configuration. Keeping current fragment."
                );
                return Ok(());
            }
        };

        tracing::debug!(provider = %self.name, path = ?self.path, "Dynamic configuration loaded");
        tx.send(ProviderMessage::Fragment(fragment))
            .map_err(|_| ProviderError::ChannelClosed)
    }

    fn watch_dir(&self) -> &Path {
        match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        }
    }
}

#[async_trait]
impl Provider for FileProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn provide(
        self: Box<Self>,
        tx: FragmentSender,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), ProviderError> {
        self.load_and_send(&tx)?;

        if !self.watch {
            let _ = shutdown.recv().await;
            let _ = tx.send(ProviderMessage::Withdrawn {
                provider: self.name.clone(),
            });
            return Ok(());
        }

        // Editors often replace the file, so watch the directory and filter.
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        let file_name = self.path.file_name().map(|n| n.to_os_string());
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    let relevant = (event.kind.is_modify() || event.kind.is_create())
                        && event
                            .paths
                            .iter()
                            .any(|p| p.file_name().map(|n| n.to_os_string()) == file_name);
                    if relevant {
                        let _ = event_tx.send(());
                    }
                }
                Err(e) => tracing::error!("Watch error: {:?}", e),
            },
            Config::default(),
        )?;
        watcher.watch(self.watch_dir(), RecursiveMode::NonRecursive)?;

        tracing::info!(provider = %self.name, path = ?self.path, "File provider watching");

        loop {
            tokio::select! {
                Some(()) = event_rx.recv() => {
                    tracing::info!(provider = %self.name, "Dynamic configuration change detected, reloading...");
                    self.load_and_send(&tx)?;
                }
                _ = shutdown.recv() => {
                    break;
                }
            }
        }

        drop(watcher);
        let _ = tx.send(ProviderMessage::Withdrawn {
            provider: self.name.clone(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::fragment_channel;
    use std::io::Write;

    const DYNAMIC: &str = r#"
[routers.app]
rule = "PathPrefix(`/`)"
service = "app"

[services.app.loadBalancer]
servers = [{ url = "http://127.0.0.1:3000" }]
"#;

    #[tokio::test]
    async fn emits_fragment_then_withdraws_on_shutdown() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        write!(file, "{}", DYNAMIC).unwrap();

        let (tx, mut rx) = fragment_channel();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let provider = Box::new(FileProvider::new(file.path(), false));
        let task = tokio::spawn(provider.provide(tx, shutdown_rx));

        match rx.recv().await.unwrap() {
            ProviderMessage::Fragment(fragment) => {
                assert_eq!(fragment.provider(), "file");
                assert!(fragment.configuration().routers.contains_key("app@file"));
            }
            other => panic!("expected fragment, got {:?}", other),
        }

        shutdown_tx.send(()).unwrap();
        assert_eq!(
            rx.recv().await.unwrap(),
            ProviderMessage::Withdrawn {
                provider: "file".into()
            }
        );
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn malformed_file_sends_nothing() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, "{{ not json").unwrap();

        let (tx, mut rx) = fragment_channel();
        let provider = FileProvider::new(file.path(), false);
        provider.load_and_send(&tx).unwrap();
        assert!(rx.try_recv().is_err());
    }
}
