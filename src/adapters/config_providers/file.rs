use std::path::{Path, PathBuf};

use async_trait::async_trait;
use eyre::{Context, Result};
use notify::{RecursiveMode, Watcher};
use tokio::sync::mpsc;

use super::take_receiver;
use crate::{
    config::{loader::load_config, models::GatewayConfig},
    ports::config_provider::ConfigProvider,
};

/// Loads the gateway configuration from a local file and watches it for changes.
pub struct FileConfigProvider {
    path: PathBuf,
    // Dropping the watcher stops notifications
    _watcher: notify::RecommendedWatcher,
    update_rx: std::sync::Mutex<Option<mpsc::Receiver<()>>>,
}

impl FileConfigProvider {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let (tx, rx) = mpsc::channel(1);
        let watcher = Self::watcher(&path, tx)?;

        Ok(Self {
            path,
            _watcher: watcher,
            update_rx: std::sync::Mutex::new(Some(rx)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Watch the parent directory so editors that replace the file are seen too.
    fn watcher(path: &Path, tx: mpsc::Sender<()>) -> Result<notify::RecommendedWatcher> {
        let config_filename = path
            .file_name()
            .ok_or_else(|| eyre::eyre!("Invalid config path: {}", path.display()))?
            .to_owned();

        let mut watcher =
            notify::recommended_watcher(move |res: Result<notify::Event, notify::Error>| {
                match res {
                    Ok(event) => {
                        if (event.kind.is_modify()
                            || event.kind.is_create()
                            || event.kind.is_remove())
                            && event
                                .paths
                                .iter()
                                .any(|p| p.file_name() == Some(&config_filename))
                        {
                            tracing::debug!("Config file changed: {:?}", event.kind);
                            // A pending signal already covers this change
                            let _ = tx.try_send(());
                        }
                    }
                    Err(e) => tracing::error!("File watch error: {:?}", e),
                }
            })?;

        let watch_dir = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        watcher
            .watch(watch_dir, RecursiveMode::NonRecursive)
            .wrap_err_with(|| format!("Failed to watch config directory {}", watch_dir.display()))?;

        Ok(watcher)
    }
}

#[async_trait]
impl ConfigProvider for FileConfigProvider {
    async fn load_config(&self) -> Result<GatewayConfig> {
        let path_str = self
            .path
            .to_str()
            .ok_or_else(|| eyre::eyre!("Invalid UTF-8 path: {}", self.path.display()))?;
        load_config(path_str).await
    }

    fn watch(&self) -> mpsc::Receiver<()> {
        take_receiver(&self.update_rx)
    }
}

#[cfg(test)]
mod tests {
    use std::{fs::File, io::Write};

    use tempfile::tempdir;
    use tokio::time::{Duration, sleep};

    use super::*;
    use crate::config::ProxyMode;

    fn write(path: &Path, content: &str) -> Result<()> {
        let mut file = File::create(path)?;
        file.write_all(content.as_bytes())?;
        Ok(())
    }

    #[tokio::test]
    async fn test_file_config_provider() -> Result<()> {
        let dir = tempdir()?;
        let file_path = dir.path().join("mirage.toml");

        write(
            &file_path,
            r#"
            listen_addr = "127.0.0.1:8080"
            [proxy]
            mode = "mock"
        "#,
        )?;

        let provider = FileConfigProvider::new(&file_path)?;
        let config = provider.load_config().await?;
        assert_eq!(config.proxy.mode, ProxyMode::Mock);

        let mut rx = provider.watch();

        // Let the file system timestamp move on
        sleep(Duration::from_millis(100)).await;

        write(
            &file_path,
            r#"
            listen_addr = "127.0.0.1:8080"
            [proxy]
            mode = "proxy"
            target_base_url = "http://127.0.0.1:9000"
        "#,
        )?;

        let notification = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await;
        assert!(notification.is_ok(), "Timed out waiting for config update");
        assert!(
            notification.unwrap().is_some(),
            "Channel closed unexpectedly"
        );

        let config = provider.load_config().await?;
        assert_eq!(config.proxy.mode, ProxyMode::Proxy);
        assert_eq!(
            config.proxy.target_base_url.as_deref(),
            Some("http://127.0.0.1:9000")
        );

        Ok(())
    }

    #[tokio::test]
    async fn test_second_watch_gets_closed_channel() -> Result<()> {
        let dir = tempdir()?;
        let file_path = dir.path().join("mirage.toml");
        write(&file_path, "")?;

        let provider = FileConfigProvider::new(&file_path)?;
        let _first = provider.watch();
        let mut second = provider.watch();
        assert!(second.recv().await.is_none());
        Ok(())
    }
}
