//! Static registry: a literal route list from the configuration.

use tokio::sync::mpsc;

use crate::registry::Backend;

/// Emits the configured route commands once. Useful for development
/// and as a fixed fallback in front of a known fleet.
pub struct StaticBackend {
    routes: String,
}

impl StaticBackend {
    pub fn new(routes: String) -> Self {
        Self { routes }
    }
}

impl Backend for StaticBackend {
    fn watch_services(&self) -> mpsc::Receiver<String> {
        let (tx, rx) = mpsc::channel(1);
        let routes = self.routes.clone();
        tokio::spawn(async move {
            if tx.send(routes).await.is_ok() {
                tx.closed().await;
            }
        });
        rx
    }

    fn watch_manual(&self) -> mpsc::Receiver<String> {
        let (tx, rx) = mpsc::channel(1);
        tokio::spawn(async move { tx.closed().await });
        rx
    }
}
