use async_trait::async_trait;

use crate::core::auth::Secret;

/// Named secret lookup backing `secret_ref` credential sources.
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn secret(&self, name: &str) -> Option<Secret>;
}
