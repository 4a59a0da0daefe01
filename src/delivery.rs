use async_trait::async_trait;

use crate::roster::UserId;

/// "Send a message to one user". A failed delivery affects that user only.
#[async_trait]
pub trait NotificationSink: Send + Sync + 'static {
    async fn notify(&self, user_id: UserId, message: &str) -> anyhow::Result<()>;
}
