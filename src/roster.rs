use async_trait::async_trait;

pub type UserId = i64;

/// Snapshot of one user, taken when a scheduler run starts. Mutations to the
/// backing store do not affect an entry after it is read; picking them up
/// requires a restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RosterEntry {
    pub user_id: UserId,
    /// Whole hours east of the reference clock.
    pub offset_hours: i32,
}

/// "List users with their time-zone offsets". Any failure is retryable from
/// the scheduler's point of view.
#[async_trait]
pub trait UserDirectory: Send + Sync + 'static {
    async fn list_users(&self) -> anyhow::Result<Vec<RosterEntry>>;
}
