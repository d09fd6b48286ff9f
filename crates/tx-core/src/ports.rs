use async_trait::async_trait;
use chrono::NaiveDate;

use crate::{
    domain::{Destination, TimeEntry},
    Result,
};

/// Hexagonal port for the time tracker.
///
/// Implementations fail with `Error::Transport`, `Error::Status` or
/// `Error::Decode`; callers skip the project on any of them.
#[async_trait]
pub trait TrackerClient: Send + Sync {
    async fn fetch_entries(&self, date: NaiveDate, project_id: &str) -> Result<Vec<TimeEntry>>;
}

/// Hexagonal port for delivering digests to channels.
///
/// One call per digest. Fails with `Error::Delivery`; callers log and move on
/// to the next contributor.
#[async_trait]
pub trait ChannelDispatcher: Send + Sync {
    async fn send(&self, destination: &Destination, text: &str) -> Result<()>;
}
