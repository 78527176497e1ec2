use crate::augment::{AugmentedGroup, augment};
use crate::connection::{self, Connection};
use crate::definitions::DefinitionGroup;
use futures::Stream;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;

#[derive(Clone)]
pub(crate) struct PollEvent {
    pub(crate) group: &'static DefinitionGroup,
    pub(crate) kind: PollEventKind,
}

#[derive(Clone)]
pub(crate) enum PollEventKind {
    /// The group has been read out and augmented.
    Readings(AugmentedGroup<'static>),
    /// There was an error reading the values of this group.
    ///
    /// This error may be transient.
    ReadError(Arc<connection::Error>),
}

/// Produces a stream that reads all `groups`, one after another, every `period`.
pub(crate) fn poll_groups(
    connection: Arc<Connection>,
    groups: Vec<&'static DefinitionGroup>,
    period: Duration,
) -> impl Stream<Item = PollEvent> + Send {
    async_stream::stream! {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            for &group in &groups {
                let kind = match read_group(&connection, group).await {
                    Ok(readings) => PollEventKind::Readings(readings),
                    Err(e) => PollEventKind::ReadError(Arc::new(e)),
                };
                yield PollEvent { group, kind };
            }
        }
    }
}

async fn read_group(
    connection: &Connection,
    group: &'static DefinitionGroup,
) -> Result<AugmentedGroup<'static>, connection::Error> {
    let values = match connection.fetch_values(group).await {
        Err(connection::Error::SessionExpired(_)) => {
            tracing::debug!(group = group.name, "session expired, logging in again");
            connection.authenticate().await?;
            connection.fetch_values(group).await?
        }
        result => result?,
    };
    Ok(augment(group, &values))
}
