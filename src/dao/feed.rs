use std::{fmt, str::FromStr};

use dashmap::DashMap;
use futures::{future::BoxFuture, stream::BoxStream};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tokio_stream::{
    StreamExt,
    wrappers::{BroadcastStream, errors::BroadcastStreamRecvError},
};
use tracing::warn;

use crate::dao::{models::Row, storage::StorageResult};

/// Kind of row-level change carried by a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    /// A row was created.
    Insert,
    /// A row was modified.
    Update,
    /// A row was removed.
    Delete,
}

/// A single change notification with the row snapshots before and after the change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// What happened to the row.
    #[serde(rename = "type")]
    pub kind: ChangeKind,
    /// Row after the change (absent for deletes).
    #[serde(default)]
    pub new: Option<Row>,
    /// Row before the change, when the transport provides it.
    #[serde(default)]
    pub old: Option<Row>,
}

impl ChangeEvent {
    /// Build an INSERT notification.
    pub fn insert(row: Row) -> Self {
        Self {
            kind: ChangeKind::Insert,
            new: Some(row),
            old: None,
        }
    }

    /// Build an UPDATE notification.
    pub fn update(row: Row, old: Option<Row>) -> Self {
        Self {
            kind: ChangeKind::Update,
            new: Some(row),
            old,
        }
    }

    /// Build a DELETE notification.
    pub fn delete(old: Row) -> Self {
        Self {
            kind: ChangeKind::Delete,
            new: None,
            old: Some(old),
        }
    }

    /// Value of `column` in the newest snapshot that has it.
    pub fn column(&self, column: &str) -> Option<&Value> {
        self.new
            .as_ref()
            .and_then(|row| row.get(column))
            .or_else(|| self.old.as_ref().and_then(|row| row.get(column)))
    }
}

/// Tables the reconciler follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedTable {
    /// Event metadata rows.
    Events,
    /// Roster rows.
    EventParticipants,
    /// User profile rows (display names).
    Profiles,
}

impl FeedTable {
    /// Table name as used by the backend.
    pub fn as_str(self) -> &'static str {
        match self {
            FeedTable::Events => "events",
            FeedTable::EventParticipants => "event_participants",
            FeedTable::Profiles => "profiles",
        }
    }
}

impl fmt::Display for FeedTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FeedTable {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "events" => Ok(FeedTable::Events),
            "event_participants" => Ok(FeedTable::EventParticipants),
            "profiles" => Ok(FeedTable::Profiles),
            other => Err(format!("unknown table `{other}`")),
        }
    }
}

/// Server-side row predicate attached to a subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowFilter {
    /// `column = value`
    Eq { column: String, value: String },
    /// `column IN (values)`
    In { column: String, values: Vec<String> },
}

impl RowFilter {
    /// Equality filter.
    pub fn eq(column: impl Into<String>, value: impl ToString) -> Self {
        RowFilter::Eq {
            column: column.into(),
            value: value.to_string(),
        }
    }

    /// Membership filter.
    pub fn any_of<T: ToString>(column: impl Into<String>, values: &[T]) -> Self {
        RowFilter::In {
            column: column.into(),
            values: values.iter().map(ToString::to_string).collect(),
        }
    }

    /// Whether `event` passes the filter.
    pub fn matches(&self, event: &ChangeEvent) -> bool {
        match self {
            RowFilter::Eq { column, value } => {
                event.column(column).and_then(scalar).as_deref() == Some(value.as_str())
            }
            RowFilter::In { column, values } => event
                .column(column)
                .and_then(scalar)
                .is_some_and(|found| values.iter().any(|value| *value == found)),
        }
    }
}

impl fmt::Display for RowFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowFilter::Eq { column, value } => write!(f, "{column}=eq.{value}"),
            RowFilter::In { column, values } => write!(f, "{column}=in.({})", values.join(",")),
        }
    }
}

fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        _ => None,
    }
}

/// Ordered stream of notifications for one subscription. Dropping it unsubscribes.
pub type ChangeStream = BoxStream<'static, ChangeEvent>;

/// Publish/subscribe change feed keyed by table and row filter.
pub trait ChangeFeed: Send + Sync {
    /// Open a subscription. Notifications are delivered in emission order.
    fn subscribe(
        &self,
        token: String,
        table: FeedTable,
        filter: RowFilter,
    ) -> BoxFuture<'static, StorageResult<ChangeStream>>;
}

/// In-process change feed fed by [`LocalChangeFeed::publish`], one broadcast channel per table.
pub struct LocalChangeFeed {
    hubs: DashMap<FeedTable, broadcast::Sender<ChangeEvent>>,
    capacity: usize,
}

impl LocalChangeFeed {
    /// Create a feed whose per-table channels buffer `capacity` notifications.
    pub fn new(capacity: usize) -> Self {
        Self {
            hubs: DashMap::new(),
            capacity,
        }
    }

    /// Deliver `event` to every subscriber of `table`, returning how many received it.
    pub fn publish(&self, table: FeedTable, event: ChangeEvent) -> usize {
        self.sender(table).send(event).unwrap_or(0)
    }

    /// Number of open subscriptions on `table`.
    pub fn subscriber_count(&self, table: FeedTable) -> usize {
        self.hubs
            .get(&table)
            .map(|hub| hub.receiver_count())
            .unwrap_or(0)
    }

    fn sender(&self, table: FeedTable) -> broadcast::Sender<ChangeEvent> {
        self.hubs
            .entry(table)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }
}

impl ChangeFeed for LocalChangeFeed {
    fn subscribe(
        &self,
        _token: String,
        table: FeedTable,
        filter: RowFilter,
    ) -> BoxFuture<'static, StorageResult<ChangeStream>> {
        let receiver = self.sender(table).subscribe();
        Box::pin(async move {
            let stream = BroadcastStream::new(receiver).filter_map(move |item| match item {
                Ok(event) if filter.matches(&event) => Some(event),
                Ok(_) => None,
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    warn!(%table, skipped, "change feed subscriber lagged; notifications lost");
                    None
                }
            });
            Ok(Box::pin(stream) as ChangeStream)
        })
    }
}
