//! Status publication.
//!
//! Once per cycle the supervisor hands the device's status to a
//! [`StatusPublisher`]. Closures implement the trait directly; [`StatusFeed`]
//! fans snapshots out to any number of async subscribers.

use tokio::sync::broadcast;
use tracing::trace;

use crate::data::StatusSnapshot;

/// Namespaced identity of a managed device.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DeviceIdentity {
    /// Namespace the device belongs to.
    pub namespace: String,
    /// Device name, unique within its namespace.
    pub name: String,
}

impl DeviceIdentity {
    /// Create a new identity.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Receives each cycle's status.
///
/// Publishing is fire-and-forget: the resync loop does not wait on or retry
/// a publication.
#[cfg_attr(test, mockall::automock)]
pub trait StatusPublisher: Send + Sync {
    /// Publish a device's status.
    fn publish(&self, device: &DeviceIdentity, status: &StatusSnapshot);
}

impl<F> StatusPublisher for F
where
    F: Fn(&DeviceIdentity, &StatusSnapshot) + Send + Sync,
{
    fn publish(&self, device: &DeviceIdentity, status: &StatusSnapshot) {
        self(device, status)
    }
}

/// A status publication as delivered by [`StatusFeed`].
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PublishedStatus {
    /// The device the status belongs to.
    pub device: DeviceIdentity,
    /// The published status.
    pub status: StatusSnapshot,
}

/// Publisher backed by a broadcast channel.
///
/// Publications made while nobody is subscribed are dropped.
#[derive(Debug, Clone)]
pub struct StatusFeed {
    tx: broadcast::Sender<PublishedStatus>,
}

impl StatusFeed {
    /// Create a feed buffering up to `capacity` publications per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to publications.
    pub fn subscribe(&self) -> broadcast::Receiver<PublishedStatus> {
        self.tx.subscribe()
    }

    /// Number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for StatusFeed {
    fn default() -> Self {
        Self::new(32)
    }
}

impl StatusPublisher for StatusFeed {
    fn publish(&self, device: &DeviceIdentity, status: &StatusSnapshot) {
        let published = PublishedStatus {
            device: device.clone(),
            status: status.clone(),
        };
        if self.tx.send(published).is_err() {
            trace!("No subscribers for status of {}", device);
        }
    }
}
