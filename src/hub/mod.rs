//! Push notification fabric: subscription groups and fan-out.

mod messages;
mod ws;

pub use messages::{
    ClientCommand, EntityKind, GroupKey, ServerEvent, ServerMessage, SCHEMA_VERSION,
};
pub use ws::ws_handler;

use dashmap::DashMap;
use std::collections::HashSet;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

/// Per-connection outbound channel.
type Outbound = mpsc::UnboundedSender<ServerMessage>;

/// Hub holding group memberships and delivering entity- and queue-scoped
/// notifications to connected clients.
///
/// The hub is advisory: joins after a publish receive no backfill, and the
/// state of record stays in the asset catalog. Delivery is at-least-once
/// with per-group FIFO.
pub struct Hub {
    /// group -> (connection id -> outbound channel).
    groups: DashMap<GroupKey, DashMap<Uuid, Outbound>>,
    /// connection id -> groups it joined, for release on disconnect.
    memberships: DashMap<Uuid, HashSet<GroupKey>>,
    /// connection id -> outbound channel.
    connections: DashMap<Uuid, Outbound>,
}

impl Hub {
    pub fn new() -> Self {
        Self {
            groups: DashMap::new(),
            memberships: DashMap::new(),
            connections: DashMap::new(),
        }
    }

    /// Registers a connection and returns its id plus the receiving half of
    /// its outbound channel.
    pub fn connect(&self) -> (Uuid, mpsc::UnboundedReceiver<ServerMessage>) {
        let id = Uuid::new_v4();
        let (sender, receiver) = mpsc::unbounded_channel();
        self.connections.insert(id, sender);
        self.memberships.insert(id, HashSet::new());
        debug!(connection = %id, "hub connection registered");
        (id, receiver)
    }

    /// Releases all group memberships and drops the connection.
    pub fn disconnect(&self, connection_id: Uuid) {
        if let Some((_, joined)) = self.memberships.remove(&connection_id) {
            for group in joined {
                if let Some(members) = self.groups.get(&group) {
                    members.remove(&connection_id);
                }
            }
        }
        self.connections.remove(&connection_id);
        debug!(connection = %connection_id, "hub connection released");
    }

    /// Subscribes a connection to a group.
    pub fn join(&self, connection_id: Uuid, group: GroupKey) {
        let Some(sender) = self.connections.get(&connection_id) else {
            return;
        };
        self.groups
            .entry(group)
            .or_default()
            .insert(connection_id, sender.clone());
        if let Some(mut joined) = self.memberships.get_mut(&connection_id) {
            joined.insert(group);
        }
    }

    /// Unsubscribes a connection from a group.
    pub fn leave(&self, connection_id: Uuid, group: GroupKey) {
        if let Some(members) = self.groups.get(&group) {
            members.remove(&connection_id);
        }
        if let Some(mut joined) = self.memberships.get_mut(&connection_id) {
            joined.remove(&group);
        }
    }

    /// Fans an event out to the current members of a group.
    pub fn publish(&self, group: GroupKey, event: ServerEvent) {
        let Some(members) = self.groups.get(&group) else {
            return;
        };
        let message = ServerMessage::new(event);
        for member in members.iter() {
            // A send failure means the receiver task is gone; disconnect
            // cleanup will drop the membership.
            let _ = member.value().send(message.clone());
        }
    }

    /// Publishes to an entity group and mirrors model-scoped events to the
    /// all-models group.
    pub fn publish_entity(&self, kind: EntityKind, entity_id: i64, event: ServerEvent) {
        self.publish(GroupKey::Entity(kind, entity_id), event.clone());
        self.publish(GroupKey::AllModels, event);
    }

    /// Publishes a queue-scoped notification.
    pub fn publish_jobs(&self, event: ServerEvent) {
        self.publish(GroupKey::Jobs, event);
    }

    /// Number of live connections, for logging.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn group_fanout_reaches_current_members_only() {
        let hub = Hub::new();
        let (early, mut early_rx) = hub.connect();
        hub.join(early, GroupKey::AllModels);

        hub.publish(
            GroupKey::AllModels,
            ServerEvent::JobCompleted { job_id: 1 },
        );

        // A client joining after the publish receives nothing.
        let (late, mut late_rx) = hub.connect();
        hub.join(late, GroupKey::AllModels);

        let received = early_rx.recv().await.unwrap();
        assert!(matches!(
            received.event,
            ServerEvent::JobCompleted { job_id: 1 }
        ));
        assert!(late_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn disconnect_releases_memberships() {
        let hub = Hub::new();
        let (id, mut rx) = hub.connect();
        hub.join(id, GroupKey::Jobs);
        hub.disconnect(id);

        hub.publish_jobs(ServerEvent::JobCompleted { job_id: 7 });
        assert!(rx.try_recv().is_err());
    }
}
