//! Real-time notification rooms
//!
//! Dashboards connect, then join one room per restaurant they watch.
//! `publish` fans an event out to every connection in the room. Delivery is
//! at-most-once: each connection has a bounded queue, and an event for a
//! full or closed queue is dropped rather than waited on. Clients recover by
//! re-fetching their booking list.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::mpsc;

use crate::models::Booking;

/// Outbound queue length per connection
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

pub type ConnectionId = u64;

/// Messages sent to dashboard clients
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    Connect {
        #[serde(rename = "connectionId")]
        connection_id: ConnectionId,
    },
    NewBooking(NewBookingEvent),
    Error {
        message: String,
    },
}

/// Payload of `new-booking`; enough to render a desktop notification
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewBookingEvent {
    pub message: String,
    pub booking: Booking,
    pub timestamp: DateTime<Utc>,
}

impl NewBookingEvent {
    pub fn for_booking(booking: &Booking) -> Self {
        Self {
            message: format!(
                "New booking for {} guest(s) at {}",
                booking.guest_count,
                booking.scheduled_at.format("%Y-%m-%d %H:%M UTC")
            ),
            booking: booking.clone(),
            timestamp: Utc::now(),
        }
    }
}

/// Messages received from dashboard clients
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientEvent {
    JoinRestaurant(String),
    LeaveRestaurant(String),
}

#[derive(Default)]
struct Rooms {
    connections: HashMap<ConnectionId, mpsc::Sender<Arc<ServerEvent>>>,
    members: HashMap<String, HashSet<ConnectionId>>,
}

impl Rooms {
    fn remove_connection(&mut self, id: ConnectionId) {
        self.connections.remove(&id);
        self.members.retain(|_, ids| {
            ids.remove(&id);
            !ids.is_empty()
        });
    }
}

/// Room membership for one server instance
///
/// Constructed once at startup and shared through the application state.
pub struct RoomRegistry {
    rooms: RwLock<Rooms>,
    next_id: AtomicU64,
    capacity: usize,
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

impl RoomRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            rooms: RwLock::new(Rooms::default()),
            next_id: AtomicU64::new(1),
            capacity: capacity.max(1),
        }
    }

    /// Register a transport connection; events arrive on the receiver
    pub fn connect(&self) -> (ConnectionId, mpsc::Receiver<Arc<ServerEvent>>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.capacity);
        self.write().connections.insert(id, tx);
        tracing::debug!("Dashboard connection {} registered", id);
        (id, rx)
    }

    /// Add a connection to a room. Returns false for unknown connections.
    pub fn join(&self, id: ConnectionId, room: &str) -> bool {
        let mut rooms = self.write();
        if !rooms.connections.contains_key(&id) {
            return false;
        }
        rooms.members.entry(room.to_string()).or_default().insert(id);
        true
    }

    pub fn leave(&self, id: ConnectionId, room: &str) {
        let mut rooms = self.write();
        if let Some(ids) = rooms.members.get_mut(room) {
            ids.remove(&id);
            if ids.is_empty() {
                rooms.members.remove(room);
            }
        }
    }

    /// Drop a connection and every room membership it held
    pub fn disconnect(&self, id: ConnectionId) {
        self.write().remove_connection(id);
        tracing::debug!("Dashboard connection {} removed", id);
    }

    /// Send directly to one connection (used for `connect` and `error`)
    pub fn send_to(&self, id: ConnectionId, event: ServerEvent) -> bool {
        let rooms = self.read();
        match rooms.connections.get(&id) {
            Some(tx) => tx.try_send(Arc::new(event)).is_ok(),
            None => false,
        }
    }

    /// Fan an event out to a room without waiting on any subscriber.
    ///
    /// Returns how many connections accepted the event.
    pub fn publish(&self, room: &str, event: ServerEvent) -> usize {
        let event = Arc::new(event);
        let mut delivered = 0;
        let mut closed = Vec::new();

        {
            let rooms = self.read();
            let Some(ids) = rooms.members.get(room) else {
                return 0;
            };

            for id in ids {
                let Some(tx) = rooms.connections.get(id) else {
                    continue;
                };
                match tx.try_send(event.clone()) {
                    Ok(()) => delivered += 1,
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        tracing::debug!("Queue full for connection {}, event dropped", id);
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => closed.push(*id),
                }
            }
        }

        if !closed.is_empty() {
            let mut rooms = self.write();
            for id in closed {
                rooms.remove_connection(id);
            }
        }

        delivered
    }

    /// Connections currently in a room
    pub fn members(&self, room: &str) -> Vec<ConnectionId> {
        let mut ids: Vec<_> = self
            .read()
            .members
            .get(room)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default();
        ids.sort_unstable();
        ids
    }

    pub fn connection_count(&self) -> usize {
        self.read().connections.len()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Rooms> {
        self.rooms.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Rooms> {
        self.rooms.write().unwrap_or_else(PoisonError::into_inner)
    }
}
