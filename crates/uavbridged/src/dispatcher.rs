//! Bus dispatcher
//!
//! A single task multiplexing one controller link and N subscribers over a
//! tagged event channel. Each attached connection gets a forwarder task
//! that wraps its outbound messages with the connection id, so the
//! dispatcher itself never blocks on a peer: deliveries use `try_send`, and
//! a saturated inbound queue drops the message and bumps that connection's
//! drop counter.
//!
//! Routing rules:
//! - an update from the owner of an object fans out to its subscribers;
//! - an update from anyone else routes to the object's owners;
//! - a request goes to the first other connection owning the object;
//! - a published definition is broadcast, and replayed to late joiners.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};
use uavtalk_core::{BusMessage, Definition, ObjectId, Request, Update};

/// Default depth of every connection queue.
pub const QUEUE_DEPTH: usize = 10;

/// Depth of the dispatcher's own control channel.
const CONTROL_DEPTH: usize = 100;

pub type ConnectionId = u64;

/// A subscriber's (or the link bridge's) handle on the bus.
pub struct Connection {
    pub id: ConnectionId,
    /// Dispatcher to peer. Closed when the dispatcher shuts down or drops
    /// the connection.
    pub incoming: mpsc::Receiver<BusMessage>,
    /// Peer to dispatcher.
    pub outgoing: mpsc::Sender<BusMessage>,
    /// Messages dropped toward this peer because its queue was full.
    pub dropped: Arc<AtomicU64>,
}

enum Event {
    Attach {
        id: ConnectionId,
        in_tx: mpsc::Sender<BusMessage>,
        dropped: Arc<AtomicU64>,
    },
    Message {
        from: ConnectionId,
        message: BusMessage,
    },
    Closed {
        id: ConnectionId,
    },
}

/// Cloneable handle for attaching new connections.
#[derive(Clone)]
pub struct DispatcherHandle {
    control: mpsc::Sender<Event>,
    next_id: Arc<AtomicU64>,
}

impl DispatcherHandle {
    /// Attach with the default queue depth.
    pub async fn attach(&self) -> Option<Connection> {
        self.attach_with_capacity(QUEUE_DEPTH).await
    }

    /// Attach with an explicit inbound queue depth.
    pub async fn attach_with_capacity(&self, capacity: usize) -> Option<Connection> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (in_tx, in_rx) = mpsc::channel(capacity);
        let (out_tx, mut out_rx) = mpsc::channel(capacity.max(QUEUE_DEPTH));
        let dropped = Arc::new(AtomicU64::new(0));

        self.control
            .send(Event::Attach { id, in_tx, dropped: dropped.clone() })
            .await
            .ok()?;

        let control = self.control.clone();
        tokio::spawn(async move {
            while let Some(message) = out_rx.recv().await {
                if control.send(Event::Message { from: id, message }).await.is_err() {
                    return;
                }
            }
            let _ = control.send(Event::Closed { id }).await;
        });

        Some(Connection { id, incoming: in_rx, outgoing: out_tx, dropped })
    }
}

struct ConnState {
    id: ConnectionId,
    in_tx: mpsc::Sender<BusMessage>,
    /// ObjectIDs this connection has published definitions for.
    owned_ids: HashSet<ObjectId>,
    subscriptions: HashSet<ObjectId>,
    dropped: Arc<AtomicU64>,
}

impl ConnState {
    /// Non-blocking delivery with the drop-on-full backpressure policy.
    fn deliver(&self, message: BusMessage) {
        match self.in_tx.try_send(message) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                debug!(connection = self.id, "queue full, message dropped");
            }
            // The forwarder will report the closure.
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }
}

/// The dispatcher task state.
pub struct Dispatcher {
    control: mpsc::Receiver<Event>,
    connections: Vec<ConnState>,
    /// ObjectID to owning connections, in publish order.
    owners: HashMap<ObjectId, Vec<ConnectionId>>,
    /// Every published definition in arrival order, for replay to late
    /// joiners.
    replay: Vec<(ConnectionId, Arc<Definition>)>,
}

impl Dispatcher {
    pub fn new() -> (Self, DispatcherHandle) {
        let (control_tx, control_rx) = mpsc::channel(CONTROL_DEPTH);
        let dispatcher = Self {
            control: control_rx,
            connections: Vec::new(),
            owners: HashMap::new(),
            replay: Vec::new(),
        };
        let handle = DispatcherHandle {
            control: control_tx,
            next_id: Arc::new(AtomicU64::new(0)),
        };
        (dispatcher, handle)
    }

    /// Run until every handle and forwarder is gone.
    pub async fn run(mut self) {
        while let Some(event) = self.control.recv().await {
            self.handle_event(event);
        }
        info!("dispatcher shut down");
    }

    fn handle_event(&mut self, event: Event) {
        match event {
            Event::Attach { id, in_tx, dropped } => self.attach(id, in_tx, dropped),
            Event::Message { from, message } => self.dispatch(from, message),
            Event::Closed { id } => self.close(id),
        }
    }

    fn attach(&mut self, id: ConnectionId, in_tx: mpsc::Sender<BusMessage>, dropped: Arc<AtomicU64>) {
        let state = ConnState {
            id,
            in_tx,
            owned_ids: HashSet::new(),
            subscriptions: HashSet::new(),
            dropped,
        };
        // Late joiners need every schema already on the bus.
        for (_, definition) in &self.replay {
            state.deliver(BusMessage::Definition(definition.clone()));
        }
        info!(connection = id, "connection attached");
        self.connections.push(state);
    }

    fn close(&mut self, id: ConnectionId) {
        self.connections.retain(|c| c.id != id);
        for owners in self.owners.values_mut() {
            owners.retain(|&owner| owner != id);
        }
        self.owners.retain(|_, owners| !owners.is_empty());
        self.replay.retain(|(owner, _)| *owner != id);
        info!(connection = id, "connection closed");
    }

    fn dispatch(&mut self, from: ConnectionId, message: BusMessage) {
        match message {
            BusMessage::Update(update) => self.dispatch_update(from, update),
            BusMessage::Request(request) => self.dispatch_request(from, request),
            BusMessage::Definition(definition) => self.dispatch_definition(from, definition),
            BusMessage::Subscription(subscription) => {
                if let Some(state) = self.state_mut(from) {
                    state.subscriptions.insert(subscription.object_id);
                }
            }
            BusMessage::Unsubscription(unsubscription) => {
                if let Some(state) = self.state_mut(from) {
                    state.subscriptions.remove(&unsubscription.object_id);
                }
            }
        }
    }

    fn dispatch_update(&mut self, from: ConnectionId, update: Update) {
        let from_owner = self
            .state(from)
            .map(|state| state.owned_ids.contains(&update.object_id))
            .unwrap_or(false);

        for connection in &self.connections {
            if connection.id == from {
                continue;
            }
            // The owner's updates fan out to subscribers; everyone else's
            // route toward the authoritative owner.
            let eligible = if from_owner {
                connection.subscriptions.contains(&update.object_id)
            } else {
                connection.owned_ids.contains(&update.object_id)
            };
            if eligible {
                connection.deliver(BusMessage::Update(update.clone()));
            }
        }
    }

    fn dispatch_request(&mut self, from: ConnectionId, request: Request) {
        let owner = self
            .owners
            .get(&request.object_id)
            .and_then(|owners| owners.iter().find(|&&owner| owner != from))
            .copied();
        match owner.and_then(|id| self.state(id)) {
            Some(state) => state.deliver(BusMessage::Request(request)),
            None => debug!(object_id = %request.object_id, "request dropped, no owner"),
        }
    }

    fn dispatch_definition(&mut self, from: ConnectionId, definition: Arc<Definition>) {
        let Some(state) = self.state_mut(from) else { return };
        state.owned_ids.insert(definition.object_id);

        let owners = self.owners.entry(definition.object_id).or_default();
        if !owners.contains(&from) {
            owners.push(from);
        }
        self.replay.push((from, definition.clone()));

        for connection in &self.connections {
            if connection.id != from {
                connection.deliver(BusMessage::Definition(definition.clone()));
            }
        }
    }

    fn state(&self, id: ConnectionId) -> Option<&ConnState> {
        self.connections.iter().find(|c| c.id == id)
    }

    fn state_mut(&mut self, id: ConnectionId) -> Option<&mut ConnState> {
        self.connections.iter_mut().find(|c| c.id == id)
    }
}
