use std::{
    collections::{HashMap, VecDeque, hash_map},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use anyhow::{Context, Result};
use tokio::{
    select,
    sync::{
        mpsc::{self, error::TrySendError},
        oneshot,
    },
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::message::{ClientId, ClientView, OutboundFrame, ServerToClient};

pub const DEFAULT_EVENT_CAPACITY: usize = 1024;
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HubConfig {
    /// Bound on the hub's inbound event queue. Handlers wait when it is full.
    pub event_capacity: usize,
    /// Bound on each client's outbound queue. Frames past it are dropped.
    pub outbound_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            event_capacity: DEFAULT_EVENT_CAPACITY,
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
        }
    }
}

/// A connected participant as the hub sees it.
///
/// `outbound` only enqueues frames; the connection handler owns the
/// receiving end and the socket behind it.
#[derive(Debug, Clone)]
pub struct Client {
    pub id: ClientId,
    pub name: String,
    pub outbound: mpsc::Sender<OutboundFrame>,
}

impl Client {
    pub fn new(id: ClientId, outbound: mpsc::Sender<OutboundFrame>) -> Self {
        Self {
            id,
            name: String::new(),
            outbound,
        }
    }

    pub fn view(&self) -> ClientView {
        ClientView {
            id: self.id,
            name: self.name.clone(),
        }
    }
}

#[derive(Debug)]
pub enum Event {
    Join(Client),
    Leave(Client),
    Inbound(ServerToClient),
    Snapshot(oneshot::Sender<HubSnapshot>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubSnapshot {
    /// Registered clients ordered by id.
    pub clients: Vec<ClientView>,
    /// Frames dropped because a recipient's outbound queue was full.
    pub dropped_frames: u64,
}

struct ClientEntry {
    client: Client,
    dropped: u64,
}

/// Single owner of the client registry.
///
/// Every registry change and every broadcast happens inside [`Hub::run`], one
/// event at a time, so the map needs no lock.
pub struct Hub {
    events: mpsc::Receiver<Event>,
    // Join/leave announcements are re-enqueued through this sender so they
    // reach clients through the same path as chat messages.
    requeue: mpsc::Sender<Event>,
    // Announcements that did not fit in a full event queue. Served ahead of
    // the queue, since waiting handlers would win every freed slot.
    deferred: VecDeque<Event>,
    clients: HashMap<ClientId, ClientEntry>,
    dropped_frames: u64,
    shutdown: CancellationToken,
}

impl Hub {
    pub fn new(config: &HubConfig, shutdown: CancellationToken) -> (Self, HubHandle) {
        let (events_tx, events_rx) = mpsc::channel(config.event_capacity.max(1));
        let hub = Self {
            events: events_rx,
            requeue: events_tx.clone(),
            deferred: VecDeque::new(),
            clients: HashMap::new(),
            dropped_frames: 0,
            shutdown: shutdown.clone(),
        };
        let handle = HubHandle {
            events: events_tx,
            next_id: Arc::new(AtomicU64::new(1)),
            outbound_capacity: config.outbound_capacity.max(1),
            shutdown,
        };
        (hub, handle)
    }

    pub async fn run(mut self) {
        info!("hub started");
        while let Some(event) = self.next_event().await {
            self.handle_event(event);
        }
        self.close();
    }

    async fn next_event(&mut self) -> Option<Event> {
        if self.shutdown.is_cancelled() {
            return None;
        }
        if let Some(event) = self.deferred.pop_front() {
            return Some(event);
        }

        select! {
            biased;
            _ = self.shutdown.cancelled() => None,
            event = self.events.recv() => event,
        }
    }

    fn handle_event(&mut self, event: Event) {
        match event {
            Event::Join(client) => self.join(client),
            Event::Leave(client) => self.leave(client),
            Event::Inbound(message) => self.broadcast(&message),
            Event::Snapshot(respond_to) => {
                if respond_to.send(self.snapshot()).is_err() {
                    debug!("snapshot requester went away");
                }
            }
        }
    }

    fn join(&mut self, client: Client) {
        let id = client.id;
        let view = client.view();
        info!(client_id = id, name = %view.name, "client joined");

        self.announce(format!("{} joined", view.name));

        // Overwrites an earlier entry when the same connection logs in again.
        let entry = match self.clients.entry(id) {
            hash_map::Entry::Occupied(occupied) => {
                let entry = occupied.into_mut();
                entry.client = client;
                entry
            }
            hash_map::Entry::Vacant(vacant) => vacant.insert(ClientEntry { client, dropped: 0 }),
        };

        if !deliver(entry, OutboundFrame::Welcome(view), &mut self.dropped_frames) {
            warn!(client_id = id, "failed to acknowledge join");
        }
    }

    fn leave(&mut self, client: Client) {
        let Some(entry) = self.clients.remove(&client.id) else {
            debug!(client_id = client.id, "leave for unregistered client");
            return;
        };

        info!(
            client_id = client.id,
            name = %entry.client.name,
            dropped = entry.dropped,
            "client left"
        );
        self.announce(format!("{} left", entry.client.name));
    }

    fn broadcast(&mut self, message: &ServerToClient) {
        let mut delivered = 0usize;
        for entry in self.clients.values_mut() {
            let frame = OutboundFrame::Broadcast(message.clone());
            if deliver(entry, frame, &mut self.dropped_frames) {
                delivered += 1;
            }
        }
        debug!(delivered, registered = self.clients.len(), "broadcast dispatched");
    }

    fn announce(&mut self, text: String) {
        let event = Event::Inbound(ServerToClient::admin(text));
        if !self.deferred.is_empty() {
            self.deferred.push_back(event);
            return;
        }

        match self.requeue.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event) | TrySendError::Closed(event)) => {
                debug!("event queue full; deferring announcement");
                self.deferred.push_back(event);
            }
        }
    }

    fn snapshot(&self) -> HubSnapshot {
        let mut clients: Vec<ClientView> = self
            .clients
            .values()
            .map(|entry| entry.client.view())
            .collect();
        clients.sort_by_key(|client| client.id);
        HubSnapshot {
            clients,
            dropped_frames: self.dropped_frames,
        }
    }

    fn close(&mut self) {
        info!(
            clients = self.clients.len(),
            dropped_frames = self.dropped_frames,
            "hub shutting down"
        );
        self.broadcast(&ServerToClient::admin("server shutting down"));
        // Dropping the entries releases every outbound sender, which lets the
        // writer tasks finish and close their sockets.
        self.clients.clear();
    }
}

/// Enqueues one frame without waiting. Returns whether it was accepted.
fn deliver(entry: &mut ClientEntry, frame: OutboundFrame, dropped_total: &mut u64) -> bool {
    let client_id = entry.client.id;
    match entry.client.outbound.try_send(frame) {
        Ok(()) => true,
        Err(TrySendError::Full(_)) => {
            entry.dropped += 1;
            *dropped_total += 1;
            warn!(
                client_id,
                dropped = entry.dropped,
                "outbound queue full; dropping frame"
            );
            false
        }
        Err(TrySendError::Closed(_)) => {
            debug!(client_id, "outbound queue closed; skipping client");
            false
        }
    }
}

/// Cloneable entry point used by connection handlers to talk to the hub.
#[derive(Debug, Clone)]
pub struct HubHandle {
    events: mpsc::Sender<Event>,
    next_id: Arc<AtomicU64>,
    outbound_capacity: usize,
    shutdown: CancellationToken,
}

impl HubHandle {
    /// Allocates a fresh client with an empty name and the receiving end of
    /// its outbound queue. The client is not registered until it joins.
    pub fn new_client(&self) -> (Client, mpsc::Receiver<OutboundFrame>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (outbound_tx, outbound_rx) = mpsc::channel(self.outbound_capacity);
        (Client::new(id, outbound_tx), outbound_rx)
    }

    pub async fn join(&self, client: Client) -> bool {
        self.send(Event::Join(client)).await
    }

    pub async fn leave(&self, client: Client) -> bool {
        self.send(Event::Leave(client)).await
    }

    pub async fn publish(&self, message: ServerToClient) -> bool {
        self.send(Event::Inbound(message)).await
    }

    pub async fn snapshot(&self) -> Result<HubSnapshot> {
        let (respond_to, response) = oneshot::channel();
        self.events
            .send(Event::Snapshot(respond_to))
            .await
            .context("hub is not running")?;
        response.await.context("hub dropped snapshot request")
    }

    /// Resolves once the hub has been told to stop.
    pub async fn closed(&self) {
        self.shutdown.cancelled().await;
    }

    /// Returns false when the hub is gone and the caller should stop.
    async fn send(&self, event: Event) -> bool {
        match self.events.send(event).await {
            Ok(()) => true,
            Err(_) => {
                debug!("hub is not running; event discarded");
                false
            }
        }
    }
}
