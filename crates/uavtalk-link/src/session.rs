//! Session state machine
//!
//! Drives the controller-side handshake and session establishment, then
//! bridges the streaming link to the dispatcher bus:
//!
//! ```text
//! NotConnected --HandshakeAck/Connected--> NoSession --enumeration--> Stream
//!       ^                                                               |
//!       +----------------- Status == Disconnected ---------------------+
//! ```
//!
//! All session state lives in this single task. Timers (handshake retry,
//! the post-enumeration quiescence, the inter-meta pacing) are select
//! branches, so a dying link cancels them and resets the machine.

use crate::transport::LinkEvent;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uavtalk_core::{
    BusMessage, Catalog, Cmd, Definition, ObjectData, ObjectId, Packet, Request, Update,
};

const FLIGHT_TELEMETRY_STATS: &str = "FlightTelemetryStats";
const GCS_TELEMETRY_STATS: &str = "GCSTelemetryStats";
const SESSION_MANAGING: &str = "SessionManaging";
const OBJECT_PERSISTENCE: &str = "ObjectPersistence";

/// How often an unanswered handshake request is retransmitted.
const HANDSHAKE_RETRY: Duration = Duration::from_secs(1);

/// The controller needs a quiescent period between enumeration and
/// streaming.
const QUIESCENCE: Duration = Duration::from_secs(5);

/// Spacing between Meta setters so the controller is not overrun.
const META_PACING: Duration = Duration::from_millis(10);

/// Telemetry mode bits carried in a Meta object's `modes` field.
const MODE_FLIGHT_ACKED: u8 = 1 << 2;
const MODE_GCS_ACKED: u8 = 1 << 3;

#[derive(Debug, Error)]
pub enum SessionError {
    /// The catalog lacks one of the objects the handshake is built on.
    #[error("definition catalog is missing {0}")]
    MissingWellKnown(&'static str),
}

enum State {
    /// No link.
    Idle,
    /// Link up, handshaking.
    NotConnected,
    /// Negotiating the session and enumerating the controller's objects.
    Enumerating(Enumeration),
    /// Enumeration finished; waiting out the quiescent period.
    Quiescent {
        until: Instant,
        active: Vec<Arc<Definition>>,
    },
    /// Pushing Meta setters and publishing definitions, paced.
    Publishing {
        pending: VecDeque<Arc<Definition>>,
        next_at: Instant,
    },
    /// Steady-state telemetry.
    Stream,
}

struct Enumeration {
    session_id: u16,
    current_object: u8,
    number_of_objects: u8,
    started: Instant,
    /// Definitions the controller described and the catalog knows.
    active: Vec<Arc<Definition>>,
    /// Whether this enumeration round established a session id.
    established: bool,
}

/// The session state machine task.
pub struct Session {
    catalog: Arc<Catalog>,
    to_link: mpsc::Sender<Packet>,
    from_link: mpsc::Receiver<LinkEvent>,
    to_bus: mpsc::Sender<BusMessage>,
    from_bus: mpsc::Receiver<BusMessage>,

    flight_stats: Arc<Definition>,
    gcs_stats: Arc<Definition>,
    session_managing: Arc<Definition>,
    object_persistence: Arc<Definition>,

    state: State,
    /// Session id agreed with the controller; survives a controller-side
    /// re-handshake, cleared on link loss.
    established: Option<u16>,
}

impl Session {
    pub fn new(
        catalog: Arc<Catalog>,
        to_link: mpsc::Sender<Packet>,
        from_link: mpsc::Receiver<LinkEvent>,
        to_bus: mpsc::Sender<BusMessage>,
        from_bus: mpsc::Receiver<BusMessage>,
    ) -> Result<Self, SessionError> {
        let well_known = |name: &'static str| {
            catalog
                .by_name(name)
                .cloned()
                .ok_or(SessionError::MissingWellKnown(name))
        };

        Ok(Self {
            flight_stats: well_known(FLIGHT_TELEMETRY_STATS)?,
            gcs_stats: well_known(GCS_TELEMETRY_STATS)?,
            session_managing: well_known(SESSION_MANAGING)?,
            object_persistence: well_known(OBJECT_PERSISTENCE)?,
            catalog,
            to_link,
            from_link,
            to_bus,
            from_bus,
            state: State::Idle,
            established: None,
        })
    }

    pub async fn run(mut self) {
        let mut handshake = tokio::time::interval(HANDSHAKE_RETRY);
        handshake.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            let deadline = match &self.state {
                State::Quiescent { until, .. } => Some(*until),
                State::Publishing { next_at, .. } => Some(*next_at),
                _ => None,
            };

            tokio::select! {
                event = self.from_link.recv() => match event {
                    None => return,
                    Some(LinkEvent::Up) => {
                        self.enter_not_connected();
                        handshake.reset();
                    }
                    Some(LinkEvent::Down) => {
                        info!("link down, discarding session state");
                        self.state = State::Idle;
                        self.established = None;
                    }
                    Some(LinkEvent::Packet(packet)) => self.handle_link_packet(packet).await,
                },
                message = self.from_bus.recv() => match message {
                    None => return,
                    Some(message) => self.handle_bus_message(message),
                },
                _ = handshake.tick(), if matches!(self.state, State::NotConnected) => {
                    self.send_gcs_stats("HandshakeReq");
                }
                _ = sleep_until_or_pending(deadline), if deadline.is_some() => {
                    self.advance_timer().await;
                }
            }
        }
    }

    fn enter_not_connected(&mut self) {
        info!("handshaking with flight controller");
        self.state = State::NotConnected;
        self.send_gcs_stats("HandshakeReq");
    }

    async fn handle_link_packet(&mut self, packet: Packet) {
        match self.state {
            State::NotConnected => self.on_not_connected(packet),
            State::Enumerating(_) => self.on_enumerating(packet),
            State::Stream => self.on_stream(packet).await,
            State::Idle | State::Quiescent { .. } | State::Publishing { .. } => {
                debug!(object = %packet.definition.name, "packet ignored in current state");
            }
        }
    }

    fn on_not_connected(&mut self, packet: Packet) {
        if packet.definition.object_id != self.flight_stats.object_id {
            return;
        }
        match status(&packet) {
            "Disconnected" => self.send_gcs_stats("HandshakeReq"),
            "HandshakeAck" => self.send_gcs_stats("Connected"),
            "Connected" => {
                info!("controller connected, negotiating session");
                self.state = State::Enumerating(Enumeration {
                    session_id: 0,
                    current_object: 0,
                    number_of_objects: 0,
                    started: Instant::now(),
                    active: Vec::new(),
                    established: false,
                });
                self.send_link(Packet::new(
                    self.session_managing.clone(),
                    Cmd::ObjectRequest,
                    0,
                    ObjectData::new(),
                ));
            }
            _ => {}
        }
    }

    fn on_enumerating(&mut self, packet: Packet) {
        if packet.definition.object_id == self.flight_stats.object_id
            && status(&packet) == "Disconnected"
        {
            self.enter_not_connected();
            return;
        }
        if packet.definition.object_id != self.session_managing.object_id {
            return;
        }

        let State::Enumerating(mut en) = std::mem::replace(&mut self.state, State::Idle) else {
            return;
        };

        match packet.cmd {
            Cmd::ObjectCmd | Cmd::ObjectCmdWithAck => {
                let number = field_u64(&packet.data, "NumberOfObjects") as u8;
                if en.number_of_objects == 0 && number != 0 {
                    en.number_of_objects = number;
                }

                if packet.cmd == Cmd::ObjectCmdWithAck {
                    self.send_link(Packet::new(
                        self.session_managing.clone(),
                        Cmd::ObjectAck,
                        0,
                        ObjectData::new(),
                    ));
                }

                // A controller that still holds our previous session id is
                // resuming; skip re-enumeration.
                let reported = field_u64(&packet.data, "SessionID") as u16;
                if !en.established && self.established == Some(reported) {
                    info!(session_id = reported, "session resumed");
                    self.state = State::Stream;
                    return;
                }

                let described = field_u64(&packet.data, "ObjectID") as u32;
                if described != 0 {
                    match self.catalog.by_id(ObjectId(described)) {
                        Some(definition) => {
                            if !en.active.iter().any(|d| d.object_id.0 == described) {
                                en.active.push(definition.clone());
                            }
                        }
                        None => warn!(object_id = described, "controller described unknown object"),
                    }
                }

                if en.current_object == 0 {
                    en.session_id = unix_seconds() as u16;
                    en.started = Instant::now();
                    en.established = true;
                    self.established = Some(en.session_id);
                    info!(session_id = en.session_id, "session established");
                }

                self.send_link(self.session_managing_step(en.session_id, en.current_object));
                en.current_object = en.current_object.saturating_add(1);

                if en.number_of_objects != 0 && en.current_object >= en.number_of_objects {
                    info!(objects = en.active.len(), "enumeration complete");
                    self.state = State::Quiescent {
                        until: en.started + QUIESCENCE,
                        active: en.active,
                    };
                    return;
                }
            }
            Cmd::ObjectAck => debug!("session managing acked"),
            Cmd::ObjectNack => warn!("session managing nacked"),
            Cmd::ObjectRequest => {}
        }

        self.state = State::Enumerating(en);
    }

    async fn advance_timer(&mut self) {
        match std::mem::replace(&mut self.state, State::Idle) {
            State::Quiescent { active, .. } => {
                self.state = State::Publishing {
                    pending: active.into(),
                    next_at: Instant::now(),
                };
            }
            State::Publishing { mut pending, .. } => {
                if let Some(definition) = pending.pop_front() {
                    self.configure_telemetry(&definition).await;
                }
                if pending.is_empty() {
                    info!("telemetry configured, streaming");
                    self.state = State::Stream;
                } else {
                    self.state = State::Publishing {
                        pending,
                        next_at: Instant::now() + META_PACING,
                    };
                }
            }
            other => self.state = other,
        }
    }

    /// Send the Meta setter for one active definition and publish both the
    /// definition and its Meta to the dispatcher.
    async fn configure_telemetry(&mut self, definition: &Arc<Definition>) {
        let Some(meta) = self.catalog.by_id(definition.meta_id()).cloned() else {
            warn!(object = %definition.name, "definition has no Meta companion");
            return;
        };

        let mut modes = 0u8;
        if definition.telemetry_flight.acked {
            modes |= MODE_FLIGHT_ACKED;
        }
        if definition.telemetry_gcs.acked {
            modes |= MODE_GCS_ACKED;
        }

        let data = json!({
            "modes": modes,
            "periodFlight": 0,
            "periodGCS": 0,
            "periodLog": 0,
        });
        self.send_link(Packet::new(meta.clone(), Cmd::ObjectCmd, 0, into_map(data)));

        self.publish(definition.clone()).await;
        self.publish(meta).await;
    }

    async fn on_stream(&mut self, packet: Packet) {
        let definition = packet.definition.clone();

        match packet.cmd {
            Cmd::ObjectCmd | Cmd::ObjectCmdWithAck => {
                if packet.cmd == Cmd::ObjectCmdWithAck {
                    self.send_link(Packet::new(
                        definition.clone(),
                        Cmd::ObjectAck,
                        packet.instance_id,
                        ObjectData::new(),
                    ));
                }

                let disconnected = definition.object_id == self.flight_stats.object_id
                    && status(&packet) == "Disconnected";

                let _ = self
                    .to_bus
                    .send(BusMessage::Update(Update {
                        object_id: definition.object_id,
                        instance_id: packet.instance_id,
                        data: packet.data,
                    }))
                    .await;

                if disconnected {
                    info!("controller disconnected, restarting handshake");
                    self.enter_not_connected();
                }
            }
            Cmd::ObjectAck => {
                // An acked settings write is worth persisting to the
                // controller's non-volatile storage.
                if definition.settings
                    && definition.object_id != self.object_persistence.object_id
                {
                    let data = json!({
                        "ObjectID": definition.object_id.0,
                        "InstanceID": packet.instance_id,
                        "Selection": "SingleObject",
                        "Operation": "Save",
                    });
                    self.send_link(Packet::new(
                        self.object_persistence.clone(),
                        Cmd::ObjectCmdWithAck,
                        0,
                        into_map(data),
                    ));
                } else {
                    debug!(object = %definition.name, "ack consumed");
                }
            }
            Cmd::ObjectNack => debug!(object = %definition.name, "nack consumed"),
            Cmd::ObjectRequest => {}
        }
    }

    fn handle_bus_message(&mut self, message: BusMessage) {
        if !matches!(self.state, State::Stream) {
            debug!("bus message dropped, session not streaming");
            return;
        }
        match message {
            BusMessage::Update(update) => {
                let Some(definition) = self.catalog.by_id(update.object_id).cloned() else {
                    warn!(object_id = %update.object_id, "update for unknown object");
                    return;
                };
                let cmd = if definition.telemetry_flight.acked {
                    Cmd::ObjectCmdWithAck
                } else {
                    Cmd::ObjectCmd
                };
                self.send_link(Packet::new(definition, cmd, update.instance_id, update.data));
            }
            BusMessage::Request(Request { object_id, instance_id }) => {
                let Some(definition) = self.catalog.by_id(object_id).cloned() else {
                    warn!(object_id = %object_id, "request for unknown object");
                    return;
                };
                self.send_link(Packet::new(
                    definition,
                    Cmd::ObjectRequest,
                    instance_id,
                    ObjectData::new(),
                ));
            }
            BusMessage::Definition(_) | BusMessage::Subscription(_) | BusMessage::Unsubscription(_) => {}
        }
    }

    fn send_gcs_stats(&self, status: &str) {
        let data = json!({
            "Status": status,
            "TxDataRate": 0.0,
            "RxDataRate": 0.0,
            "TxFailures": 0,
            "RxFailures": 0,
            "TxRetries": 0,
        });
        self.send_link(Packet::new(self.gcs_stats.clone(), Cmd::ObjectCmd, 0, into_map(data)));
    }

    fn session_managing_step(&self, session_id: u16, object_of_interest: u8) -> Packet {
        let data = json!({
            "SessionID": session_id,
            "ObjectID": 0,
            "ObjectInstances": 0,
            "NumberOfObjects": 0,
            "ObjectOfInterestIndex": object_of_interest,
        });
        Packet::new(self.session_managing.clone(), Cmd::ObjectCmd, 0, into_map(data))
    }

    fn send_link(&self, packet: Packet) {
        if self.to_link.try_send(packet).is_err() {
            warn!("writer queue full, dropping outbound packet");
        }
    }

    async fn publish(&self, definition: Arc<Definition>) {
        let _ = self.to_bus.send(BusMessage::Definition(definition)).await;
    }
}

async fn sleep_until_or_pending(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn status(packet: &Packet) -> &str {
    packet
        .data
        .get("Status")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
}

fn field_u64(data: &ObjectData, name: &str) -> u64 {
    data.get(name).and_then(|v| v.as_u64()).unwrap_or(0)
}

fn unix_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn into_map(value: serde_json::Value) -> ObjectData {
    match value {
        serde_json::Value::Object(map) => map,
        _ => ObjectData::new(),
    }
}
