//! The fanout hub.
//!
//! A single task owns the subscription registry (and through it the string
//! pool). Connections register an outbound frame sender and issue
//! subscribe/unsubscribe/publish commands; the broker client feeds received
//! messages in. Because every mutation funnels through this one task, the
//! registry needs no locks.

use crate::protocol::frame::{self, Opcode};
use crate::pubsub::broker::{BrokerEvent, BrokerHandle};
use crate::pubsub::envelope;
use crate::pubsub::error::BrokerError;
use crate::pubsub::registry::{Registry, SubscriberId};
use bytes::{Bytes, BytesMut};
use std::collections::HashMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// Commands processed by the hub task.
pub enum HubCommand {
    /// Attach a connection's outbound frame sender.
    Register {
        /// Connection identity.
        subscriber: SubscriberId,
        /// Channel the hub writes pre-framed bytes into.
        sender: mpsc::UnboundedSender<Bytes>,
    },
    /// Detach a connection and drop all of its subscriptions.
    Deregister {
        /// Connection identity.
        subscriber: SubscriberId,
    },
    /// Subscribe a connection to a channel.
    Subscribe {
        /// Connection identity.
        subscriber: SubscriberId,
        /// Channel name.
        channel: String,
    },
    /// Unsubscribe a connection from a channel.
    Unsubscribe {
        /// Connection identity.
        subscriber: SubscriberId,
        /// Channel name.
        channel: String,
    },
    /// Publish a payload upstream. Not delivered locally.
    Publish {
        /// Channel name.
        channel: String,
        /// Payload.
        payload: String,
    },
}

/// Cloneable handle for talking to the hub task.
#[derive(Clone)]
pub struct HubHandle {
    tx: mpsc::UnboundedSender<HubCommand>,
}

impl HubHandle {
    /// Attach a connection.
    pub fn register(&self, subscriber: SubscriberId, sender: mpsc::UnboundedSender<Bytes>) {
        let _ = self.tx.send(HubCommand::Register { subscriber, sender });
    }

    /// Detach a connection, dropping all of its subscriptions.
    pub fn deregister(&self, subscriber: SubscriberId) {
        let _ = self.tx.send(HubCommand::Deregister { subscriber });
    }

    /// Subscribe a connection to a channel.
    pub fn subscribe(&self, subscriber: SubscriberId, channel: String) {
        let _ = self.tx.send(HubCommand::Subscribe {
            subscriber,
            channel,
        });
    }

    /// Unsubscribe a connection from a channel.
    pub fn unsubscribe(&self, subscriber: SubscriberId, channel: String) {
        let _ = self.tx.send(HubCommand::Unsubscribe {
            subscriber,
            channel,
        });
    }

    /// Publish a payload upstream.
    pub fn publish(&self, channel: String, payload: String) {
        let _ = self.tx.send(HubCommand::Publish { channel, payload });
    }
}

/// Spawn the hub task.
pub fn spawn(
    broker: BrokerHandle,
    broker_events: mpsc::UnboundedReceiver<BrokerEvent>,
) -> (HubHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let hub = Hub {
        registry: Registry::new(),
        senders: HashMap::new(),
        broker,
    };
    let task = tokio::spawn(hub.run(rx, broker_events));
    (HubHandle { tx }, task)
}

struct Hub {
    registry: Registry,
    senders: HashMap<SubscriberId, mpsc::UnboundedSender<Bytes>>,
    broker: BrokerHandle,
}

impl Hub {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<HubCommand>,
        mut broker_events: mpsc::UnboundedReceiver<BrokerEvent>,
    ) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.on_command(command),
                    None => break,
                },
                event = broker_events.recv() => match event {
                    Some(BrokerEvent::Message { channel, payload }) => {
                        self.on_broker_message(&channel, &payload);
                    }
                    None => break,
                },
            }
        }
        debug!("fanout hub stopped");
    }

    fn on_command(&mut self, command: HubCommand) {
        match command {
            HubCommand::Register { subscriber, sender } => {
                self.senders.insert(subscriber, sender);
            }
            HubCommand::Deregister { subscriber } => {
                self.senders.remove(&subscriber);
                for channel in self.registry.unsubscribe_all(subscriber) {
                    self.broker_unsubscribe(&channel);
                }
            }
            HubCommand::Subscribe {
                subscriber,
                channel,
            } => {
                if self.registry.subscribe(&channel, subscriber) {
                    // First local subscriber: open the upstream edge.
                    match self.broker.subscribe(&channel) {
                        Ok(()) => {}
                        Err(BrokerError::Disconnected) => {
                            warn!(%channel, "broker disconnected, SUBSCRIBE not sent");
                        }
                        Err(error) => error!(%channel, %error, "broker SUBSCRIBE failed"),
                    }
                }
            }
            HubCommand::Unsubscribe {
                subscriber,
                channel,
            } => {
                if self.registry.unsubscribe(&channel, subscriber) {
                    self.broker_unsubscribe(&channel);
                }
            }
            HubCommand::Publish { channel, payload } => {
                match self.broker.publish(&channel, &payload) {
                    Ok(()) => {}
                    Err(BrokerError::Disconnected) => {
                        warn!(%channel, "broker disconnected, dropping publish");
                    }
                    Err(error) => error!(%channel, %error, "broker PUBLISH failed"),
                }
            }
        }
    }

    fn broker_unsubscribe(&self, channel: &str) {
        match self.broker.unsubscribe(channel) {
            Ok(()) => {}
            Err(BrokerError::Disconnected) => {
                warn!(channel, "broker disconnected, UNSUBSCRIBE not sent");
            }
            Err(error) => error!(channel, %error, "broker UNSUBSCRIBE failed"),
        }
    }

    /// Fan a broker message out to every local subscriber of its channel.
    fn on_broker_message(&mut self, channel: &str, payload: &str) {
        let members = match self.registry.subscribers_of(channel) {
            Some(members) if !members.is_empty() => members,
            _ => {
                debug!(channel, "broker message with no local subscribers");
                return;
            }
        };

        // One envelope, one frame, shared by every subscriber.
        let body = envelope::encode_broadcast(channel, payload);
        let mut framed = BytesMut::new();
        frame::encode_frame(Opcode::Text, body.as_bytes(), &mut framed);
        let framed = framed.freeze();

        for subscriber in members {
            if let Some(sender) = self.senders.get(subscriber) {
                let _ = sender.send(framed.clone());
            }
        }
    }
}
