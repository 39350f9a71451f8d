//! In-process transport with fixed one-way latency.
//!
//! Messages are JSON-encoded on send and decoded on delivery, so everything
//! crossing the link goes through the same serialization a real socket would.

use std::collections::VecDeque;

use bevy::prelude::*;
use tracing::{trace, warn};

use super::{NetError, NetMessage};

#[derive(Debug, Clone)]
struct InFlight {
    deliver_at: f32,
    payload: String,
}

/// One direction of a connection. FIFO; delivery order equals send order.
#[derive(Debug, Clone, Default)]
pub struct SimulatedLink {
    latency: f32,
    clock: f32,
    in_flight: VecDeque<InFlight>,
    bytes_sent: usize,
    dropped: usize,
}

impl SimulatedLink {
    pub fn new(latency: f32) -> Self {
        Self {
            latency: latency.max(0.0),
            ..Default::default()
        }
    }

    pub fn latency(&self) -> f32 {
        self.latency
    }

    pub fn send(&mut self, message: &NetMessage) -> Result<(), NetError> {
        let payload = message.to_json()?;
        self.bytes_sent += payload.len();
        trace!(actor = message.actor().0, bytes = payload.len(), "link send");
        self.in_flight.push_back(InFlight {
            deliver_at: self.clock + self.latency,
            payload,
        });
        Ok(())
    }

    pub fn send_all(&mut self, messages: &[NetMessage]) -> Result<(), NetError> {
        messages.iter().try_for_each(|m| self.send(m))
    }

    /// Advance the link clock and return every message now due.
    /// Payloads that fail to decode are logged and skipped.
    pub fn advance(&mut self, dt: f32) -> Vec<NetMessage> {
        self.clock += dt.max(0.0);
        let mut delivered = Vec::new();
        while let Some(front) = self.in_flight.front() {
            if front.deliver_at > self.clock + f32::EPSILON {
                break;
            }
            let Some(entry) = self.in_flight.pop_front() else {
                break;
            };
            match NetMessage::from_json(&entry.payload) {
                Ok(message) => delivered.push(message),
                Err(err) => {
                    self.dropped += 1;
                    warn!(%err, bytes = entry.payload.len(), "dropping undecodable payload");
                }
            }
        }
        delivered
    }

    pub fn pending(&self) -> usize {
        self.in_flight.len()
    }

    pub fn bytes_sent(&self) -> usize {
        self.bytes_sent
    }

    /// Payloads skipped because they failed to decode.
    pub fn dropped(&self) -> usize {
        self.dropped
    }
}

/// Server/client link pair shared by the demo app.
#[derive(Resource, Debug, Default)]
pub struct NetLinks {
    pub to_server: SimulatedLink,
    pub to_client: SimulatedLink,
}

impl NetLinks {
    pub fn new(latency: f32) -> Self {
        Self {
            to_server: SimulatedLink::new(latency),
            to_client: SimulatedLink::new(latency),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::equipment::EquipmentRpc;
    use crate::net::{ActorId, ServerRpc};

    fn cycle(delta: i32) -> NetMessage {
        NetMessage::Server {
            actor: ActorId(1),
            rpc: ServerRpc::Equipment(EquipmentRpc::Cycle(delta)),
        }
    }

    #[test]
    fn test_latency_delays_delivery() {
        let mut link = SimulatedLink::new(0.1);
        link.send(&cycle(1)).unwrap();
        assert!(link.advance(0.05).is_empty());
        let delivered = link.advance(0.05);
        assert_eq!(delivered, vec![cycle(1)]);
        assert_eq!(link.pending(), 0);
    }

    #[test]
    fn test_fifo_order() {
        let mut link = SimulatedLink::new(0.0);
        link.send_all(&[cycle(1), cycle(2), cycle(3)]).unwrap();
        let delivered = link.advance(0.0);
        assert_eq!(delivered, vec![cycle(1), cycle(2), cycle(3)]);
        assert!(link.bytes_sent() > 0);
    }

    #[test]
    fn test_bad_payload_is_skipped_not_batch() {
        let mut link = SimulatedLink::new(0.0);
        link.send(&cycle(1)).unwrap();
        link.in_flight.push_back(InFlight {
            deliver_at: 0.0,
            payload: "{\"Server\":{\"garbage\":true}}".to_string(),
        });
        link.send(&cycle(2)).unwrap();

        let delivered = link.advance(0.0);
        assert_eq!(delivered, vec![cycle(1), cycle(2)]);
        assert_eq!(link.dropped(), 1);
        assert_eq!(link.pending(), 0);
    }
}
