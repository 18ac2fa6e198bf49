use chrono::Utc;
use rand::prelude::*;
use std::net::Ipv4Addr;
use tracing::debug;

use crate::packet::{Packet, Protocol};

pub const MIN_PACKET_LENGTH: u16 = 40;
pub const MAX_PACKET_LENGTH: u16 = 1500;
/// Most payload bytes ever captured for one packet
pub const MAX_PAYLOAD_CAP: usize = 256;
pub const DEFAULT_PAYLOAD_CAP: usize = MAX_PAYLOAD_CAP;

/// Entropy source handed to a generator owned by a long-lived session
pub type BoxedRng = Box<dyn RngCore + Send>;

/// Produces one plausible but fake packet per call.
///
/// The randomness source is injected so tests can drive it from a seeded
/// `StdRng`. The id counter belongs to the caller.
pub struct TrafficGenerator<R> {
    rng: R,
    payload_cap: usize,
}

impl<R: Rng> TrafficGenerator<R> {
    pub fn new(rng: R) -> Self {
        Self::with_payload_cap(rng, DEFAULT_PAYLOAD_CAP)
    }

    /// Caps above `MAX_PAYLOAD_CAP` are clamped to it.
    pub fn with_payload_cap(rng: R, payload_cap: usize) -> Self {
        Self {
            rng,
            payload_cap: payload_cap.min(MAX_PAYLOAD_CAP),
        }
    }

    pub fn payload_cap(&self) -> usize {
        self.payload_cap
    }

    /// Increment `counter` and build the packet carrying the new id.
    pub fn generate(&mut self, counter: &mut u64) -> Packet {
        *counter += 1;

        let is_incoming = self.rng.r#gen::<f64>() > 0.4;

        let protocol = Protocol::from_roll(self.rng.r#gen::<f64>());
        let mut source_port: u16 = self.rng.gen_range(1024..=65535);
        let mut dest_port = protocol.well_known_port().unwrap_or(80);

        // Incoming flows show the server port on the source side
        if is_incoming {
            std::mem::swap(&mut source_port, &mut dest_port);
        }

        let length = self.rng.gen_range(MIN_PACKET_LENGTH..=MAX_PACKET_LENGTH);

        let (source_ip, dest_ip) = if is_incoming {
            let source = self.public_address();
            (source, self.private_address())
        } else {
            let source = self.private_address();
            (source, self.public_address())
        };

        let mut payload = vec![0u8; (length as usize).min(self.payload_cap)];
        self.rng.fill_bytes(&mut payload);

        let packet = Packet {
            id: *counter,
            timestamp: Utc::now().timestamp_millis(),
            source_ip,
            source_port,
            dest_ip,
            dest_port,
            protocol,
            length,
            payload,
        };

        debug!(
            "Generated packet {}: {} {}:{} -> {}:{} ({} bytes, {} captured)",
            packet.id,
            packet.protocol,
            packet.source_ip,
            packet.source_port,
            packet.dest_ip,
            packet.dest_port,
            packet.length,
            packet.payload.len()
        );

        packet
    }

    /// Host on a private-looking LAN: 192.168.1.0/24 or a random 10.x.0.0/24.
    fn private_address(&mut self) -> Ipv4Addr {
        let [first, second, third] = if self.rng.r#gen::<f64>() > 0.5 {
            [192, 168, 1]
        } else {
            [10, self.rng.r#gen::<u8>(), 0]
        };
        Ipv4Addr::new(first, second, third, self.rng.gen_range(1..=254))
    }

    fn public_address(&mut self) -> Ipv4Addr {
        Ipv4Addr::new(
            self.rng.gen_range(1..=200),
            self.rng.r#gen(),
            self.rng.r#gen(),
            self.rng.gen_range(1..=254),
        )
    }
}
