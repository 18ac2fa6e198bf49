use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;

/// Synthetic capture record. Never mutated once generated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Packet {
    /// Monotonic capture id, starts at 1
    pub id: u64,
    /// Creation time (milliseconds since epoch)
    pub timestamp: i64,
    pub source_ip: Ipv4Addr,
    pub source_port: u16,
    pub dest_ip: Ipv4Addr,
    pub dest_port: u16,
    pub protocol: Protocol,
    /// Declared size on the wire, 40..=1500
    pub length: u16,
    /// Captured bytes, at most min(length, payload cap)
    #[serde(with = "hex_payload")]
    pub payload: Vec<u8>,
}

impl Packet {
    /// Last five digits of the timestamp, as shown in the packet list.
    pub fn short_timestamp(&self) -> String {
        format!("{:05}", self.timestamp.rem_euclid(100_000))
    }

    /// One line of the packet list: id, time, source, port, destination and protocol.
    pub fn summary(&self) -> String {
        format!(
            "{:>6}  {}  {:<15} {:>5}  {:<21} {}",
            self.id,
            self.short_timestamp(),
            self.source_ip,
            self.source_port,
            format!("{}:{}", self.dest_ip, self.dest_port),
            self.protocol,
        )
    }

    pub fn payload_hex(&self) -> String {
        hex::encode_upper(&self.payload)
    }
}

/// Protocols the traffic generator can emit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Protocol {
    Tcp,
    Udp,
    Http,
    Icmp,
    Tls,
}

impl Protocol {
    pub const ALL: [Protocol; 5] = [
        Protocol::Tcp,
        Protocol::Udp,
        Protocol::Http,
        Protocol::Icmp,
        Protocol::Tls,
    ];

    /// Map a uniform roll in [0, 1) onto the generator's protocol mix.
    pub fn from_roll(roll: f64) -> Self {
        if roll < 0.3 {
            Protocol::Http
        } else if roll < 0.5 {
            Protocol::Tls
        } else if roll < 0.7 {
            Protocol::Udp
        } else if roll < 0.8 {
            Protocol::Icmp
        } else {
            Protocol::Tcp
        }
    }

    /// Typical server-side port. TCP has none of its own.
    pub fn well_known_port(&self) -> Option<u16> {
        match self {
            Protocol::Http => Some(80),
            Protocol::Tls => Some(443),
            Protocol::Udp => Some(53),
            Protocol::Icmp => Some(0),
            Protocol::Tcp => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "TCP",
            Protocol::Udp => "UDP",
            Protocol::Http => "HTTP",
            Protocol::Icmp => "ICMP",
            Protocol::Tls => "TLS",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload bytes travel as an upper-case hex string in exported documents.
mod hex_payload {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(payload: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode_upper(payload))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        hex::decode(&text).map_err(serde::de::Error::custom)
    }
}
