//! Boundary to the slow, fallible packet analysis collaborator.

use std::env;
use std::future::Future;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::AnalysisError;
use crate::packet::{Packet, Protocol};

/// Shown to the operator whenever analysis fails for any reason.
pub const ANALYSIS_FALLBACK: &str =
    "Error: unable to analyze packet. Check the analysis configuration.";

/// Shown while an analysis is still running.
pub const ANALYSIS_PENDING: &str = "Analyzing packet structure and payload entropy...";

/// Environment variable checked by `CredentialGate` unless told otherwise.
pub const DEFAULT_CREDENTIAL_VAR: &str = "API_KEY";

const PREVIEW_HEX_CHARS: usize = 50;

/// Turns one packet into a human-readable description.
pub trait Analyzer {
    fn analyze(
        &self,
        packet: &Packet,
    ) -> impl Future<Output = Result<String, AnalysisError>> + Send;
}

/// Brief sent to a text-generation service describing one packet.
pub struct AnalysisRequest<'a> {
    packet: &'a Packet,
}

impl<'a> AnalysisRequest<'a> {
    pub fn new(packet: &'a Packet) -> Self {
        Self { packet }
    }

    pub fn prompt(&self) -> String {
        let p = self.packet;
        let hex = p.payload_hex();
        let preview = &hex[..hex.len().min(PREVIEW_HEX_CHARS)];
        format!(
            "You are a network security expert analyzing a single packet.\n\
             Give a short technical explanation of what this traffic likely represents.\n\
             The payload is random filler in this simulation, so describe what traffic on \
             this port and protocol usually looks like instead.\n\
             \n\
             Protocol: {}\n\
             Source: {}:{}\n\
             Destination: {}:{}\n\
             Payload length: {} bytes\n\
             Payload hex preview: {}...\n\
             \n\
             Answer in at most three sentences.",
            p.protocol, p.source_ip, p.source_port, p.dest_ip, p.dest_port, p.length, preview
        )
    }
}

/// Run `analyzer` and map every failure, including a blank answer, onto
/// `ANALYSIS_FALLBACK`.
pub async fn analyze_or_fallback<A: Analyzer + ?Sized>(analyzer: &A, packet: &Packet) -> String {
    match analyzer.analyze(packet).await {
        Ok(text) if !text.trim().is_empty() => text,
        Ok(_) => {
            warn!("Analysis of packet {} failed: {}", packet.id, AnalysisError::EmptyResponse);
            ANALYSIS_FALLBACK.to_string()
        }
        Err(e) => {
            warn!("Analysis of packet {} failed: {}", packet.id, e);
            ANALYSIS_FALLBACK.to_string()
        }
    }
}

/// Analyze a copy of `packet` on its own task so capture never waits on it.
pub fn spawn_analysis<A>(analyzer: Arc<A>, packet: Packet) -> JoinHandle<String>
where
    A: Analyzer + Send + Sync + 'static,
{
    tokio::spawn(async move {
        debug!("Analysis started for packet {}", packet.id);
        analyze_or_fallback(analyzer.as_ref(), &packet).await
    })
}

/// Offline analyzer describing what traffic on the packet's protocol and
/// server port usually is.
#[derive(Debug, Default, Clone, Copy)]
pub struct PortProfileAnalyzer;

impl PortProfileAnalyzer {
    pub fn describe(packet: &Packet) -> String {
        let server_port = server_port(packet);
        let direction = if packet.source_port == server_port && packet.dest_port != server_port {
            "a server response"
        } else {
            "a client request"
        };

        let profile = match (packet.protocol, server_port) {
            (Protocol::Http, _) => {
                "Plain-text HTTP on port 80 usually carries request lines, headers and \
                 unencrypted page content, so it is readable by anyone on the path."
            }
            (Protocol::Tls, _) => {
                "TLS on port 443 carries encrypted HTTPS records; after the handshake the \
                 payload is indistinguishable from random bytes."
            }
            (Protocol::Udp, 53) => {
                "UDP on port 53 is DNS: short queries and answers resolving host names, \
                 rarely larger than a few hundred bytes."
            }
            (Protocol::Icmp, _) => {
                "ICMP has no ports; this is control traffic such as echo requests, echo \
                 replies or unreachable notices."
            }
            (Protocol::Udp, _) => {
                "Connectionless UDP datagrams, typical of streaming, gaming or discovery \
                 protocols."
            }
            (Protocol::Tcp, _) => {
                "Generic TCP segment of a connection-oriented stream; the port decides \
                 which application protocol rides on it."
            }
        };

        format!(
            "{} {}:{} -> {}:{} looks like {} ({} bytes). {}",
            packet.protocol,
            packet.source_ip,
            packet.source_port,
            packet.dest_ip,
            packet.dest_port,
            direction,
            packet.length,
            profile
        )
    }
}

impl Analyzer for PortProfileAnalyzer {
    async fn analyze(&self, packet: &Packet) -> Result<String, AnalysisError> {
        Ok(Self::describe(packet))
    }
}

fn server_port(packet: &Packet) -> u16 {
    packet
        .protocol
        .well_known_port()
        .unwrap_or_else(|| packet.source_port.min(packet.dest_port))
}

/// Refuses to analyze unless a credential environment variable is set.
pub struct CredentialGate<A> {
    inner: A,
    var: String,
}

impl<A> CredentialGate<A> {
    pub fn new(inner: A) -> Self {
        Self::with_var(inner, DEFAULT_CREDENTIAL_VAR)
    }

    pub fn with_var(inner: A, var: impl Into<String>) -> Self {
        Self {
            inner,
            var: var.into(),
        }
    }
}

impl<A: Analyzer + Sync> Analyzer for CredentialGate<A> {
    async fn analyze(&self, packet: &Packet) -> Result<String, AnalysisError> {
        match env::var(&self.var) {
            Ok(key) if !key.trim().is_empty() => self.inner.analyze(packet).await,
            _ => Err(AnalysisError::MissingCredentials(self.var.clone())),
        }
    }
}
