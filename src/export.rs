use chrono::{DateTime, SecondsFormat, Utc};
use csv::Writer;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use crate::error::Result;
use crate::packet::Packet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ExportFormat {
    Json,
    Csv,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Csv => "csv",
        }
    }
}

/// `netsentry_capture_<timestamp>.<ext>` with ':' and '.' made file-name safe.
pub fn default_file_name(now: DateTime<Utc>, format: ExportFormat) -> String {
    let stamp = now
        .to_rfc3339_opts(SecondsFormat::Millis, true)
        .replace([':', '.'], "-");
    format!("netsentry_capture_{}.{}", stamp, format.extension())
}

/// Pretty-printed JSON array, one object per packet.
pub fn write_json<W: Write>(packets: &[Arc<Packet>], writer: W) -> Result<()> {
    let records: Vec<&Packet> = packets.iter().map(Arc::as_ref).collect();
    serde_json::to_writer_pretty(writer, &records)?;
    Ok(())
}

/// Header row plus one record per packet.
pub fn write_csv<W: Write>(packets: &[Arc<Packet>], writer: W) -> Result<()> {
    let mut writer = Writer::from_writer(writer);
    for packet in packets {
        writer.serialize(packet.as_ref())?;
    }
    writer.flush()?;
    Ok(())
}

pub fn export_to_file(packets: &[Arc<Packet>], path: &Path, format: ExportFormat) -> Result<()> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);

    match format {
        ExportFormat::Json => write_json(packets, &mut writer)?,
        ExportFormat::Csv => write_csv(packets, &mut writer)?,
    }
    writer.flush()?;

    info!("Exported {} packets to {}", packets.len(), path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::Protocol;
    use chrono::TimeZone;
    use std::net::Ipv4Addr;

    fn packets() -> Vec<Arc<Packet>> {
        (1..=3)
            .map(|id| {
                Arc::new(Packet {
                    id,
                    timestamp: 1_700_000_000_000 + id as i64,
                    source_ip: Ipv4Addr::new(192, 168, 1, id as u8),
                    source_port: 40000 + id as u16,
                    dest_ip: Ipv4Addr::new(1, 1, 1, 1),
                    dest_port: 53,
                    protocol: Protocol::Udp,
                    length: 40,
                    payload: vec![0x0F, id as u8],
                })
            })
            .collect()
    }

    #[test]
    fn test_default_file_name() {
        let now = Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        assert_eq!(
            default_file_name(now, ExportFormat::Json),
            "netsentry_capture_2024-03-09T14-05-07-000Z.json"
        );
    }

    #[test]
    fn test_json_export_preserves_packets() {
        let packets = packets();
        let mut buffer = Vec::new();
        write_json(&packets, &mut buffer).unwrap();

        let parsed: Vec<Packet> = serde_json::from_slice(&buffer).unwrap();
        assert_eq!(parsed.len(), 3);
        assert_eq!(&parsed[2], packets[2].as_ref());

        let text = String::from_utf8(buffer).unwrap();
        assert!(text.contains("\"destIp\": \"1.1.1.1\""));
        assert!(text.contains("\"payload\": \"0F01\""));
    }

    #[test]
    fn test_csv_export() {
        let mut buffer = Vec::new();
        write_csv(&packets(), &mut buffer).unwrap();
        let text = String::from_utf8(buffer).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(
            lines[0],
            "id,timestamp,sourceIp,sourcePort,destIp,destPort,protocol,length,payload"
        );
        assert_eq!(lines[1], "1,1700000000001,192.168.1.1,40001,1.1.1.1,53,UDP,40,0F01");
    }

    #[test]
    fn test_export_empty_capture_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.json");
        export_to_file(&[], &path, ExportFormat::Json).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "[]");
    }
}
