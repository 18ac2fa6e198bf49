//! Hex / ASCII / binary rendering of captured payload bytes.

use std::fmt;

/// Bytes rendered per row
pub const ROW_WIDTH: usize = 16;

/// One 16-byte aligned line of a payload dump.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    /// 8 hex digits, zero padded
    pub offset: String,
    /// "41 42 ..." upper-case, space separated
    pub hex_text: String,
    /// Printable bytes as-is, everything else '.'
    pub ascii_text: String,
    /// "01000001 ..." space separated
    pub binary_text: String,
    pub byte_count: usize,
}

/// Split a payload into display rows. An empty payload yields no rows.
pub fn decode_rows(payload: &[u8]) -> Vec<Row> {
    payload
        .chunks(ROW_WIDTH)
        .enumerate()
        .map(|(index, chunk)| decode_row(index * ROW_WIDTH, chunk))
        .collect()
}

fn decode_row(offset: usize, chunk: &[u8]) -> Row {
    let mut hex_text = String::with_capacity(chunk.len() * 3);
    let mut binary_text = String::with_capacity(chunk.len() * 9);
    let mut ascii_text = String::with_capacity(chunk.len());

    for (i, &byte) in chunk.iter().enumerate() {
        if i > 0 {
            hex_text.push(' ');
            binary_text.push(' ');
        }
        hex_text.push_str(&format!("{:02X}", byte));
        binary_text.push_str(&format!("{:08b}", byte));
        ascii_text.push(printable(byte));
    }

    Row {
        offset: format!("{:08x}", offset),
        hex_text,
        ascii_text,
        binary_text,
        byte_count: chunk.len(),
    }
}

fn printable(byte: u8) -> char {
    if (32..=126).contains(&byte) {
        byte as char
    } else {
        '.'
    }
}

/// Classic dump layout for terminals and logs.
pub struct HexDump<'a> {
    payload: &'a [u8],
    show_binary: bool,
}

impl<'a> HexDump<'a> {
    pub fn new(payload: &'a [u8]) -> Self {
        Self {
            payload,
            show_binary: false,
        }
    }

    pub fn with_binary(mut self, show_binary: bool) -> Self {
        self.show_binary = show_binary;
        self
    }
}

impl fmt::Display for HexDump<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rows = decode_rows(self.payload);
        if rows.is_empty() {
            return writeln!(f, "No payload data.");
        }

        let hex_width = ROW_WIDTH * 3 - 1;
        writeln!(f, "{:<8}  {:<hex_width$}  ASCII", "OFFSET", "HEX")?;
        for row in &rows {
            writeln!(
                f,
                "{}  {:<hex_width$}  |{}|",
                row.offset, row.hex_text, row.ascii_text
            )?;
            if self.show_binary {
                writeln!(f, "{:8}  {}", "", row.binary_text)?;
            }
        }
        Ok(())
    }
}
