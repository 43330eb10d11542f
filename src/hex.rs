//! Intel HEX parser (spec.md §4.2).
//!
//! Pure, I/O-free: parses an Intel HEX text body into a contiguous,
//! zero-filled byte image plus the highest written address. Only type
//! `0x00` (data) records contribute bytes; type `0x01` (EOF) ends parsing;
//! type `0x04` (extended linear address) shifts the segment base for
//! subsequent records. Checksums are validated; a mismatch is reported as
//! [`Error::InvalidArtifact`].

use crate::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecordType {
    Data,
    EndOfFile,
    ExtendedLinearAddress,
    Other,
}

struct Record {
    ty: RecordType,
    address: u16,
    data: Vec<u8>,
}

fn hex_byte(input: &[u8], pos: usize) -> Result<u8, Error> {
    let pair = input
        .get(pos..pos + 2)
        .ok_or_else(|| Error::InvalidArtifact("truncated hex record".into()))?;
    let s = std::str::from_utf8(pair)
        .map_err(|_| Error::InvalidArtifact("non-ASCII byte in hex record".into()))?;
    u8::from_str_radix(s, 16).map_err(|_| Error::InvalidArtifact(format!("invalid hex byte '{s}'")))
}

fn parse_line(line: &str) -> Result<Option<Record>, Error> {
    let line = line.trim_end();
    if !line.starts_with(':') {
        return Ok(None);
    }
    let body = line.as_bytes();

    if body.len() < 11 {
        return Err(Error::InvalidArtifact("hex record too short".into()));
    }

    let length = hex_byte(body, 1)? as usize;
    let addr_hi = hex_byte(body, 3)?;
    let addr_lo = hex_byte(body, 5)?;
    let address = u16::from_be_bytes([addr_hi, addr_lo]);
    let rec_type = hex_byte(body, 7)?;

    let expected_len = 1 + 9 + length * 2 + 2;
    if body.len() < expected_len {
        return Err(Error::InvalidArtifact("hex record length mismatch".into()));
    }

    let mut data = Vec::with_capacity(length);
    for i in 0..length {
        data.push(hex_byte(body, 9 + i * 2)?);
    }
    let checksum = hex_byte(body, 9 + length * 2)?;

    let mut sum: u8 = length as u8;
    sum = sum.wrapping_add(addr_hi).wrapping_add(addr_lo).wrapping_add(rec_type);
    for &b in &data {
        sum = sum.wrapping_add(b);
    }
    let computed = (!sum).wrapping_add(1);
    if computed != checksum {
        return Err(Error::InvalidArtifact(format!(
            "checksum mismatch: record claims {checksum:#04x}, computed {computed:#04x}"
        )));
    }

    let ty = match rec_type {
        0x00 => RecordType::Data,
        0x01 => RecordType::EndOfFile,
        0x04 => RecordType::ExtendedLinearAddress,
        _ => RecordType::Other,
    };

    Ok(Some(Record { ty, address, data }))
}

/// Result of parsing an Intel HEX text body.
#[derive(Debug)]
pub struct HexImage {
    /// Byte image, zero-filled in gaps, sized to `max_address`.
    pub bytes: Vec<u8>,
    /// Highest (address + length) seen over any type-0 record, including
    /// any active extended-linear-address segment base.
    pub max_address: u32,
}

/// Parse an Intel HEX text body into a contiguous byte image.
pub fn parse_hex(text: &str) -> Result<HexImage, Error> {
    let mut segment_base: u32 = 0;
    let mut writes: Vec<(u32, Vec<u8>)> = Vec::new();
    let mut max_address: u32 = 0;
    let mut saw_eof = false;

    for line in text.lines() {
        if saw_eof {
            break;
        }
        let Some(record) = parse_line(line)? else {
            continue;
        };

        match record.ty {
            RecordType::Data => {
                let abs_addr = segment_base + record.address as u32;
                let end = abs_addr + record.data.len() as u32;
                max_address = max_address.max(end);
                if !record.data.is_empty() {
                    writes.push((abs_addr, record.data));
                }
            }
            RecordType::ExtendedLinearAddress => {
                if record.data.len() != 2 {
                    return Err(Error::InvalidArtifact(
                        "extended linear address record must carry 2 bytes".into(),
                    ));
                }
                let high = u16::from_be_bytes([record.data[0], record.data[1]]);
                segment_base = (high as u32) << 16;
            }
            RecordType::EndOfFile => saw_eof = true,
            RecordType::Other => {}
        }
    }

    let mut bytes = vec![0u8; max_address as usize];
    for (addr, data) in writes {
        let start = addr as usize;
        bytes[start..start + data.len()].copy_from_slice(&data);
    }

    Ok(HexImage { bytes, max_address })
}
