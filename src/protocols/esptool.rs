//! ESPTool protocol for ESP32 ROM bootloaders (spec.md §4.5).
//!
//! Frames are SLIP-encoded (`0xC0` delimiters, `0xC0`/`0xDB` escaped as
//! `0xDB 0xDC` / `0xDB 0xDD`). Each command payload is: direction byte
//! (`0x00` for requests), opcode, a little-endian data length, a
//! four-byte checksum/value field, then the data itself.

use std::time::Duration;

use log::debug;

use super::Session;
use crate::error::Error;

const SLIP_END: u8 = 0xC0;
const SLIP_ESC: u8 = 0xDB;
const SLIP_ESC_END: u8 = 0xDC;
const SLIP_ESC_ESC: u8 = 0xDD;

const DIRECTION_REQUEST: u8 = 0x00;

const OP_FLASH_BEGIN: u8 = 0x02;
const OP_FLASH_DATA: u8 = 0x03;
const OP_FLASH_END: u8 = 0x04;
const OP_SYNC: u8 = 0x08;

/// Flash write block size used by `FLASH_DATA`.
pub const BLOCK_SIZE: usize = 1024;

const SYNC_ATTEMPTS: u32 = 7;
const SYNC_DRAIN_TIMEOUT: Duration = Duration::from_millis(100);
const FLASH_BEGIN_TIMEOUT: Duration = Duration::from_secs(2);
const COMMAND_TIMEOUT: Duration = Duration::from_secs(3);

/// SLIP-encode `payload`, wrapping it in `0xC0` delimiters.
pub fn slip_encode(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 2);
    out.push(SLIP_END);
    for &b in payload {
        match b {
            SLIP_END => {
                out.push(SLIP_ESC);
                out.push(SLIP_ESC_END);
            }
            SLIP_ESC => {
                out.push(SLIP_ESC);
                out.push(SLIP_ESC_ESC);
            }
            _ => out.push(b),
        }
    }
    out.push(SLIP_END);
    out
}

/// Decode a single SLIP frame's payload (without the surrounding `0xC0`
/// delimiters).
pub fn slip_decode(frame: &[u8]) -> Result<Vec<u8>, Error> {
    let mut out = Vec::with_capacity(frame.len());
    let mut iter = frame.iter().copied();

    while let Some(b) = iter.next() {
        if b == SLIP_ESC {
            match iter.next() {
                Some(SLIP_ESC_END) => out.push(SLIP_END),
                Some(SLIP_ESC_ESC) => out.push(SLIP_ESC),
                _ => return Err(Error::ProtocolError("invalid SLIP escape sequence".into())),
            }
        } else {
            out.push(b);
        }
    }

    Ok(out)
}

fn checksum(data: &[u8]) -> u32 {
    let mut csum: u8 = 0xEF;
    for &b in data {
        csum ^= b;
    }
    csum as u32
}

fn command_frame(opcode: u8, value: u32, data: &[u8]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(8 + data.len());
    payload.push(DIRECTION_REQUEST);
    payload.push(opcode);
    payload.extend_from_slice(&(data.len() as u16).to_le_bytes());
    payload.extend_from_slice(&value.to_le_bytes());
    payload.extend_from_slice(data);
    slip_encode(&payload)
}

/// Read one complete SLIP frame (from one `0xC0` to the next) and decode
/// its payload.
fn read_frame(session: &mut Session<'_>, timeout: Duration) -> Result<Vec<u8>, Error> {
    // Skip any leading END bytes (idle line / frame boundary noise), then
    // read through to the closing END.
    loop {
        let probe = session.read_exact(1, timeout)?;
        if probe[0] != SLIP_END {
            return Err(Error::ProtocolError("expected SLIP frame start".into()));
        }
        let body = session.read_until(&[SLIP_END], timeout)?;
        let body = &body[..body.len() - 1]; // drop trailing END
        if body.is_empty() {
            continue; // a bare END..END pair, try again
        }
        return slip_decode(body);
    }
}

/// Validate a decoded response frame against the opcode it should be
/// echoing and its trailing status byte (0 = success, non-zero = the ROM
/// loader's error code). Every `FLASH_*` command reports failure this
/// way rather than by dropping the connection.
fn check_response(resp: &[u8], expected_opcode: u8) -> Result<(), Error> {
    // 8-byte header (direction, opcode, length, value) plus a 2-byte
    // status/error-code trailer is the shortest a real response gets.
    if resp.len() < 10 {
        return Err(Error::ProtocolError("response frame too short".into()));
    }
    if resp[1] != expected_opcode {
        return Err(Error::ProtocolError(format!(
            "opcode mismatch: expected {expected_opcode:#04x}, got {:#04x}",
            resp[1]
        )));
    }

    let status = resp[resp.len() - 2];
    if status != 0 {
        let error_code = resp[resp.len() - 1];
        return Err(Error::ProtocolError(format!(
            "device reported failure for opcode {expected_opcode:#04x}: status={status:#04x} error={error_code:#04x}"
        )));
    }

    Ok(())
}

/// The 36-byte auto-baud sync pattern: `07 07 12 20` followed by 32
/// repetitions of `0x55`.
fn sync_payload() -> Vec<u8> {
    let mut data = vec![0x07, 0x07, 0x12, 0x20];
    data.extend(std::iter::repeat(0x55).take(32));
    data
}

/// `SYNC` — retried up to 7 times, draining responses for ~100ms between
/// attempts.
pub fn sync(session: &mut Session<'_>) -> Result<(), Error> {
    let payload = sync_payload();

    for attempt in 1..=SYNC_ATTEMPTS {
        debug!("ESPTool SYNC attempt {attempt}/{SYNC_ATTEMPTS}");
        let frame = command_frame(OP_SYNC, 0, &payload);
        session.write(&frame)?;

        match read_frame(session, SYNC_DRAIN_TIMEOUT) {
            Ok(resp) if resp.len() >= 2 && resp[1] == OP_SYNC => return Ok(()),
            _ => session.drain(SYNC_DRAIN_TIMEOUT)?,
        }
    }

    Err(Error::HandshakeFailed(format!(
        "no SYNC response after {SYNC_ATTEMPTS} attempts"
    )))
}

/// `FLASH_BEGIN` — erase is triggered internally on the device and may
/// take a couple of seconds to acknowledge.
pub fn flash_begin(session: &mut Session<'_>, total_size: u32, offset: u32) -> Result<u32, Error> {
    let num_blocks = (total_size as usize).div_ceil(BLOCK_SIZE) as u32;

    let mut data = Vec::with_capacity(16);
    data.extend_from_slice(&total_size.to_le_bytes());
    data.extend_from_slice(&num_blocks.to_le_bytes());
    data.extend_from_slice(&(BLOCK_SIZE as u32).to_le_bytes());
    data.extend_from_slice(&offset.to_le_bytes());

    let frame = command_frame(OP_FLASH_BEGIN, 0, &data);
    session.write(&frame)?;
    let resp = read_frame(session, FLASH_BEGIN_TIMEOUT)?;
    check_response(&resp, OP_FLASH_BEGIN)?;

    Ok(num_blocks)
}

/// `FLASH_DATA` for a single block.
pub fn flash_data(session: &mut Session<'_>, seq: u32, block: &[u8]) -> Result<(), Error> {
    let mut data = Vec::with_capacity(16 + block.len());
    data.extend_from_slice(&(block.len() as u32).to_le_bytes());
    data.extend_from_slice(&seq.to_le_bytes());
    data.extend_from_slice(&0u32.to_le_bytes());
    data.extend_from_slice(&0u32.to_le_bytes());
    data.extend_from_slice(block);

    let frame = command_frame(OP_FLASH_DATA, checksum(block), &data);
    session.write(&frame)?;
    let resp = read_frame(session, COMMAND_TIMEOUT)?;
    check_response(&resp, OP_FLASH_DATA)?;
    Ok(())
}

/// `FLASH_END` — `reboot = true` reboots into the flashed application,
/// `false` stays in the ROM bootloader (run-user passthrough).
pub fn flash_end(session: &mut Session<'_>, reboot: bool) -> Result<(), Error> {
    let value = if reboot { 0u32 } else { 1u32 };
    let frame = command_frame(OP_FLASH_END, 0, &value.to_le_bytes());
    session.write(&frame)?;
    let resp = read_frame(session, COMMAND_TIMEOUT)?;
    check_response(&resp, OP_FLASH_END)?;
    Ok(())
}

/// Full ESPTool flash procedure: SYNC, FLASH_BEGIN, FLASH_DATA per block,
/// FLASH_END(reboot).
pub fn upload_image(
    session: &mut Session<'_>,
    image: &[u8],
    offset: u32,
    mut on_progress: impl FnMut(usize, usize),
) -> Result<u32, Error> {
    sync(session)?;

    let num_blocks = flash_begin(session, image.len() as u32, offset)?;

    for (seq, block) in image.chunks(BLOCK_SIZE).enumerate() {
        flash_data(session, seq as u32, block)?;
        on_progress(seq + 1, num_blocks as usize);
    }

    flash_end(session, true)?;

    Ok(num_blocks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockPort;
    use crate::port::PortHandle;

    fn ack_frame(opcode: u8) -> Vec<u8> {
        // direction=0x01 (response), opcode, size=2, value=0, data=[0,0]
        let mut payload = vec![0x01, opcode, 0x02, 0x00, 0, 0, 0, 0, 0, 0];
        payload.truncate(10);
        slip_encode(&payload)
    }

    fn fail_frame(opcode: u8) -> Vec<u8> {
        // Same shape as `ack_frame`, but status=1 (failure), error=0x05.
        let payload = vec![0x01, opcode, 0x02, 0x00, 0, 0, 0, 0, 1, 0x05];
        slip_encode(&payload)
    }

    #[test]
    fn slip_round_trips_escaped_bytes() {
        let payload = vec![0x00, 0xC0, 0x01, 0xDB, 0x02];
        let encoded = slip_encode(&payload);
        assert_eq!(encoded.first(), Some(&SLIP_END));
        assert_eq!(encoded.last(), Some(&SLIP_END));

        let inner = &encoded[1..encoded.len() - 1];
        let decoded = slip_decode(inner).unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn flashes_32kb_image_in_32_blocks() {
        let mut port = MockPort::new();
        port.open(115_200).unwrap();
        port.queue_read(&ack_frame(OP_SYNC));
        port.queue_read(&ack_frame(OP_FLASH_BEGIN));
        for _ in 0..32 {
            port.queue_read(&ack_frame(OP_FLASH_DATA));
        }
        port.queue_read(&ack_frame(OP_FLASH_END));

        let image = vec![0x11u8; 32 * BLOCK_SIZE];
        let mut session = Session::new(&mut port);
        let mut updates = Vec::new();
        let blocks =
            upload_image(&mut session, &image, 0x10000, |done, total| updates.push((done, total)))
                .unwrap();

        assert_eq!(blocks, 32);
        assert_eq!(updates.last(), Some(&(32, 32)));
    }

    #[test]
    fn sync_fails_after_retry_budget_exhausted() {
        let mut port = MockPort::new();
        port.open(115_200).unwrap();
        port.silent = true;

        let mut session = Session::new(&mut port);
        let err = sync(&mut session).unwrap_err();
        assert!(matches!(err, Error::HandshakeFailed(_)));
    }

    #[test]
    fn flash_data_rejects_device_reported_failure_status() {
        let mut port = MockPort::new();
        port.open(115_200).unwrap();
        port.queue_read(&fail_frame(OP_FLASH_DATA));

        let mut session = Session::new(&mut port);
        let err = flash_data(&mut session, 0, &[0u8; 16]).unwrap_err();
        assert!(matches!(err, Error::ProtocolError(_)));
    }

    #[test]
    fn flash_begin_rejects_opcode_mismatch() {
        let mut port = MockPort::new();
        port.open(115_200).unwrap();
        // Echoes FLASH_DATA's opcode instead of FLASH_BEGIN's.
        port.queue_read(&ack_frame(OP_FLASH_DATA));

        let mut session = Session::new(&mut port);
        let err = flash_begin(&mut session, 1024, 0x10000).unwrap_err();
        assert!(matches!(err, Error::ProtocolError(_)));
    }
}
