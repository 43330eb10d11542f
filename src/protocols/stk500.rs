//! STK500 protocol for AVR bootloaders (spec.md §4.3).
//!
//! Two-byte commands terminated by `CRC_EOP` (`0x20`); successful
//! responses are always the two bytes `INSYNC` (`0x14`) followed by `OK`
//! (`0x10`).

use std::time::Duration;

use log::debug;

use super::Session;
use crate::error::Error;

const CRC_EOP: u8 = 0x20;
const RESP_INSYNC: u8 = 0x14;
const RESP_OK: u8 = 0x10;
const RESP_PAIR: [u8; 2] = [RESP_INSYNC, RESP_OK];

const CMD_GET_SYNC: u8 = 0x30;
const CMD_ENTER_PROGMODE: u8 = 0x50;
const CMD_LEAVE_PROGMODE: u8 = 0x51;
const CMD_LOAD_ADDRESS: u8 = 0x55;
const CMD_PROGRAM_PAGE: u8 = 0x64;
const MEMTYPE_FLASH: u8 = 0x46;

/// ATmega328P flash page size, in bytes.
pub const PAGE_SIZE: usize = 128;

const SYNC_ATTEMPTS: u32 = 20;
const SYNC_DRAIN_TIMEOUT: Duration = Duration::from_millis(200);
const SYNC_RETRY_DELAY: Duration = Duration::from_millis(100);
const RESPONSE_TIMEOUT: Duration = Duration::from_millis(1000);

fn expect_insync(session: &mut Session<'_>) -> Result<(), Error> {
    let resp = session.read_exact(2, RESPONSE_TIMEOUT)?;
    if resp != RESP_PAIR {
        return Err(Error::ProtocolError(format!(
            "expected INSYNC/OK, got {resp:02x?}"
        )));
    }
    Ok(())
}

/// Repeatedly send `0x30 0x20` until `0x14 0x10` is observed in the
/// incoming stream (which may be preceded by garbage left over from a
/// running sketch), up to 20 attempts with a 100ms delay between tries.
pub fn get_sync(session: &mut Session<'_>) -> Result<(), Error> {
    for attempt in 1..=SYNC_ATTEMPTS {
        debug!("STK500 GetSync attempt {attempt}/{SYNC_ATTEMPTS}");
        session.write(&[CMD_GET_SYNC, CRC_EOP])?;

        match session.read_until(&RESP_PAIR, SYNC_DRAIN_TIMEOUT) {
            Ok(_) => return Ok(()),
            Err(Error::Timeout { .. }) => {
                std::thread::sleep(SYNC_RETRY_DELAY);
            }
            Err(e) => return Err(e),
        }
    }

    Err(Error::HandshakeFailed(format!(
        "no STK500 sync response after {SYNC_ATTEMPTS} attempts"
    )))
}

pub fn enter_progmode(session: &mut Session<'_>) -> Result<(), Error> {
    session.write(&[CMD_ENTER_PROGMODE, CRC_EOP])?;
    expect_insync(session)
}

pub fn leave_progmode(session: &mut Session<'_>) -> Result<(), Error> {
    session.write(&[CMD_LEAVE_PROGMODE, CRC_EOP])?;
    expect_insync(session)
}

/// Load the word address (byte address >> 1, since AVR flash is
/// word-addressed) that the next `program_page` will target.
pub fn load_address(session: &mut Session<'_>, byte_addr: u32) -> Result<(), Error> {
    let word_addr = (byte_addr >> 1) as u16;
    let [lo, hi] = word_addr.to_le_bytes();
    session.write(&[CMD_LOAD_ADDRESS, lo, hi, CRC_EOP])?;
    expect_insync(session)
}

/// Program one page of flash, starting at the address set by the last
/// `load_address` call. `data.len()` must not exceed [`PAGE_SIZE`].
pub fn program_page(session: &mut Session<'_>, data: &[u8]) -> Result<(), Error> {
    if data.len() > PAGE_SIZE {
        return Err(Error::ProtocolError(format!(
            "page of {} bytes exceeds STK500 page size {PAGE_SIZE}",
            data.len()
        )));
    }

    let n = data.len() as u16;
    let [n_lo, n_hi] = n.to_be_bytes();

    let mut frame = Vec::with_capacity(5 + data.len());
    frame.push(CMD_PROGRAM_PAGE);
    frame.push(n_lo);
    frame.push(n_hi);
    frame.push(MEMTYPE_FLASH);
    frame.extend_from_slice(data);
    frame.push(CRC_EOP);

    session.write(&frame)?;
    expect_insync(session)
}

/// Flash `image` (already parsed from Intel HEX) page by page, reporting
/// progress after each `ProgramPage`. Returns the number of pages sent.
pub fn upload_image(
    session: &mut Session<'_>,
    image: &[u8],
    mut on_progress: impl FnMut(usize, usize),
) -> Result<usize, Error> {
    get_sync(session)?;
    enter_progmode(session)?;

    let total = image.len();
    let mut written = 0usize;
    let mut pages = 0usize;

    for (page_index, chunk) in image.chunks(PAGE_SIZE).enumerate() {
        let addr = (page_index * PAGE_SIZE) as u32;
        load_address(session, addr)?;
        program_page(session, chunk)?;
        written += chunk.len();
        pages += 1;
        on_progress(written, total);
    }

    leave_progmode(session)?;

    Ok(pages)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockPort;
    use crate::port::PortHandle;

    fn scripted_device(page_count: usize) -> MockPort {
        let mut port = MockPort::new();
        port.open(115_200).unwrap();
        // GetSync response.
        port.queue_read(&RESP_PAIR);
        // EnterProgMode response.
        port.queue_read(&RESP_PAIR);
        for _ in 0..page_count {
            port.queue_read(&RESP_PAIR); // LoadAddress
            port.queue_read(&RESP_PAIR); // ProgramPage
        }
        port.queue_read(&RESP_PAIR); // LeaveProgMode
        port
    }

    #[test]
    fn uploads_1kb_image_in_8_pages() {
        let image = vec![0xAAu8; 1024];
        let mut port = scripted_device(8);

        let mut session = Session::new(&mut port);
        let mut updates = Vec::new();
        let pages = upload_image(&mut session, &image, |w, t| updates.push((w, t))).unwrap();

        assert_eq!(pages, 8);
        assert_eq!(updates.last(), Some(&(1024, 1024)));

        // Verify the wire trace matches spec.md S1: sync, enter, 8x
        // (load-address, program-page), leave.
        let written = &port.written;
        assert_eq!(&written[0..2], &[0x30, CRC_EOP]);
        assert_eq!(&written[2..4], &[0x50, CRC_EOP]);

        let mut offset = 4;
        for page in 0..8 {
            let word_addr = ((page * PAGE_SIZE) >> 1) as u16;
            let [lo, hi] = word_addr.to_le_bytes();
            assert_eq!(&written[offset..offset + 4], &[CMD_LOAD_ADDRESS, lo, hi, CRC_EOP]);
            offset += 4;

            assert_eq!(written[offset], CMD_PROGRAM_PAGE);
            assert_eq!(written[offset + 3], MEMTYPE_FLASH);
            offset += 4 + PAGE_SIZE + 1;
        }
        assert_eq!(&written[offset..offset + 2], &[0x51, CRC_EOP]);
    }

    #[test]
    fn program_page_rejects_oversize_chunk() {
        let mut port = MockPort::new();
        port.open(115_200).unwrap();
        let mut session = Session::new(&mut port);
        let err = program_page(&mut session, &[0u8; PAGE_SIZE + 1]).unwrap_err();
        assert!(matches!(err, Error::ProtocolError(_)));
    }

    #[test]
    fn get_sync_fails_after_retry_budget_exhausted() {
        let mut port = MockPort::new();
        port.open(115_200).unwrap();
        port.silent = true;

        let mut session = Session::new(&mut port);
        let err = get_sync(&mut session).unwrap_err();
        assert!(matches!(err, Error::HandshakeFailed(_)));
    }
}
