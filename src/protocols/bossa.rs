//! BOSSA / SAM-BA protocol for Renesas and SAMD bootloaders (spec.md §4.4).
//!
//! ASCII commands terminated by `#`; responses are lines terminated by
//! `\n`, `\r`, or a `>` prompt. The bootloader emits a short ACK after
//! every `Y...#` command that must be drained before the next command is
//! issued, or the ACK bytes contaminate the following command's response.

use std::time::Duration;

use log::debug;

use super::Session;
use crate::error::Error;

/// Reference chunk size: 4096 bytes, ~16x faster than the 256-byte page
/// size some older tooling used.
pub const CHUNK_SIZE: usize = 4096;
/// Single SRAM staging buffer used for each chunk's `S`/`Y` round trip.
pub const SRAM_BUFFER_ADDR: u32 = 0x2000_1000;

const HANDSHAKE_ACK_TIMEOUT: Duration = Duration::from_millis(200);
const VERSION_TIMEOUT: Duration = Duration::from_secs(2);
const Y_ADDRESS_ACK_TIMEOUT: Duration = Duration::from_millis(100);
const Y_FLASH_COMMIT_TIMEOUT: Duration = Duration::from_secs(5);
const ERASE_TIMEOUT: Duration = Duration::from_secs(2);
/// Gap inserted between an `S...#` command and its raw binary payload, to
/// avoid the two landing in the same USB packet on bootloaders that
/// mishandle that framing.
const S_COMMAND_GAP: Duration = Duration::from_millis(2);

const TERMINATORS: &[u8] = b"\n\r>";

fn read_line(session: &mut Session<'_>, timeout: Duration) -> Result<Vec<u8>, Error> {
    session.read_terminated(TERMINATORS, timeout)
}

/// `N#` — enter binary/normal mode. The `\n\r` ACK is optional on some
/// bootloaders, so a timeout here is tolerated rather than fatal.
pub fn enter_normal_mode(session: &mut Session<'_>) -> Result<(), Error> {
    session.write(b"N#")?;
    match read_line(session, HANDSHAKE_ACK_TIMEOUT) {
        Ok(_) | Err(Error::Timeout { .. }) => Ok(()),
        Err(e) => Err(e),
    }
}

/// `V#` — get the bootloader's version string.
pub fn get_version(session: &mut Session<'_>) -> Result<String, Error> {
    session.write(b"V#")?;
    let line = read_line(session, VERSION_TIMEOUT)?;
    Ok(String::from_utf8_lossy(&line).trim().to_string())
}

/// `I#` — optional device identify.
pub fn identify(session: &mut Session<'_>) -> Result<String, Error> {
    session.write(b"I#")?;
    let line = read_line(session, VERSION_TIMEOUT)?;
    Ok(String::from_utf8_lossy(&line).trim().to_string())
}

/// `X<addr>#` — erase flash starting at `addr`. Large regions can take
/// multiple seconds.
pub fn erase(session: &mut Session<'_>, addr: u32) -> Result<(), Error> {
    session.write(format!("X{addr:x}#").as_bytes())?;
    read_line(session, ERASE_TIMEOUT)?;
    Ok(())
}

/// `S<addr>,<size>#` followed (after a short gap) by the raw bytes.
fn write_sram(session: &mut Session<'_>, addr: u32, data: &[u8]) -> Result<(), Error> {
    session.write(format!("S{addr:x},{:x}#", data.len()).as_bytes())?;
    std::thread::sleep(S_COMMAND_GAP);
    session.write(data)
}

/// `R<addr>,<size>#` — read `size` bytes from `addr`. On SAMD
/// bootloaders, reads over 63 bytes must be split into sub-reads
/// (firmware bug in the Arduino SAMD bootloader).
pub fn read_sram(
    session: &mut Session<'_>,
    addr: u32,
    size: usize,
    samd_workaround: bool,
) -> Result<Vec<u8>, Error> {
    const SAMD_MAX_READ: usize = 63;

    if samd_workaround && size > SAMD_MAX_READ {
        let mut out = Vec::with_capacity(size);
        let mut offset = 0;
        while offset < size {
            let take = (size - offset).min(SAMD_MAX_READ);
            out.extend(read_sram(session, addr + offset as u32, take, false)?);
            offset += take;
        }
        return Ok(out);
    }

    session.write(format!("R{addr:x},{size:x}#").as_bytes())?;
    session.read_exact(size, VERSION_TIMEOUT)
}

/// `Y<src>,0#` then `Y<dst>,<size>#` — copy the staged SRAM chunk to
/// flash. Each ACK must be consumed before the next command is issued.
/// Both halves of each `Y` command are padded to 8 hex digits, matching
/// the Arduino IDE's own SAM-BA applet; a bootloader parsing fixed-width
/// fields misreads an unpadded command.
fn commit_chunk(session: &mut Session<'_>, sram_addr: u32, flash_addr: u32, size: usize) -> Result<(), Error> {
    session.write(format!("Y{sram_addr:08x},{:08x}#", 0).as_bytes())?;
    read_line(session, Y_ADDRESS_ACK_TIMEOUT)?;

    session.write(format!("Y{flash_addr:08x},{size:08x}#").as_bytes())?;
    read_line(session, Y_FLASH_COMMIT_TIMEOUT)?;

    Ok(())
}

/// `G<addr>#` — jump to `addr` and start the user application. The
/// device resets; no response is expected.
pub fn start(session: &mut Session<'_>, addr: u32) -> Result<(), Error> {
    session.write(format!("G{addr:x}#").as_bytes())
}

/// Full BOSSA flash procedure: handshake, erase, chunked write, start.
pub fn upload_image(
    session: &mut Session<'_>,
    image: &[u8],
    flash_base: u32,
    mut on_progress: impl FnMut(usize, usize),
) -> Result<usize, Error> {
    enter_normal_mode(session)?;
    std::thread::sleep(Duration::from_millis(200));

    let version = get_version(session)?;
    debug!("BOSSA bootloader version: {version}");
    let samd_workaround = version.to_lowercase().contains("arduino");

    erase(session, flash_base)?;

    let total = image.len();
    let mut written = 0usize;
    let mut chunks = 0usize;

    for (index, chunk) in image.chunks(CHUNK_SIZE).enumerate() {
        write_sram(session, SRAM_BUFFER_ADDR, chunk)?;
        let flash_addr = flash_base + (index * CHUNK_SIZE) as u32;
        commit_chunk(session, SRAM_BUFFER_ADDR, flash_addr, chunk.len())?;

        written += chunk.len();
        chunks += 1;
        on_progress(written, total);
    }

    start(session, flash_base)?;
    let _ = samd_workaround; // surfaced for read_sram callers, not used on the write path
    Ok(chunks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockPort;
    use crate::port::PortHandle;

    fn script_handshake(port: &mut MockPort) {
        port.queue_read(b"\n\r");
        port.queue_read(b"Arduino Bootloader (SAM-BA extended) 2.0\n\r");
    }

    #[test]
    fn uploads_in_4096_byte_chunks() {
        let mut port = MockPort::new();
        port.open(230_400).unwrap();
        script_handshake(&mut port);
        port.queue_read(b"\n\r"); // erase ack

        let image_len = CHUNK_SIZE * 2 + 100;
        let num_chunks = (image_len + CHUNK_SIZE - 1) / CHUNK_SIZE;
        for _ in 0..num_chunks {
            port.queue_read(b"\n\r"); // Y src ack
            port.queue_read(b"\n\r"); // Y dst ack
        }

        let image = vec![0x5Au8; image_len];
        let mut session = Session::new(&mut port);
        let mut updates = Vec::new();
        let chunks =
            upload_image(&mut session, &image, 0x4000, |w, t| updates.push((w, t))).unwrap();

        assert_eq!(chunks, num_chunks);
        assert_eq!(updates.last(), Some(&(image_len, image_len)));
    }

    #[test]
    fn commit_chunk_pads_both_y_command_halves_to_8_hex_digits() {
        let mut port = MockPort::new();
        port.open(230_400).unwrap();
        port.queue_read(b"\n\r"); // Y src ack
        port.queue_read(b"\n\r"); // Y dst ack

        let mut session = Session::new(&mut port);
        commit_chunk(&mut session, SRAM_BUFFER_ADDR, 0x4000, 0x1000).unwrap();

        let written = String::from_utf8(port.written).unwrap();
        assert_eq!(written, "Y20001000,00000000#Y00004000,00001000#");
    }

    #[test]
    fn samd_workaround_splits_large_reads() {
        let mut port = MockPort::new();
        port.open(230_400).unwrap();
        // Two sub-reads of 63 and 37 bytes for a 100-byte read.
        port.queue_read(&vec![0xAAu8; 63]);
        port.queue_read(&vec![0xBBu8; 37]);

        let mut session = Session::new(&mut port);
        let data = read_sram(&mut session, 0x2000_0000, 100, true).unwrap();
        assert_eq!(data.len(), 100);
        assert_eq!(&data[0..63], &[0xAAu8; 63][..]);
        assert_eq!(&data[63..100], &[0xBBu8; 37][..]);
    }
}
