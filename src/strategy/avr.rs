//! AVR strategy: DTR pulse reset, then STK500 upload (spec.md §4.7).

use log::warn;

use crate::board::BoardDescriptor;
use crate::error::Error;
use crate::hex::parse_hex;
use crate::port::PortHandle;
use crate::protocols::stk500;
use crate::reset::{avr_dtr_pulse, ResetTiming};

use super::{PrepareOutcome, Progress, ProgressSink, Strategy};

/// Communication baud used for both reset and STK500 framing.
pub const BAUD: u32 = 115_200;

pub struct AvrStrategy;

impl Strategy for AvrStrategy {
    fn prepare(
        &self,
        port: &mut dyn PortHandle,
        _descriptor: &BoardDescriptor,
    ) -> Result<PrepareOutcome, Error> {
        if !port.is_open() {
            port.open(BAUD)?;
        }
        avr_dtr_pulse(port, ResetTiming::Default)?;
        Ok(PrepareOutcome::Ready)
    }

    fn flash(
        &self,
        port: &mut dyn PortHandle,
        image: &[u8],
        descriptor: &BoardDescriptor,
        progress: &mut ProgressSink<'_>,
    ) -> Result<(), Error> {
        let text = std::str::from_utf8(image)
            .map_err(|_| Error::InvalidArtifact("AVR firmware must be Intel HEX text".into()))?;
        let parsed = parse_hex(text)?;

        if parsed.bytes.is_empty() {
            return Err(Error::InvalidArtifact("firmware image is empty".into()));
        }
        if parsed.bytes.len() as u32 > descriptor.flash_capacity {
            return Err(Error::InvalidArtifact(format!(
                "firmware image ({} bytes) exceeds board flash capacity ({} bytes)",
                parsed.bytes.len(),
                descriptor.flash_capacity
            )));
        }

        if !port.is_open() {
            port.open(BAUD)?;
        }

        let result = {
            let mut session = crate::protocols::Session::new(port);
            stk500::upload_image(&mut session, &parsed.bytes, |written, total| {
                let percent = ((written as f64 / total as f64) * 100.0) as u8;
                progress(Progress::new(percent, "Flashing"));
            })
        };

        let result = match result {
            Err(Error::HandshakeFailed(reason)) => {
                warn!("STK500 handshake failed ({reason}), retrying with extended reset timing");
                avr_dtr_pulse(port, ResetTiming::Extended)?;
                let mut session = crate::protocols::Session::new(port);
                stk500::upload_image(&mut session, &parsed.bytes, |written, total| {
                    let percent = ((written as f64 / total as f64) * 100.0) as u8;
                    progress(Progress::new(percent, "Flashing"));
                })
            }
            other => other,
        };

        port.close()?;
        result.map(|_| ())
    }

    fn communication_baud(&self) -> u32 {
        BAUD
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockPort;

    fn hex_checksum(length: u8, addr: u16, rec_type: u8, data: &[u8]) -> u8 {
        let mut sum = length;
        sum = sum
            .wrapping_add((addr >> 8) as u8)
            .wrapping_add((addr & 0xff) as u8)
            .wrapping_add(rec_type);
        for &b in data {
            sum = sum.wrapping_add(b);
        }
        (!sum).wrapping_add(1)
    }

    fn data_record(addr: u16, data: &[u8]) -> String {
        let len = data.len() as u8;
        let cs = hex_checksum(len, addr, 0x00, data);
        let mut line = format!(":{len:02X}{addr:04X}00");
        for b in data {
            line.push_str(&format!("{b:02X}"));
        }
        line.push_str(&format!("{cs:02X}"));
        line
    }

    #[test]
    fn rejects_non_utf8_firmware() {
        let strategy = AvrStrategy;
        let mut port = MockPort::new();
        let descriptor = BoardDescriptor::resolve(&crate::board::BoardId::new("arduino:avr:uno")).unwrap();

        let err = strategy
            .flash(&mut port, &[0xFF, 0xFE], &descriptor, &mut |_: Progress| {})
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArtifact(_)));
    }

    #[test]
    fn flashes_small_image_end_to_end() {
        let strategy = AvrStrategy;
        let mut port = MockPort::new();
        port.open(BAUD).unwrap();
        port.queue_read(&[0x14, 0x10]); // sync
        port.queue_read(&[0x14, 0x10]); // enter progmode
        port.queue_read(&[0x14, 0x10]); // load address
        port.queue_read(&[0x14, 0x10]); // program page
        port.queue_read(&[0x14, 0x10]); // leave progmode

        let hex = data_record(0x0000, &[0xDE, 0xAD, 0xBE, 0xEF]);
        let descriptor = BoardDescriptor::resolve(&crate::board::BoardId::new("arduino:avr:uno")).unwrap();

        let mut events = Vec::new();
        strategy
            .flash(&mut port, hex.as_bytes(), &descriptor, &mut |p: Progress| {
                events.push(p)
            })
            .unwrap();

        assert!(!port.is_open());
        assert_eq!(events.last().unwrap().percent, 100);
    }

    #[test]
    fn retries_with_extended_timing_after_handshake_failure() {
        let strategy = AvrStrategy;
        let mut port = MockPort::new();
        port.open(BAUD).unwrap();
        port.silent = true; // first GetSync attempt exhausts its retry budget

        let hex = data_record(0x0000, &[0x01]);
        let descriptor = BoardDescriptor::resolve(&crate::board::BoardId::new("arduino:avr:uno")).unwrap();

        // A real device would start responding once the extended pulse
        // actually resets it; the mock can't un-silence itself mid-call,
        // so this exercises the retry path up through the second
        // get_sync attempt also failing, confirming no panic/hang and a
        // clean HandshakeFailed surfaces instead of looping forever.
        let err = strategy
            .flash(&mut port, hex.as_bytes(), &descriptor, &mut |_: Progress| {})
            .unwrap_err();
        assert!(matches!(err, Error::HandshakeFailed(_)));
        assert!(!port.is_open());
    }
}
