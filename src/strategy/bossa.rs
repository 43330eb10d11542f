//! BOSSA strategy: 1200-bps touch, reconnect at 230400, SAM-BA upload,
//! jump (spec.md §4.7).

use crate::board::{BoardDescriptor, Family};
use crate::error::Error;
use crate::port::{lookup_port_info, PortHandle};
use crate::protocols::bossa as wire;
use crate::reset::touch_1200bps;

use super::{PrepareOutcome, Progress, ProgressSink, Strategy};

/// Communication baud for the SAM-BA handshake and chunked writes.
pub const BAUD: u32 = 230_400;

pub struct BossaStrategy;

impl Strategy for BossaStrategy {
    fn prepare(
        &self,
        port: &mut dyn PortHandle,
        descriptor: &BoardDescriptor,
    ) -> Result<PrepareOutcome, Error> {
        debug_assert!(matches!(
            descriptor.family,
            Family::BossaRenesas | Family::BossaSamd
        ));

        let already_in_bootloader = descriptor
            .bootloader_identity
            .map(|expected| {
                let observed = port.info();
                observed.vendor_id == expected.vendor_id
                    && observed.product_id == expected.product_id
            })
            .unwrap_or(false);

        if already_in_bootloader {
            return Ok(PrepareOutcome::Ready);
        }

        touch_1200bps(port)?;
        Ok(PrepareOutcome::NeedsNewPort)
    }

    fn flash(
        &self,
        port: &mut dyn PortHandle,
        image: &[u8],
        descriptor: &BoardDescriptor,
        progress: &mut ProgressSink<'_>,
    ) -> Result<(), Error> {
        if image.is_empty() {
            return Err(Error::InvalidArtifact("firmware image is empty".into()));
        }
        if image.len() as u32 > descriptor.flash_capacity {
            return Err(Error::InvalidArtifact(format!(
                "firmware image ({} bytes) exceeds board flash capacity ({} bytes)",
                image.len(),
                descriptor.flash_capacity
            )));
        }

        if !port.is_open() {
            port.open(BAUD)?;
        }

        let flash_base = descriptor.flash_base;
        let mut session = crate::protocols::Session::new(port);
        let result = wire::upload_image(&mut session, image, flash_base, |written, total| {
            let percent = ((written as f64 / total as f64) * 100.0) as u8;
            progress(Progress::new(percent, "Flashing"));
        });

        port.close()?;
        result.map(|_| ())
    }

    fn communication_baud(&self) -> u32 {
        BAUD
    }
}

/// Re-resolve a port's USB identity before a retried `prepare`, the way
/// the Upload Manager does after the caller hands it a fresh port handle
/// post-re-enumeration.
pub fn refresh_port_info(port_name: &str) -> Option<crate::port::PortInfo> {
    lookup_port_info(port_name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::{BoardDescriptor, BoardId};
    use crate::mock::MockPort;
    use crate::port::PortInfo;

    #[test]
    fn skips_touch_when_already_in_bootloader() {
        let strategy = BossaStrategy;
        let descriptor =
            BoardDescriptor::resolve(&BoardId::new("arduino:renesas_uno:unor4wifi")).unwrap();

        let mut port = MockPort::new();
        port.info = PortInfo { vendor_id: 0x2341, product_id: 0x006D };

        let outcome = strategy.prepare(&mut port, &descriptor).unwrap();
        assert!(matches!(outcome, PrepareOutcome::Ready));
        assert!(port.baud_history.is_empty());
    }

    #[test]
    fn touches_when_not_yet_in_bootloader() {
        let strategy = BossaStrategy;
        let descriptor =
            BoardDescriptor::resolve(&BoardId::new("arduino:renesas_uno:unor4wifi")).unwrap();

        let mut port = MockPort::new();
        port.info = PortInfo { vendor_id: 0x2341, product_id: 0x1002 };

        let outcome = strategy.prepare(&mut port, &descriptor).unwrap();
        assert!(matches!(outcome, PrepareOutcome::NeedsNewPort));
        assert_eq!(port.baud_history, vec![1200]);
    }
}
