//! ESPTool strategy: DTR/RTS boot-mode ritual, then SYNC/FLASH_BEGIN/
//! FLASH_DATA/FLASH_END (spec.md §4.7).

use log::warn;

use crate::board::BoardDescriptor;
use crate::error::Error;
use crate::port::PortHandle;
use crate::protocols::esptool as wire;
use crate::reset::{esp32_boot_ritual, ResetTiming};

use super::{PrepareOutcome, Progress, ProgressSink, Strategy};

/// Communication baud for both the boot ritual and SYNC/FLASH_* commands.
pub const BAUD: u32 = 115_200;

pub struct EsptoolStrategy;

impl Strategy for EsptoolStrategy {
    fn prepare(
        &self,
        port: &mut dyn PortHandle,
        _descriptor: &BoardDescriptor,
    ) -> Result<PrepareOutcome, Error> {
        if !port.is_open() {
            port.open(BAUD)?;
        }
        esp32_boot_ritual(port, ResetTiming::Default)?;
        Ok(PrepareOutcome::Ready)
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

        let offset = descriptor.flash_base;
        let result = {
            let mut session = crate::protocols::Session::new(port);
            wire::upload_image(&mut session, image, offset, |sent, total| {
                let percent = ((sent as f64 / total as f64) * 100.0) as u8;
                progress(Progress::new(percent, "Flashing"));
            })
        };

        let result = match result {
            Err(Error::HandshakeFailed(reason)) => {
                warn!("ESPTool SYNC failed ({reason}), retrying boot ritual with extended timing");
                esp32_boot_ritual(port, ResetTiming::Extended)?;
                let mut session = crate::protocols::Session::new(port);
                wire::upload_image(&mut session, image, offset, |sent, total| {
                    let percent = ((sent as f64 / total as f64) * 100.0) as u8;
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
    use crate::board::{BoardDescriptor, BoardId};
    use crate::mock::MockPort;

    #[test]
    fn prepare_opens_port_and_runs_boot_ritual() {
        let strategy = EsptoolStrategy;
        let descriptor = BoardDescriptor::resolve(&BoardId::new("esp32:esp32:esp32")).unwrap();
        let mut port = MockPort::new();

        strategy.prepare(&mut port, &descriptor).unwrap();

        assert_eq!(port.baud_history, vec![BAUD]);
        assert_eq!(port.dtr_history, vec![true, false, false]);
        assert_eq!(port.rts_history, vec![false, true, false]);
    }

    #[test]
    fn rejects_empty_image() {
        let strategy = EsptoolStrategy;
        let descriptor = BoardDescriptor::resolve(&BoardId::new("esp32:esp32:esp32")).unwrap();
        let mut port = MockPort::new();
        port.open(BAUD).unwrap();

        let err = strategy
            .flash(&mut port, &[], &descriptor, &mut |_: Progress| {})
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArtifact(_)));
    }
}
