//! UF2 / Download strategy: trigger the mass-storage bootloader, then
//! hand the artifact to the host for a drag-and-drop copy (spec.md §4.6).
//!
//! The actual file delivery is a browser-hosted collaborator outside this
//! crate's scope; what belongs here is triggering the bootloader and
//! describing the artifact (bytes + suggested filename) the caller should
//! hand off.

use crate::board::BoardDescriptor;
use crate::error::Error;
use crate::port::PortHandle;
use crate::reset::touch_1200bps;

use super::{PrepareOutcome, Progress, ProgressSink, Strategy};

pub struct Uf2Strategy;

/// The artifact the caller should deliver to the host filesystem once the
/// bootloader is ready.
pub struct DownloadArtifact<'a> {
    pub bytes: &'a [u8],
    pub suggested_filename: String,
}

/// Build the download artifact for `image`, named for RP2040-class
/// boards' mass-storage bootloader.
pub fn artifact_for<'a>(image: &'a [u8]) -> DownloadArtifact<'a> {
    DownloadArtifact { bytes: image, suggested_filename: "firmware.uf2".to_string() }
}

impl Strategy for Uf2Strategy {
    fn prepare(
        &self,
        port: &mut dyn PortHandle,
        _descriptor: &BoardDescriptor,
    ) -> Result<PrepareOutcome, Error> {
        touch_1200bps(port)?;
        Ok(PrepareOutcome::NeedsNewPort)
    }

    fn flash(
        &self,
        _port: &mut dyn PortHandle,
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

        // Nothing left to drive over the wire: the artifact hand-off is
        // the caller's responsibility. Report completion immediately.
        progress(Progress::new(100, "Ready for drag-and-drop copy"));
        Ok(())
    }

    fn communication_baud(&self) -> u32 {
        // UF2 boards never speak a serial upload protocol; this value is
        // unused but kept for trait uniformity.
        1200
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::{BoardDescriptor, BoardId};
    use crate::mock::MockPort;

    #[test]
    fn flash_reports_100_percent_immediately() {
        let strategy = Uf2Strategy;
        let descriptor = BoardDescriptor::resolve(&BoardId::new("rpipico:rp2040:pico")).unwrap();
        let mut port = MockPort::new();

        let mut events = Vec::new();
        strategy
            .flash(&mut port, &[0x00, 0x01], &descriptor, &mut |p: Progress| events.push(p))
            .unwrap();

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].percent, 100);
    }

    #[test]
    fn artifact_uses_uf2_extension() {
        let data = [0u8; 4];
        let artifact = artifact_for(&data);
        assert!(artifact.suggested_filename.ends_with(".uf2"));
    }
}
