//! Board-specific flashing strategies (spec.md §4.7, §9).
//!
//! Modeled as a closed set of variants dispatched by [`crate::board::Family`]
//! rather than an open trait-object registry — spec.md §9 explicitly
//! calls for no extension point until more boards are needed.

use crate::board::BoardDescriptor;
use crate::error::Error;
use crate::port::PortHandle;

pub mod avr;
pub mod bossa;
pub mod esptool;
pub mod uf2;

/// A stage-labeled progress update, surfaced to the caller during prepare
/// and flash (spec.md §3, "Progress Event").
#[derive(Debug, Clone)]
pub struct Progress {
    pub percent: u8,
    pub stage: String,
}

impl Progress {
    pub fn new(percent: u8, stage: impl Into<String>) -> Self {
        Self { percent, stage: stage.into() }
    }
}

/// Callback invoked with each [`Progress`] event.
pub type ProgressSink<'a> = dyn FnMut(Progress) + 'a;

/// Outcome of a strategy's prepare phase that the Upload Manager needs to
/// act on.
pub enum PrepareOutcome {
    /// The port is ready, at the strategy's communication baud, to run
    /// the wire protocol.
    Ready,
    /// The board re-enumerated into its bootloader; the caller must
    /// acquire a new port and retry via `flash_to_bootloader`.
    NeedsNewPort,
}

/// A board-family-specific flashing strategy.
pub trait Strategy {
    /// Perform the board-specific reset ritual that brings the target
    /// into its bootloader. Not called by `flash_to_bootloader`, which
    /// assumes the port is already addressing a bootloader-mode device.
    fn prepare(
        &self,
        port: &mut dyn PortHandle,
        descriptor: &BoardDescriptor,
    ) -> Result<PrepareOutcome, Error>;

    /// Run the wire protocol against an open port to write `image`,
    /// reporting progress along the way. Returns with the port CLOSED,
    /// per spec.md §8 property 6.
    fn flash(
        &self,
        port: &mut dyn PortHandle,
        image: &[u8],
        descriptor: &BoardDescriptor,
        progress: &mut ProgressSink<'_>,
    ) -> Result<(), Error>;

    /// The baud rate the wire protocol communicates at.
    fn communication_baud(&self) -> u32;
}
