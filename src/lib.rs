//! Upload engine for flashing Arduino-family boards over a user-local
//! serial port: board dispatch, reset rituals, and the STK500/BOSSA/
//! ESPTool/UF2 wire protocols. Sketch compilation, filesystem scanning,
//! and the HTTP/terminal surfaces that drive this engine from a browser
//! are out of scope; callers provide a [`port::PortHandle`] and firmware
//! bytes and get a flashed board back.

pub mod baud;
pub mod board;
#[cfg(feature = "cli")]
pub mod cli;
pub mod error;
pub mod hex;
pub mod manager;
pub mod port;
pub mod protocols;
pub mod reset;
pub mod strategy;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use board::{BoardDescriptor, BoardId};
pub use error::{Error, Result};
pub use manager::{flash_to_bootloader, upload};
pub use port::{PortHandle, PortInfo, Signals};
pub use strategy::{Progress, ProgressSink};
