//! An in-memory [`PortHandle`] for driving protocol state machines in
//! tests, without any real hardware. Stands in for the Port Abstraction's
//! provider the way `espflash`'s test suite stands in for a physical
//! `SerialPort`.

use std::collections::VecDeque;
use std::time::Duration;

use crate::error::Error;
use crate::port::{PortHandle, PortInfo, Signals};

/// A scripted device: bytes written to the mock port are appended to
/// `written`; bytes queued in `to_read` are drained by `read_some`.
#[derive(Default)]
pub struct MockPort {
    open: bool,
    pub info: PortInfo,
    pub baud_history: Vec<u32>,
    pub written: Vec<u8>,
    pub to_read: VecDeque<u8>,
    pub dtr_history: Vec<bool>,
    pub rts_history: Vec<bool>,
    /// When set, `read_some` returns no bytes forever (simulates a silent
    /// target for baud-autodetect tests).
    pub silent: bool,
}

impl MockPort {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue bytes for a future `read_some` call to return.
    pub fn queue_read(&mut self, bytes: &[u8]) {
        self.to_read.extend(bytes.iter().copied());
    }
}

impl PortHandle for MockPort {
    fn open(&mut self, baud: u32) -> Result<(), Error> {
        if self.open {
            return Err(Error::IoFailure("mock port already open".into()));
        }
        self.open = true;
        self.baud_history.push(baud);
        Ok(())
    }

    fn close(&mut self) -> Result<(), Error> {
        self.open = false;
        Ok(())
    }

    fn set_signals(&mut self, signals: Signals) -> Result<(), Error> {
        if !self.open {
            return Err(Error::IoFailure("mock port not open".into()));
        }
        if let Some(dtr) = signals.dtr {
            self.dtr_history.push(dtr);
        }
        if let Some(rts) = signals.rts {
            self.rts_history.push(rts);
        }
        Ok(())
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), Error> {
        if !self.open {
            return Err(Error::IoFailure("mock port not open".into()));
        }
        self.written.extend_from_slice(bytes);
        Ok(())
    }

    fn read_some(&mut self) -> Result<Vec<u8>, Error> {
        if !self.open {
            return Err(Error::IoFailure("mock port not open".into()));
        }
        if self.silent || self.to_read.is_empty() {
            return Ok(Vec::new());
        }
        let n = self.to_read.len().min(256);
        Ok(self.to_read.drain(..n).collect())
    }

    fn set_read_timeout(&mut self, _timeout: Duration) -> Result<(), Error> {
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn info(&self) -> PortInfo {
        self.info
    }
}
