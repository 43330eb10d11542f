//! Wire protocols driven over an open [`PortHandle`] (spec.md §4.3–§4.5).
//!
//! Each protocol module is a pure state machine over a [`Session`]: a
//! pending read buffer for stream-to-frame reassembly plus a monotonic
//! operation counter used only for diagnostics. A session is created at
//! strategy start and dropped on success or failure; it is never shared
//! across strategies (spec.md §3, "Protocol Session").

use std::time::{Duration, Instant};

use crate::error::Error;
use crate::port::PortHandle;

pub mod bossa;
pub mod esptool;
pub mod stk500;

/// An in-flight interaction over an open port.
pub struct Session<'p> {
    port: &'p mut dyn PortHandle,
    pending: Vec<u8>,
    op_count: u64,
}

impl<'p> Session<'p> {
    pub fn new(port: &'p mut dyn PortHandle) -> Self {
        Self { port, pending: Vec::new(), op_count: 0 }
    }

    pub fn port_mut(&mut self) -> &mut dyn PortHandle {
        self.port
    }

    pub fn write(&mut self, bytes: &[u8]) -> Result<(), Error> {
        self.op_count += 1;
        self.port.write(bytes)
    }

    /// Pull more bytes from the port into the pending buffer, returning
    /// how many new bytes arrived (0 means the read timed out).
    fn pump(&mut self) -> Result<usize, Error> {
        let bytes = self.port.read_some()?;
        let n = bytes.len();
        self.pending.extend_from_slice(&bytes);
        Ok(n)
    }

    /// Read bytes into `pending` until either `needle` is found as a
    /// contiguous subslice, or `timeout` elapses. On success, returns
    /// everything up to and including `needle` and removes it (and any
    /// preceding garbage) from `pending`.
    pub fn read_until(&mut self, needle: &[u8], timeout: Duration) -> Result<Vec<u8>, Error> {
        let deadline = Instant::now() + timeout;

        loop {
            if let Some(pos) = find_subslice(&self.pending, needle) {
                let end = pos + needle.len();
                let out = self.pending[..end].to_vec();
                self.pending.drain(..end);
                return Ok(out);
            }

            if Instant::now() >= deadline {
                return Err(Error::Timeout {
                    operation: "read_until".into(),
                    elapsed_ms: timeout.as_millis() as u64,
                });
            }

            self.pump()?;
        }
    }

    /// Read a "line": bytes up to the first byte in `terminators`, plus
    /// any further bytes immediately following that are also in
    /// `terminators` (so a `\n\r` or `\r\n` pair is consumed as one unit
    /// rather than leaking a trailing byte into the next read).
    pub fn read_terminated(&mut self, terminators: &[u8], timeout: Duration) -> Result<Vec<u8>, Error> {
        let deadline = Instant::now() + timeout;

        let end = loop {
            if let Some(pos) = self.pending.iter().position(|b| terminators.contains(b)) {
                break pos + 1;
            }
            if Instant::now() >= deadline {
                return Err(Error::Timeout {
                    operation: "read_terminated".into(),
                    elapsed_ms: timeout.as_millis() as u64,
                });
            }
            self.pump()?;
        };

        // Swallow any further terminator bytes immediately following,
        // waiting briefly in case the pair straddles two reads.
        let mut extra_end = end;
        loop {
            if extra_end < self.pending.len() {
                if terminators.contains(&self.pending[extra_end]) {
                    extra_end += 1;
                    continue;
                }
                break;
            }
            if Instant::now() >= deadline {
                break;
            }
            let got = self.pump()?;
            if got == 0 {
                break;
            }
        }

        let out = self.pending[..extra_end].to_vec();
        self.pending.drain(..extra_end);
        Ok(out)
    }

    /// Read exactly `n` bytes (blocking until `timeout` elapses).
    pub fn read_exact(&mut self, n: usize, timeout: Duration) -> Result<Vec<u8>, Error> {
        let deadline = Instant::now() + timeout;

        while self.pending.len() < n {
            if Instant::now() >= deadline {
                return Err(Error::Timeout {
                    operation: "read_exact".into(),
                    elapsed_ms: timeout.as_millis() as u64,
                });
            }
            self.pump()?;
        }

        Ok(self.pending.drain(..n).collect())
    }

    /// Discard any bytes currently buffered or arriving within `budget`.
    pub fn drain(&mut self, budget: Duration) -> Result<(), Error> {
        let deadline = Instant::now() + budget;
        self.pending.clear();
        while Instant::now() < deadline {
            self.pump()?;
        }
        self.pending.clear();
        Ok(())
    }

    pub fn op_count(&self) -> u64 {
        self.op_count
    }
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}
