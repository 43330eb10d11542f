//! Baud Autodetect (spec.md §4.8): after an upload, sample a candidate
//! baud list for printable ASCII to re-establish a monitor session.

use std::time::{Duration, Instant};

use log::debug;

use crate::error::Error;
use crate::port::PortHandle;

/// Baud tried first, and returned if the target never writes anything.
pub const PRIMARY_DEFAULT: u32 = 115_200;

const PRIMARY_WINDOW: Duration = Duration::from_millis(2000);
const CANDIDATE_WINDOW: Duration = Duration::from_millis(800);
const PRINTABLE_THRESHOLD: f64 = 0.8;

const CANDIDATES: &[u32] = &[
    9600, 19200, 57600, 300, 1200, 2400, 4800, 14400, 28800, 38400, 56000, 76800, 230_400, 250_000,
];

fn is_printable(byte: u8) -> bool {
    matches!(byte, 0x20..=0x7E | 0x09 | 0x0A | 0x0D)
}

/// Sample `port` (already open at `baud`) for `window`, returning `None`
/// if nothing at all arrived, or `Some(ratio)` of printable bytes among
/// what did arrive.
fn sample(port: &mut dyn PortHandle, window: Duration) -> Result<Option<f64>, Error> {
    let deadline = Instant::now() + window;
    let mut total = 0usize;
    let mut printable = 0usize;

    while Instant::now() < deadline {
        let chunk = port.read_some()?;
        if chunk.is_empty() {
            // `read_some` on a real port already blocks for its read
            // timeout; this guards the in-memory test double from
            // busy-spinning for the whole window.
            std::thread::sleep(Duration::from_millis(10));
            continue;
        }
        total += chunk.len();
        printable += chunk.iter().filter(|&&b| is_printable(b)).count();
    }

    if total == 0 {
        Ok(None)
    } else {
        Ok(Some(printable as f64 / total as f64))
    }
}

/// Re-establish a monitor baud on `port`, which must start CLOSED.
/// Leaves the port OPEN at the chosen baud (spec.md §8 property 6).
pub fn detect(port: &mut dyn PortHandle) -> Result<u32, Error> {
    port.open(PRIMARY_DEFAULT)?;
    match sample(port, PRIMARY_WINDOW)? {
        None => {
            debug!("baud autodetect: silent at {PRIMARY_DEFAULT}, accepting as default");
            return Ok(PRIMARY_DEFAULT);
        }
        Some(ratio) if ratio >= PRINTABLE_THRESHOLD => {
            debug!("baud autodetect: {PRIMARY_DEFAULT} passed ({ratio:.2})");
            return Ok(PRIMARY_DEFAULT);
        }
        Some(ratio) => debug!("baud autodetect: {PRIMARY_DEFAULT} failed ({ratio:.2})"),
    }
    port.close()?;

    for &candidate in CANDIDATES {
        port.open(candidate)?;
        let verdict = sample(port, CANDIDATE_WINDOW)?;
        match verdict {
            Some(ratio) if ratio >= PRINTABLE_THRESHOLD => {
                debug!("baud autodetect: {candidate} passed ({ratio:.2})");
                return Ok(candidate);
            }
            Some(ratio) => debug!("baud autodetect: {candidate} failed ({ratio:.2})"),
            None => debug!("baud autodetect: {candidate} silent"),
        }
        port.close()?;
    }

    port.open(PRIMARY_DEFAULT)?;
    Ok(PRIMARY_DEFAULT)
}
