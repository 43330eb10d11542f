//! Shared reset rituals used by the strategies (spec.md §4.7).
//!
//! Grounded on the `espflash` ecosystem's `connection::reset` module: a
//! small library of DTR/RTS sequences, each a plain function over a
//! [`PortHandle`] rather than a trait object, since this crate's strategy
//! set is closed (spec.md §9, "do not expose an open extension point").

use std::time::Duration;

use log::debug;
use strum::Display;

use crate::error::Error;
use crate::port::{PortHandle, Signals};

/// How long to hold each leg of a reset ritual. `Extended` is used for a
/// single automatic retry after a `HandshakeFailed` (SPEC_FULL.md,
/// "Supplemented feature: reset-strategy variants") for boards behind a
/// USB-to-serial bridge slow to release the line; it is not a
/// cross-strategy fallback, just a wider margin on the same strategy's
/// own bounded retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum ResetTiming {
    Default,
    Extended,
}

impl ResetTiming {
    /// Extra settle time added on top of each ritual's base delays.
    fn extra_delay(self) -> Duration {
        match self {
            ResetTiming::Default => Duration::ZERO,
            ResetTiming::Extended => Duration::from_millis(500),
        }
    }
}

/// 1200-bps touch: open at 1200 baud, drop DTR, close, then wait for the
/// OS to release the device. A convention USB-CDC stacks interpret as
/// "reset into bootloader".
pub fn touch_1200bps(port: &mut dyn PortHandle) -> Result<(), Error> {
    debug!("Performing 1200-bps touch");
    port.open(1200)?;
    port.set_signals(Signals::dtr(false))?;
    port.close()?;
    std::thread::sleep(Duration::from_millis(500));
    Ok(())
}

/// AVR reset: pulse DTR low then high, 100ms apart, to trigger the
/// bootloader's auto-reset-on-DTR circuit.
pub fn avr_dtr_pulse(port: &mut dyn PortHandle, timing: ResetTiming) -> Result<(), Error> {
    debug!("Performing AVR DTR pulse reset ({timing})");
    port.set_signals(Signals::dtr(false))?;
    std::thread::sleep(Duration::from_millis(100) + timing.extra_delay());
    port.set_signals(Signals::dtr(true))?;
    std::thread::sleep(Duration::from_millis(100) + timing.extra_delay());
    Ok(())
}

/// ESP32 boot-entry ritual: hold GPIO0 low across reset via inverted
/// DTR/RTS timing (spec.md §4.5).
pub fn esp32_boot_ritual(port: &mut dyn PortHandle, timing: ResetTiming) -> Result<(), Error> {
    debug!("Performing ESP32 boot-mode ritual ({timing})");
    port.set_signals(Signals::both(true, false))?;
    std::thread::sleep(Duration::from_millis(100) + timing.extra_delay());
    port.set_signals(Signals::both(false, true))?;
    std::thread::sleep(Duration::from_millis(1200) + timing.extra_delay());
    port.set_signals(Signals::both(false, false))?;
    std::thread::sleep(Duration::from_millis(100) + timing.extra_delay());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockPort;

    #[test]
    fn touch_1200bps_opens_at_1200_and_drops_dtr_before_close() {
        let mut port = MockPort::new();
        touch_1200bps(&mut port).unwrap();

        assert_eq!(port.baud_history, vec![1200]);
        assert_eq!(port.dtr_history, vec![false]);
        assert!(!port.is_open());
    }

    #[test]
    fn esp32_ritual_produces_expected_signal_sequence() {
        let mut port = MockPort::new();
        port.open(115_200).unwrap();
        esp32_boot_ritual(&mut port, ResetTiming::Default).unwrap();

        assert_eq!(port.dtr_history, vec![true, false, false]);
        assert_eq!(port.rts_history, vec![false, true, false]);
    }

    #[test]
    fn extended_timing_adds_no_extra_signal_transitions() {
        let mut port = MockPort::new();
        port.open(115_200).unwrap();
        avr_dtr_pulse(&mut port, ResetTiming::Extended).unwrap();

        assert_eq!(port.dtr_history, vec![false, true]);
    }
}
