//! Port Abstraction (spec.md §4.1).
//!
//! Hides the underlying transport behind open/close/reopen/signal/byte-I/O
//! primitives. The only implementation shipped here wraps the `serialport`
//! crate, the same dependency `espflash` uses for its own port handling;
//! a second, in-memory implementation lives in [`crate::mock`] for tests.

use std::time::Duration;

use log::debug;

use crate::error::Error;

/// DTR/RTS modem-control line levels to assert. `None` leaves a line
/// untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct Signals {
    pub dtr: Option<bool>,
    pub rts: Option<bool>,
}

impl Signals {
    pub fn dtr(level: bool) -> Self {
        Self { dtr: Some(level), rts: None }
    }

    pub fn rts(level: bool) -> Self {
        Self { dtr: None, rts: Some(level) }
    }

    pub fn both(dtr: bool, rts: bool) -> Self {
        Self { dtr: Some(dtr), rts: Some(rts) }
    }
}

/// USB vendor/product identity of an open port, when known.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PortInfo {
    pub vendor_id: u16,
    pub product_id: u16,
}

/// The Port Handle abstraction consumed by every strategy.
///
/// States: `CLOSED -> OPEN(baud) -> CLOSED`. `read`/`write`/`set_signals`
/// all require `OPEN`; callers must check `is_open()` or rely on the
/// `Err` returned by those calls.
pub trait PortHandle {
    /// Open the port at `baud`. Fails if already open.
    fn open(&mut self, baud: u32) -> Result<(), Error>;

    /// Close the port. A no-op if already closed.
    fn close(&mut self) -> Result<(), Error>;

    /// Close, wait at least 100ms for the OS to release the device, then
    /// reopen at `baud`. Must be used instead of reconfiguring an open
    /// handle in place: some USB-CDC bridges only propagate a baud change
    /// on a fresh SET_LINE_CODING control transfer.
    fn reopen_at(&mut self, baud: u32) -> Result<(), Error> {
        self.close()?;
        std::thread::sleep(Duration::from_millis(100));
        self.open(baud)
    }

    /// Assert the given DTR/RTS levels. Fails if not open.
    fn set_signals(&mut self, signals: Signals) -> Result<(), Error>;

    /// Write all of `bytes` to the port.
    fn write(&mut self, bytes: &[u8]) -> Result<(), Error>;

    /// Read up to an implementation-defined chunk of bytes. Blocks until
    /// at least one byte is available, the read timeout elapses (in which
    /// case an empty slice is returned), or an out-of-band close occurs.
    fn read_some(&mut self) -> Result<Vec<u8>, Error>;

    /// Set the timeout applied to `read_some`.
    fn set_read_timeout(&mut self, timeout: Duration) -> Result<(), Error>;

    fn is_open(&self) -> bool;

    fn info(&self) -> PortInfo;
}

/// [`PortHandle`] implementation over a real OS serial port, via the
/// `serialport` crate.
pub struct SerialPortHandle {
    name: String,
    info: PortInfo,
    inner: Option<Box<dyn serialport::SerialPort>>,
    read_timeout: Duration,
}

impl SerialPortHandle {
    /// Construct a handle for the named port. The port starts `CLOSED`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            info: PortInfo::default(),
            inner: None,
            read_timeout: Duration::from_millis(1000),
        }
    }

    /// Wrap an already-open `serialport` handle (e.g. one just acquired
    /// after a bootloader re-enumeration).
    pub fn from_open(
        name: impl Into<String>,
        port: Box<dyn serialport::SerialPort>,
        info: PortInfo,
    ) -> Self {
        Self {
            name: name.into(),
            info,
            inner: Some(port),
            read_timeout: Duration::from_millis(1000),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Record the USB identity to report from [`PortHandle::info`].
    /// `serialport`'s opened-port handle does not expose vendor/product
    /// id directly; callers resolve it once via [`lookup_port_info`] and
    /// attach it here.
    pub fn set_info(&mut self, info: PortInfo) {
        self.info = info;
    }

    fn inner_mut(&mut self) -> Result<&mut Box<dyn serialport::SerialPort>, Error> {
        self.inner
            .as_mut()
            .ok_or_else(|| Error::IoFailure(format!("port '{}' is not open", self.name)))
    }
}

impl PortHandle for SerialPortHandle {
    fn open(&mut self, baud: u32) -> Result<(), Error> {
        if self.inner.is_some() {
            return Err(Error::IoFailure(format!(
                "port '{}' is already open",
                self.name
            )));
        }

        debug!("Opening '{}' at {baud} baud", self.name);

        let port = serialport::new(&self.name, baud)
            .timeout(self.read_timeout)
            .flow_control(serialport::FlowControl::None)
            .open()?;

        self.inner = Some(port);
        Ok(())
    }

    fn close(&mut self) -> Result<(), Error> {
        debug!("Closing '{}'", self.name);
        self.inner = None;
        Ok(())
    }

    fn set_signals(&mut self, signals: Signals) -> Result<(), Error> {
        let port = self.inner_mut()?;

        if let Some(dtr) = signals.dtr {
            port.write_data_terminal_ready(dtr)?;
        }
        if let Some(rts) = signals.rts {
            port.write_request_to_send(rts)?;
        }

        Ok(())
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), Error> {
        use std::io::Write;
        let port = self.inner_mut()?;
        port.write_all(bytes)?;
        port.flush()?;
        Ok(())
    }

    fn read_some(&mut self) -> Result<Vec<u8>, Error> {
        use std::io::Read;
        let port = self.inner_mut()?;

        let mut buf = [0u8; 1024];
        match port.read(&mut buf) {
            Ok(n) => Ok(buf[..n].to_vec()),
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(Vec::new()),
            Err(e) => Err(Error::IoFailure(e.to_string())),
        }
    }

    fn set_read_timeout(&mut self, timeout: Duration) -> Result<(), Error> {
        self.read_timeout = timeout;
        if let Some(port) = self.inner.as_mut() {
            port.set_timeout(timeout)?;
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.inner.is_some()
    }

    fn info(&self) -> PortInfo {
        self.info
    }
}

/// Resolve the USB vendor/product id of a named serial port by scanning
/// the OS port list, the way `espflash::cli::connect` extracts
/// `SerialPortType::UsbPort` out of `get_serial_port_info`.
pub fn lookup_port_info(name: &str) -> Option<PortInfo> {
    let ports = serialport::available_ports().ok()?;
    let port = ports.into_iter().find(|p| p.port_name == name)?;

    match port.port_type {
        serialport::SerialPortType::UsbPort(usb) => Some(PortInfo {
            vendor_id: usb.vid,
            product_id: usb.pid,
        }),
        _ => None,
    }
}
