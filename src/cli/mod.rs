//! Command-line surface for driving a manual upload (spec.md §9: this is
//! ambient tooling, not the HTTP/browser surface that spec.md excludes).
//!
//! Kept deliberately thin: a serial port, a board id, a firmware path, and
//! an optional baud override are all a manual upload needs. Board
//! discovery, sketch compilation, and persisted board configuration are
//! the server/browser collaborators' job.

use std::fs;
use std::path::PathBuf;

use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use miette::{IntoDiagnostic, Result, WrapErr};

use crate::port::SerialPortHandle;
use crate::strategy::Progress;

/// Flash firmware to an Arduino-family board over a local serial port.
#[derive(Debug, Parser)]
#[command(version, about)]
#[non_exhaustive]
pub struct FlashArgs {
    /// Serial port the board is attached to.
    #[arg(short = 'p', long, env = "FLASHBRIDGE_PORT")]
    pub port: String,
    /// Board identifier, e.g. `arduino:avr:uno`.
    #[arg(short = 'b', long)]
    pub board: String,
    /// Path to the firmware artifact (Intel HEX for AVR, raw binary
    /// otherwise).
    pub firmware: PathBuf,
    /// Skip the reset/touch prepare phase, for use against a port already
    /// known to be addressing the bootloader.
    #[arg(long)]
    pub skip_prepare: bool,
}

/// Run a flash from parsed [`FlashArgs`], reporting progress to stderr via
/// an [`indicatif`] bar, the same way the teacher's own CLI reports
/// upload progress.
pub fn run_flash(args: FlashArgs) -> Result<()> {
    let firmware = fs::read(&args.firmware)
        .into_diagnostic()
        .wrap_err_with(|| format!("failed to read '{}'", args.firmware.display()))?;

    let mut port = SerialPortHandle::new(&args.port);

    let bar = ProgressBar::new(100);
    bar.set_style(
        ProgressStyle::with_template("{msg} [{bar:40}] {percent}%")
            .unwrap()
            .progress_chars("=> "),
    );

    let mut sink = |event: Progress| {
        bar.set_message(event.stage);
        bar.set_position(event.percent as u64);
    };

    let result = if args.skip_prepare {
        crate::manager::flash_to_bootloader(&mut port, &firmware, &args.board, &mut sink)
    } else {
        crate::manager::upload(&mut port, &firmware, &args.board, &mut sink)
    };

    bar.finish_and_clear();
    result.into_diagnostic().wrap_err("upload failed")?;
    Ok(())
}
