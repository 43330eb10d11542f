use clap::Parser;
use miette::Result;

use flashbridge::cli::FlashArgs;

fn main() -> Result<()> {
    env_logger::init();
    let args = FlashArgs::parse();
    flashbridge::cli::run_flash(args)
}
