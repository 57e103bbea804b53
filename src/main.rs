//! pocr CLI: ingest image folders, search the extracted text.

use anyhow::Result;
use clap::Parser;
use pocr::engine::arg_parser::Cli;
use pocr::engine::handle_run;
use std::time::Instant;

fn main() -> Result<()> {
    let start_time = Instant::now();
    let cli = Cli::parse();
    handle_run(&cli)?;
    log::debug!("Total time: {:?}", start_time.elapsed());
    Ok(())
}
