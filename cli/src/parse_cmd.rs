use std::io;
use std::io::BufRead;
use std::io::Write;

use anyhow::Context;
use anyhow::Result;
use clap::Parser;
use crashlog_capture::ParserKind;

use crate::ParserArg;

#[derive(Debug, Parser)]
pub struct ParseCli {
    /// Parser to apply to each line.
    #[arg(long, value_enum, default_value_t = ParserArg::Bracketed)]
    parser: ParserArg,
}

pub fn run(cli: ParseCli) -> Result<()> {
    let parser = ParserKind::from(cli.parser).build();
    let stdin = io::stdin();
    let mut out = io::stdout().lock();
    for line in stdin.lock().lines() {
        let line = line.context("failed to read stdin")?;
        let parsed = parser.parse(&line);
        writeln!(out, "{}", serde_json::to_string(&parsed)?)?;
    }
    out.flush()?;
    Ok(())
}
