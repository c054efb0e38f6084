use clap::Parser;
use clap::Subcommand;
use clap::ValueEnum;
use crashlog_capture::ParserKind;

pub mod parse_cmd;
pub mod report_sink;
pub mod run_cmd;

pub use parse_cmd::ParseCli;
pub use run_cmd::RunCli;

/// Capture a program's output and report it when the program fails.
#[derive(Debug, Parser)]
#[command(name = "crashlog", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run a command, mirroring its output, and write a failure report with
    /// the captured lines when it exits unsuccessfully.
    Run(RunCli),
    /// Parse lines from stdin and print the detected level and message.
    Parse(ParseCli),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ParserArg {
    Plain,
    Bracketed,
}

impl From<ParserArg> for ParserKind {
    fn from(value: ParserArg) -> Self {
        match value {
            ParserArg::Plain => ParserKind::Plain,
            ParserArg::Bracketed => ParserKind::Bracketed,
        }
    }
}

/// Runs the selected subcommand and returns the process exit code.
pub async fn dispatch(cli: Cli) -> anyhow::Result<i32> {
    match cli.command {
        Command::Run(run) => run_cmd::run(run).await,
        Command::Parse(parse) => {
            parse_cmd::run(parse)?;
            Ok(0)
        }
    }
}
