use std::io;
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitStatus;
use std::process::Stdio;
use std::sync::Arc;

use anyhow::Context;
use anyhow::Result;
use clap::Parser;
use crashlog_capture::CaptureConfig;
use crashlog_capture::LogCapture;
use crashlog_capture::RequestMonitor;
use crashlog_capture::StreamKind;
use crashlog_utils_readiness::Readiness;
use tokio::io::AsyncBufReadExt;
use tokio::io::AsyncRead;
use tokio::io::BufReader;
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::warn;

use crate::ParserArg;
use crate::report_sink::JsonReportSink;

/// Exit code used when the child was killed by a signal we cannot map.
const UNKNOWN_EXIT_CODE: i32 = 1;
/// Mirrors the shell convention for signal deaths.
#[cfg(unix)]
const SIGNAL_EXIT_BASE: i32 = 128;

#[derive(Debug, Parser)]
pub struct RunCli {
    /// TOML file with capture settings.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Overrides the parser chosen in the config file.
    #[arg(long, value_enum)]
    parser: Option<ParserArg>,

    /// Where to write the failure report. Defaults to stdout.
    #[arg(long, value_name = "PATH")]
    report: Option<PathBuf>,

    /// Pretty-print the report.
    #[arg(long, default_value_t = false)]
    pretty: bool,

    /// Name recorded in the report. Defaults to the program name.
    #[arg(long)]
    name: Option<String>,

    /// Program to run, followed by its arguments.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
    command: Vec<String>,
}

pub async fn run(cli: RunCli) -> Result<i32> {
    let mut config = match &cli.config {
        Some(path) => CaptureConfig::load(path)?,
        None => CaptureConfig::default(),
    };
    if let Some(parser) = cli.parser {
        config.parser = parser.into();
    }

    let Some((program, args)) = cli.command.split_first() else {
        anyhow::bail!("no command given");
    };
    let name = cli.name.clone().unwrap_or_else(|| program.clone());

    let capture = Arc::new(LogCapture::new(config));
    let cancel = CancellationToken::new();
    let sweeper = capture.spawn_sweeper(capture.config().sweep_interval(), cancel.clone());

    let sink = Arc::new(JsonReportSink::new(cli.report.clone(), cli.pretty));
    let monitor = RequestMonitor::new(Arc::clone(&capture), sink.clone());
    let prepare = spawn_prepare(&monitor, sink).await?;

    let operation = tokio::select! {
        biased;
        operation = monitor.begin_when_ready(name.clone()) => operation,
        prepared = prepare => {
            if !prepared.context("report sink preparation panicked")?? {
                anyhow::bail!("report sink never became ready");
            }
            monitor.begin_when_ready(name).await
        }
    };

    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::inherit())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("failed to spawn {program}"))?;

    let stdout = child.stdout.take().context("child stdout was not piped")?;
    let stderr = child.stderr.take().context("child stderr was not piped")?;
    let stdout_pump = spawn_mirror(Arc::clone(&capture), StreamKind::Stdout, stdout);
    let stderr_pump = spawn_mirror(Arc::clone(&capture), StreamKind::Stderr, stderr);

    let status = child.wait().await.context("failed to wait for child")?;
    for pump in [stdout_pump, stderr_pump] {
        match pump.await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!("failed to mirror child output: {err}"),
            Err(err) => warn!("output mirror task failed: {err}"),
        }
    }

    let code = exit_code(status);
    debug!(code, "child exited");
    if status.success() {
        operation.finish();
    } else {
        operation.fail(format!("{program} exited with {status}")).await;
    }

    cancel.cancel();
    if let Err(err) = sweeper.await {
        warn!("sweeper task failed: {err}");
    }
    capture.close();
    Ok(code)
}

/// Prepares the sink in the background and marks the monitor ready once the
/// report destination exists. The task yields whether the mark took effect.
async fn spawn_prepare(
    monitor: &RequestMonitor,
    sink: Arc<JsonReportSink>,
) -> Result<JoinHandle<Result<bool>>> {
    let readiness = monitor.readiness();
    let token = readiness.subscribe().await?;
    Ok(tokio::spawn(async move {
        sink.prepare().await?;
        Ok(readiness.mark_ready(token).await?)
    }))
}

/// Copies one child stream to ours line by line through the capture's
/// interceptor, so each line becomes one entry.
fn spawn_mirror<R>(
    capture: Arc<LogCapture>,
    stream: StreamKind,
    reader: R,
) -> JoinHandle<io::Result<()>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut out: Box<dyn Write + Send> = match stream {
            StreamKind::Stdout => Box::new(capture.stdout_writer(io::stdout())),
            StreamKind::Stderr => Box::new(capture.stderr_writer(io::stderr())),
        };
        let mut reader = BufReader::new(reader);
        let mut line = Vec::new();
        loop {
            line.clear();
            if reader.read_until(b'\n', &mut line).await? == 0 {
                break;
            }
            out.write_all(&line)?;
            out.flush()?;
        }
        Ok(())
    })
}

fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return SIGNAL_EXIT_BASE + signal;
        }
    }
    UNKNOWN_EXIT_CODE
}
