//! Shared helpers for driving external command-line tools.

use std::io::ErrorKind;
use std::process::{Output, Stdio};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Run `program args...`, optionally feeding `stdin`, and capture its output.
///
/// Stdin is written while the output is drained, so a child that exits
/// without reading its input still yields its own status and stderr. The
/// exit status is not inspected; callers decide what a failure means.
pub async fn capture(
    program: &str,
    args: &[String],
    stdin: Option<&[u8]>,
) -> std::io::Result<Output> {
    let mut child = Command::new(program)
        .args(args)
        .stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;

    let pipe = child.stdin.take();
    let feed = async move {
        let (Some(data), Some(mut pipe)) = (stdin, pipe) else {
            return;
        };
        match pipe.write_all(data).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::BrokenPipe => {
                tracing::debug!(program, "child closed stdin before reading all input");
            }
            Err(e) => tracing::warn!(program, error = %e, "failed to write child stdin"),
        }
        // pipe is dropped here, closing stdin
    };

    let ((), output) = tokio::join!(feed, child.wait_with_output());
    output
}

/// Render a command line for log and error messages.
pub fn describe(program: &str, args: &[String]) -> String {
    let mut line = program.to_string();
    for arg in args {
        line.push(' ');
        line.push_str(arg);
    }
    line
}

/// Convert a list of string slices into owned arguments.
pub fn args<const N: usize>(parts: [&str; N]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}
