use std::{ffi::OsStr, process::Stdio};

use tokio::{io::AsyncWriteExt, process::Command};

use crate::{CrcError, CrcResult};

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Runs `program` with `args` and returns its standard output.
///
/// A non-zero exit status becomes [`CrcError::Command`] carrying the captured stderr.
pub async fn run_command<I, S>(program: &str, args: I) -> CrcResult<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    run_command_with_input(program, args, None).await
}

/// Runs `program` with `args`, writing `input` to its standard input.
pub async fn run_command_with_input<I, S>(
    program: &str,
    args: I,
    input: Option<&[u8]>,
) -> CrcResult<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(if input.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = command.spawn().map_err(|e| CrcError::Command {
        program: program.to_string(),
        status: "failed to spawn".to_string(),
        stderr: e.to_string(),
    })?;

    if let (Some(input), Some(mut stdin)) = (input, child.stdin.take()) {
        stdin.write_all(input).await?;
        drop(stdin);
    }

    let output = child.wait_with_output().await?;
    if !output.status.success() {
        return Err(CrcError::Command {
            program: program.to_string(),
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_command_captures_stdout() -> anyhow::Result<()> {
        let out = run_command("sh", ["-c", "echo hello"]).await?;
        assert_eq!(out.trim(), "hello");

        let out = run_command_with_input("cat", Vec::<&str>::new(), Some(b"piped")).await?;
        assert_eq!(out, "piped");
        Ok(())
    }

    #[tokio::test]
    async fn test_run_command_reports_failure() {
        let error = run_command("sh", ["-c", "echo oops >&2; exit 3"])
            .await
            .unwrap_err();

        match error {
            CrcError::Command { program, stderr, .. } => {
                assert_eq!(program, "sh");
                assert_eq!(stderr, "oops");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
