//! Process execution seam for the pipeline backend.

use std::io::{self, Write};
use std::process::{Command, Stdio};

/// Exit code reported when the program could not be found.
pub const EXIT_NOT_FOUND: i32 = 127;

/// Captured result of one external command.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Runs one argv to completion.
///
/// `argv[0]` is the program. Implementations never go through a shell.
/// A missing program is reported as exit code [`EXIT_NOT_FOUND`], not as an
/// `Err`; `Err` is reserved for failures to talk to the process at all.
#[cfg_attr(test, mockall::automock)]
pub trait CommandRunner {
    fn run(&self, argv: &[String], stdin: Option<Vec<u8>>) -> io::Result<CommandOutput>;
}

/// [`CommandRunner`] backed by [`std::process::Command`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemCommandRunner;

impl CommandRunner for SystemCommandRunner {
    fn run(&self, argv: &[String], stdin: Option<Vec<u8>>) -> io::Result<CommandOutput> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "empty argv"))?;

        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Ok(CommandOutput {
                    exit_code: EXIT_NOT_FOUND,
                    stdout: Vec::new(),
                    stderr: format!("{program}: command not found").into_bytes(),
                })
            }
            Err(e) => return Err(e),
        };

        if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
            if let Err(e) = pipe.write_all(&input) {
                drop(pipe);
                // Reap the child so a failed write does not leave a zombie.
                let _ = child.wait_with_output();
                return Err(e);
            }
        }

        let output = child.wait_with_output()?;
        Ok(CommandOutput {
            // Killed by a signal: no exit code.
            exit_code: output.status.code().unwrap_or(-1),
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }
}
