use std::io::ErrorKind;
use std::process::{Command, Stdio};

use crate::{Error, Result};

/// Runs an external helper and hands back its stdout.
///
/// Non-zero exits become [`Error::Command`] so callers never parse a failed tool's output.
pub trait CommandRunner {
    fn run(&self, program: &str, args: &[&str]) -> Result<String>;
}

impl<T: CommandRunner + ?Sized> CommandRunner for &T {
    fn run(&self, program: &str, args: &[&str]) -> Result<String> {
        (**self).run(program, args)
    }
}

/// Executes helpers directly (no shell), inheriting the daemon's environment.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, program: &str, args: &[&str]) -> Result<String> {
        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .map_err(|err| match err.kind() {
                ErrorKind::NotFound => Error::Command(format!("{program}: not found")),
                _ => Error::Io(err),
            })?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Command(format!(
                "{} exited with {}: {}",
                describe(program, args),
                output.status,
                stderr.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

pub(crate) fn describe(program: &str, args: &[&str]) -> String {
    if args.is_empty() {
        program.to_string()
    } else {
        format!("{program} {}", args.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_program_is_a_command_error() {
        let err = SystemRunner
            .run("/nonexistent/pistatus-helper", &["--flag"])
            .unwrap_err();
        assert!(matches!(err, Error::Command(ref msg) if msg.contains("not found")));
    }

    #[cfg(unix)]
    #[test]
    fn captures_stdout_and_rejects_failure_status() {
        let out = SystemRunner.run("echo", &["temp=41.2'C"]).unwrap();
        assert_eq!(out.trim(), "temp=41.2'C");
        let err = SystemRunner.run("false", &[]).unwrap_err();
        assert!(format!("{err}").contains("false exited with"));
    }

    #[test]
    fn describe_joins_arguments() {
        assert_eq!(describe("vcgencmd", &["get_throttled"]), "vcgencmd get_throttled");
        assert_eq!(describe("hciconfig", &[]), "hciconfig");
    }
}
