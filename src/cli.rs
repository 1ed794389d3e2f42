use crate::{Error, Result};

/// Options for the `run` and `status` commands; values are `None` when not provided on CLI.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RunOptions {
    pub config_path: Option<String>,
    pub icon_dir: Option<String>,
    pub interval_ms: Option<u64>,
    pub log_level: Option<String>,
    pub log_file: Option<String>,
    pub syslog: bool,
}

/// Parsed command-line intent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Run(RunOptions),
    Status(RunOptions),
    ShowHelp,
    ShowVersion,
}

impl Command {
    pub fn parse(args: &[String]) -> Result<Self> {
        if args.is_empty() {
            return Ok(Command::Run(RunOptions::default()));
        }

        let mut iter = args.iter();
        match iter.next().map(|s| s.as_str()) {
            Some("run") => Ok(Command::Run(parse_run_options(&mut iter)?)),
            Some("status") => Ok(Command::Status(parse_run_options(&mut iter)?)),
            Some("--help") | Some("-h") => Ok(Command::ShowHelp),
            Some("--version") | Some("-V") => Ok(Command::ShowVersion),
            Some(flag) if flag.starts_with('-') => {
                // `run` may be omitted: re-parse the consumed flag with the rest.
                let mut flags: Vec<String> = Vec::with_capacity(args.len());
                flags.push(flag.to_string());
                flags.extend(iter.map(|s| s.to_string()));
                let mut iter = flags.iter();
                Ok(Command::Run(parse_run_options(&mut iter)?))
            }
            Some(cmd) => Err(Error::InvalidArgs(format!(
                "unknown command '{cmd}', try --help"
            ))),
            None => Ok(Command::Run(RunOptions::default())),
        }
    }

    pub fn help() -> &'static str {
        concat!(
            "pistatus - battery/wireless overlay and power daemon\n",
            "\n",
            "USAGE:\n",
            "  pistatus run [--config <path>] [--icon-dir <path>] [--interval-ms <number>]\n",
            "               [--log-level <level>] [--log-file <path>] [--syslog]\n",
            "  pistatus status [--config <path>]\n",
            "  pistatus --help\n",
            "  pistatus --version\n",
            "\n",
            "OPTIONS:\n",
            "  --config <path>        Config file (default: ~/.pistatus/config.toml)\n",
            "  --icon-dir <path>      Directory holding the overlay PNGs\n",
            "  --interval-ms <number> Polling period (default: 5000)\n",
            "  --log-level <level>    error|warn|info|debug|trace (default: info)\n",
            "  --log-file <path>      Also append logs to this file (rotated at 100 KiB)\n",
            "  --syslog               Also send logs to the local syslog daemon\n",
            "  -h, --help             Show this help\n",
            "  -V, --version          Show version\n",
        )
    }

    pub fn print_help() {
        println!("{}", Self::help());
    }
}

fn parse_run_options(iter: &mut std::slice::Iter<String>) -> Result<RunOptions> {
    let mut opts = RunOptions::default();

    while let Some(flag) = iter.next() {
        match flag.as_str() {
            "--config" => {
                opts.config_path = Some(take_value(flag, iter)?);
            }
            "--icon-dir" => {
                opts.icon_dir = Some(take_value(flag, iter)?);
            }
            "--interval-ms" => {
                let raw = take_value(flag, iter)?;
                let interval: u64 = raw.parse().map_err(|_| {
                    Error::InvalidArgs("interval-ms must be a positive integer".to_string())
                })?;
                if interval == 0 {
                    return Err(Error::InvalidArgs(
                        "interval-ms must be a positive integer".to_string(),
                    ));
                }
                opts.interval_ms = Some(interval);
            }
            "--log-level" => {
                opts.log_level = Some(take_value(flag, iter)?);
            }
            "--log-file" => {
                opts.log_file = Some(take_value(flag, iter)?);
            }
            "--syslog" => {
                opts.syslog = true;
            }
            other => {
                return Err(Error::InvalidArgs(format!(
                    "unknown flag '{other}', try --help"
                )));
            }
        }
    }

    Ok(opts)
}

fn take_value(flag: &str, iter: &mut std::slice::Iter<String>) -> Result<String> {
    iter.next()
        .cloned()
        .ok_or_else(|| Error::InvalidArgs(format!("expected a value after {flag}")))
}
