mod bridge;
mod demo;

use std::env;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};

use crate::bridge::run_bridge;

const USAGE: &str = "usage: turnstile [--port N] [--host H] [--config FILE] [--log-level L]";

/// Command-line overrides on top of the configuration files.
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct Options {
    pub(crate) host: Option<String>,
    pub(crate) port: Option<u16>,
    pub(crate) config: Option<PathBuf>,
    pub(crate) log_level: Option<String>,
    pub(crate) help: bool,
}

fn parse_args<I>(args: I) -> Result<Options>
where
    I: IntoIterator<Item = String>,
{
    let mut options = Options::default();
    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        let mut value = |flag: &str| {
            args.next()
                .with_context(|| format!("{flag} needs a value"))
        };
        match arg.as_str() {
            "--host" => options.host = Some(value("--host")?),
            "--port" => {
                let port = value("--port")?;
                options.port = Some(
                    port.parse()
                        .with_context(|| format!("invalid port: {port}"))?,
                );
            }
            "--config" => options.config = Some(PathBuf::from(value("--config")?)),
            "--log-level" => options.log_level = Some(value("--log-level")?),
            "-h" | "--help" => options.help = true,
            other => bail!("unexpected argument: {other}\n{USAGE}"),
        }
    }
    Ok(options)
}

fn main() {
    let options = match parse_args(env::args().skip(1)) {
        Ok(options) => options,
        Err(e) => {
            eprintln!("turnstile: {:#}", e);
            std::process::exit(2);
        }
    };
    if options.help {
        println!("{USAGE}");
        return;
    }

    if let Err(e) = run_bridge(options) {
        eprintln!("turnstile: {:#}", e);
        std::process::exit(1);
    }
}
