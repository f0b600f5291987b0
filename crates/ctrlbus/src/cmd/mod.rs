use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Subcommand, ValueEnum};
use ctrlbus_supervisor::Revision;

use crate::exit::{CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub mod bootinfo;
pub mod listen;
pub mod read;
pub mod send;
pub mod serve;
pub mod supervise;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Send one text command and print its acknowledge.
    Send(SendArgs),
    /// Connect to a driver and print the events it broadcasts.
    Listen(ListenArgs),
    /// Run a loopback driver that answers the revision handshake.
    Serve(ServeArgs),
    /// Read one register of a board through the bus bridge.
    Read(ReadArgs),
    /// Query a board's bootloader for its status and revisions.
    Bootinfo(BootinfoArgs),
    /// Start a driver process and check its revisions.
    Supervise(SuperviseArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub async fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Send(args) => send::run(args, format).await,
        Command::Listen(args) => listen::run(args, format).await,
        Command::Serve(args) => serve::run(args).await,
        Command::Read(args) => read::run(args, format).await,
        Command::Bootinfo(args) => bootinfo::run(args, format).await,
        Command::Supervise(args) => supervise::run(args, format).await,
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Driver address (e.g. 127.0.0.1:10001).
    pub addr: SocketAddr,
    /// Command name.
    pub name: String,
    /// Command parameters.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub params: Vec<String>,
    /// Maximum time to connect and to wait for the acknowledge (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct ListenArgs {
    /// Driver address.
    pub addr: SocketAddr,
    /// Exit after receiving N events.
    #[arg(long)]
    pub count: Option<usize>,
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Address to bind (port 0 picks a free port).
    pub bind: SocketAddr,
    /// Revision reported for `GetRevision`.
    #[arg(long, default_value = "1.0.0", value_parser = parse_revision)]
    pub revision: Revision,
    /// Revision reported for `BoardInitialize`. Without it the command is refused.
    #[arg(long, value_parser = parse_revision)]
    pub board_revision: Option<Revision>,
    /// Broadcast a `Heartbeat` event at this interval (e.g. 1s).
    #[arg(long)]
    pub heartbeat: Option<String>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum RegisterKind {
    Revision,
    Errors,
    Command,
    Status,
    Data,
    Param,
}

#[derive(Args, Debug)]
pub struct ReadArgs {
    /// Bus bridge address.
    pub bridge: SocketAddr,
    /// Board identifier.
    #[arg(long)]
    pub device: u8,
    /// Register to read.
    #[arg(long, value_enum, default_value = "revision")]
    pub class: RegisterKind,
    /// Index within the status, data or param list.
    #[arg(long, default_value = "0")]
    pub index: u8,
    /// Maximum time for the bridge filter to open (e.g. 5s).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
    /// Maximum time to wait for the register response.
    #[arg(long, default_value = "100ms")]
    pub response_timeout: String,
}

#[derive(Args, Debug)]
pub struct BootinfoArgs {
    /// Bus bridge address.
    pub bridge: SocketAddr,
    /// Board identifier.
    #[arg(long)]
    pub device: u8,
    /// Maximum time for the bridge filter to open and for the response.
    #[arg(long, default_value = "5s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct SuperviseArgs {
    /// Driver address.
    pub addr: SocketAddr,
    /// Driver executable. Without it the driver is assumed to be managed elsewhere.
    #[arg(long)]
    pub program: Option<PathBuf>,
    /// Arguments passed to the driver executable.
    #[arg(long = "arg", value_name = "ARG", allow_hyphen_values = true)]
    pub args: Vec<String>,
    /// Name used in logs.
    #[arg(long, default_value = "driver")]
    pub name: String,
    /// Expected driver revision (major.minor[.sub]).
    #[arg(long, value_parser = parse_revision)]
    pub expect: Revision,
    /// Expected board application revision.
    #[arg(long, value_parser = parse_revision)]
    pub expect_board: Revision,
    /// Maximum time for the process to come up.
    #[arg(long, default_value = "5s")]
    pub startup_timeout: String,
    /// Append transition records to this file.
    #[arg(long, value_name = "FILE")]
    pub log_file: Option<PathBuf>,
    /// Exit after the first handshake: 0 when ready, 30 otherwise.
    #[arg(long)]
    pub once: bool,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, millis) = match input.strip_suffix("ms") {
        Some(number) => (number, true),
        None => (input.strip_suffix('s').unwrap_or(input), false),
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;
    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}

/// `major.minor[.sub]`
pub fn parse_revision(input: &str) -> Result<Revision, String> {
    let parts: Vec<String> = input.split('.').map(str::to_string).collect();
    if parts.len() > 3 {
        return Err(format!("invalid revision: {input}"));
    }
    Revision::from_params(&parts).map_err(|_| format!("invalid revision: {input}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_duration_seconds_and_millis() {
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("150ms").unwrap(), Duration::from_millis(150));
        assert_eq!(parse_duration("3").unwrap(), Duration::from_secs(3));
    }

    #[test]
    fn parse_duration_rejects_invalid_values() {
        assert!(parse_duration("0s").is_err());
        assert!(parse_duration("bad").is_err());
        assert!(parse_duration("").is_err());
    }

    #[test]
    fn parse_revision_forms() {
        assert_eq!(parse_revision("2.5.1"), Ok(Revision::new(2, 5, 1)));
        assert_eq!(parse_revision("2.5"), Ok(Revision::new(2, 5, 0)));
        assert!(parse_revision("2").is_err());
        assert!(parse_revision("2.5.1.4").is_err());
        assert!(parse_revision("a.b").is_err());
    }
}
