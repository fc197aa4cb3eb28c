use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Subcommand};
use pundun_client::ClientConfig;

use crate::exit::{client_error, CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub mod bench;
pub mod info;
pub mod send;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Send one request and print the response.
    Send(SendArgs),
    /// Connect, authenticate and print connection metadata.
    Info(InfoArgs),
    /// Issue many concurrent requests over one connection.
    Bench(BenchArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Send(args) => send::run(args, format),
        Command::Info(args) => info::run(args, format),
        Command::Bench(args) => bench::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

/// Server address, credentials and limits shared by every networked command.
#[derive(Args, Debug, Default)]
pub struct ConnectArgs {
    /// JSON client configuration file; flags override its values.
    #[arg(long, value_name = "FILE", env = "PUNDUN_CONFIG")]
    pub config: Option<PathBuf>,
    /// Server host.
    #[arg(long, env = "PUNDUN_HOST")]
    pub host: Option<String>,
    /// Server port.
    #[arg(long, short = 'p', env = "PUNDUN_PORT")]
    pub port: Option<u16>,
    /// User name.
    #[arg(long, short = 'u', env = "PUNDUN_USER")]
    pub user: Option<String>,
    /// Password.
    #[arg(long, env = "PUNDUN_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,
    /// Request timeout (e.g. 5s, 500ms).
    #[arg(long, value_name = "DURATION")]
    pub timeout: Option<String>,
    /// Connect and handshake timeout (e.g. 5s, 500ms).
    #[arg(long, value_name = "DURATION")]
    pub connect_timeout: Option<String>,
}

impl ConnectArgs {
    /// Config file (or defaults) with flag and environment overrides applied.
    pub fn client_config(&self) -> CliResult<ClientConfig> {
        let mut config = match &self.config {
            Some(path) => ClientConfig::from_json_file(path)
                .map_err(|err| client_error("invalid config file", err))?,
            None => ClientConfig::default(),
        };

        if let Some(host) = &self.host {
            config.host = host.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(user) = &self.user {
            config.username = user.clone();
        }
        if let Some(password) = &self.password {
            config.password = password.clone();
        }
        if let Some(timeout) = &self.timeout {
            config.request_timeout = Some(parse_duration(timeout)?);
        }
        if let Some(timeout) = &self.connect_timeout {
            let timeout = parse_duration(timeout)?;
            config.connect_timeout = timeout;
            config.handshake_timeout = timeout;
        }

        config
            .validate()
            .map_err(|err| client_error("invalid configuration", err))?;
        Ok(config)
    }
}

#[derive(Args, Debug)]
pub struct SendArgs {
    #[command(flatten)]
    pub connect: ConnectArgs,
    /// JSON request body.
    #[arg(long, conflicts_with_all = ["data", "file"])]
    pub json: Option<String>,
    /// Raw string request body.
    #[arg(long, conflicts_with_all = ["json", "file"])]
    pub data: Option<String>,
    /// Read the request body from a file.
    #[arg(long, conflicts_with_all = ["json", "data"])]
    pub file: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct InfoArgs {
    #[command(flatten)]
    pub connect: ConnectArgs,
}

#[derive(Args, Debug)]
pub struct BenchArgs {
    #[command(flatten)]
    pub connect: ConnectArgs,
    /// Total number of requests.
    #[arg(long, short = 'n', default_value = "1000")]
    pub requests: usize,
    /// Issuing threads sharing the connection.
    #[arg(long, short = 'c', default_value = "8")]
    pub concurrency: usize,
    /// Request body size in bytes.
    #[arg(long, default_value = "64")]
    pub payload_size: usize,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// Parse `5s`, `500ms` or a bare number of seconds.
pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        _ => Ok(Duration::from_secs(value)),
    }
}
