use std::fs;
use std::time::Instant;

use pundun_client::{connect_with_config, RawEnvelope};
use tracing::debug;

use crate::cmd::SendArgs;
use crate::exit::{client_error, io_error, CliError, CliResult, SUCCESS, USAGE};
use crate::output::{print_response, OutputFormat};

pub fn run(args: SendArgs, format: OutputFormat) -> CliResult<i32> {
    let body = resolve_payload(&args)?;
    let config = args.connect.client_config()?;

    let conn = connect_with_config(&config).map_err(|err| client_error("connect failed", err))?;

    let started = Instant::now();
    let response = conn
        .issue(RawEnvelope::new(body))
        .map_err(|err| client_error("request failed", err))?;
    let elapsed = started.elapsed();

    print_response(&response, conn.peer_addr(), elapsed, format);
    if let Err(err) = conn.disconnect() {
        debug!(error = %err, "disconnect failed");
    }
    Ok(SUCCESS)
}

fn resolve_payload(args: &SendArgs) -> CliResult<Vec<u8>> {
    if let Some(json) = &args.json {
        serde_json::from_str::<serde_json::Value>(json)
            .map_err(|err| CliError::new(USAGE, format!("--json is not valid JSON: {err}")))?;
        return Ok(json.as_bytes().to_vec());
    }
    if let Some(data) = &args.data {
        return Ok(data.as_bytes().to_vec());
    }
    if let Some(path) = &args.file {
        return fs::read(path)
            .map_err(|err| io_error(&format!("failed reading {}", path.display()), err));
    }
    Ok(Vec::new())
}
