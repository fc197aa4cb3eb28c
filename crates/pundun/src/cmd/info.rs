use std::time::Instant;

use pundun_client::connect_with_config;
use serde::Serialize;

use crate::cmd::InfoArgs;
use crate::exit::{client_error, CliResult, SUCCESS};
use crate::output::{key_value_table, millis, print_json, OutputFormat};

#[derive(Serialize)]
struct InfoOutput {
    server: String,
    username: String,
    iterations: Option<u32>,
    handshake_ms: Option<f64>,
    connect_ms: f64,
    request_timeout_ms: Option<u64>,
    max_pending_requests: usize,
    max_payload_size: usize,
    connected: bool,
}

pub fn run(args: InfoArgs, format: OutputFormat) -> CliResult<i32> {
    let config = args.connect.client_config()?;

    let started = Instant::now();
    let conn = connect_with_config(&config).map_err(|err| client_error("connect failed", err))?;
    let connect_elapsed = started.elapsed();

    let handshake = conn.handshake();
    let out = InfoOutput {
        server: conn.peer_addr().to_string(),
        username: handshake
            .map(|h| h.username.clone())
            .unwrap_or_else(|| config.username.clone()),
        iterations: handshake.map(|h| h.iterations),
        handshake_ms: handshake.map(|h| millis(h.elapsed)),
        connect_ms: millis(connect_elapsed),
        request_timeout_ms: conn
            .config()
            .request_timeout
            .map(|t| t.as_millis() as u64),
        max_pending_requests: conn.config().max_pending_requests,
        max_payload_size: conn.config().max_payload_size,
        connected: conn.is_alive(),
    };

    print_info(&out, format);
    let _ = conn.disconnect();
    Ok(SUCCESS)
}

fn print_info(out: &InfoOutput, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(out),
        OutputFormat::Table => {
            let table = key_value_table(&[
                ("server", out.server.clone()),
                ("user", out.username.clone()),
                ("iterations", optional(out.iterations)),
                ("handshake", optional(out.handshake_ms.map(|ms| format!("{ms:.2}ms")))),
                ("connect", format!("{:.2}ms", out.connect_ms)),
                (
                    "request timeout",
                    optional(out.request_timeout_ms.map(|ms| format!("{ms}ms"))),
                ),
                ("max pending", out.max_pending_requests.to_string()),
                ("max payload", out.max_payload_size.to_string()),
            ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!("Connection Info:");
            println!("  Server:           {}", out.server);
            println!("  User:             {}", out.username);
            println!("  Iterations:       {}", optional(out.iterations));
            match out.handshake_ms {
                Some(ms) => println!("  Handshake:        {ms:.2}ms"),
                None => println!("  Handshake:        unavailable"),
            }
            println!("  Max pending:      {}", out.max_pending_requests);
        }
        OutputFormat::Raw => {
            println!("{}", out.server);
        }
    }
}

fn optional<T: ToString>(value: Option<T>) -> String {
    value
        .map(|v| v.to_string())
        .unwrap_or_else(|| "unavailable".to_string())
}
