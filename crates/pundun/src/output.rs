use std::io::{IsTerminal, Write};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use pundun_client::RawEnvelope;
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct ResponseOutput<'a> {
    transaction_id: u32,
    payload_size: usize,
    payload: String,
    server: &'a str,
    elapsed_ms: f64,
    timestamp: String,
}

pub fn print_response(response: &RawEnvelope, server: &str, elapsed: Duration, format: OutputFormat) {
    let body = response.body.as_ref();
    match format {
        OutputFormat::Json => {
            let out = ResponseOutput {
                transaction_id: response.transaction_id,
                payload_size: body.len(),
                payload: payload_preview(body),
                server,
                elapsed_ms: millis(elapsed),
                timestamp: now_unix_seconds(),
            };
            print_json(&out);
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["TXN", "SIZE", "SERVER", "ELAPSED", "PAYLOAD"])
                .add_row(vec![
                    response.transaction_id.to_string(),
                    body.len().to_string(),
                    server.to_string(),
                    format!("{:.2}ms", millis(elapsed)),
                    payload_preview(body),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "txn={} size={} server={} elapsed={:.2}ms payload={}",
                response.transaction_id,
                body.len(),
                server,
                millis(elapsed),
                payload_preview(body)
            );
        }
        OutputFormat::Raw => print_raw(body),
    }
}

/// Two-column key/value table.
pub fn key_value_table(rows: &[(&str, String)]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["FIELD", "VALUE"]);
    for (key, value) in rows {
        table.add_row(vec![(*key).to_string(), value.clone()]);
    }
    table
}

pub fn print_json<T: Serialize>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

/// Milliseconds rounded to two decimals.
pub fn millis(duration: Duration) -> f64 {
    (duration.as_secs_f64() * 1000.0 * 100.0).round() / 100.0
}

fn payload_preview(payload: &[u8]) -> String {
    match std::str::from_utf8(payload) {
        Ok(text) => text.to_string(),
        Err(_) => format!("<binary {} bytes>", payload.len()),
    }
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}
