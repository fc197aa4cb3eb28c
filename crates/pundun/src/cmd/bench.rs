use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use pundun_client::{connect_with_config, ClientError, Connection, RawEnvelope};
use serde::Serialize;
use tracing::{info, warn};

use crate::cmd::BenchArgs;
use crate::exit::{client_error, CliError, CliResult, FAILURE, SUCCESS, USAGE};
use crate::output::{key_value_table, millis, print_json, OutputFormat};

#[derive(Serialize, Debug, PartialEq)]
struct BenchReport {
    server: String,
    requests: usize,
    concurrency: usize,
    payload_size: usize,
    succeeded: usize,
    failed: usize,
    elapsed_ms: f64,
    throughput_rps: f64,
    latency_p50_ms: f64,
    latency_p99_ms: f64,
    latency_max_ms: f64,
}

pub fn run(args: BenchArgs, format: OutputFormat) -> CliResult<i32> {
    if args.requests == 0 || args.concurrency == 0 {
        return Err(CliError::new(
            USAGE,
            "--requests and --concurrency must be greater than zero",
        ));
    }
    let config = args.connect.client_config()?;
    let conn = Arc::new(
        connect_with_config(&config).map_err(|err| client_error("connect failed", err))?,
    );

    let concurrency = args.concurrency.min(args.requests);
    info!(
        requests = args.requests,
        concurrency,
        payload_size = args.payload_size,
        "starting benchmark"
    );

    let body = payload(args.payload_size);
    let started = Instant::now();
    let workers: Vec<_> = split_requests(args.requests, concurrency)
        .into_iter()
        .map(|count| {
            let conn = Arc::clone(&conn);
            let body = body.clone();
            thread::spawn(move || issue_batch(&conn, &body, count))
        })
        .collect();

    let mut latencies = Vec::with_capacity(args.requests);
    let mut failed = 0usize;
    let mut first_error = None;
    for worker in workers {
        let batch = worker
            .join()
            .map_err(|_| CliError::new(FAILURE, "benchmark worker panicked"))?;
        latencies.extend(batch.latencies);
        failed += batch.failed;
        if first_error.is_none() {
            first_error = batch.first_error;
        }
    }
    let elapsed = started.elapsed();

    let report = build_report(
        conn.peer_addr(),
        &args,
        concurrency,
        latencies,
        failed,
        elapsed,
    );
    print_report(&report, format);
    let _ = conn.disconnect();

    match first_error {
        Some(err) if report.succeeded == 0 => Err(client_error("benchmark failed", err)),
        Some(err) => {
            warn!(failed = report.failed, error = %err, "benchmark finished with errors");
            Ok(FAILURE)
        }
        None => Ok(SUCCESS),
    }
}

struct Batch {
    latencies: Vec<Duration>,
    failed: usize,
    first_error: Option<ClientError>,
}

fn issue_batch(conn: &Connection, body: &[u8], count: usize) -> Batch {
    let mut batch = Batch {
        latencies: Vec::with_capacity(count),
        failed: 0,
        first_error: None,
    };
    for _ in 0..count {
        let started = Instant::now();
        match conn.issue(RawEnvelope::new(body.to_vec())) {
            Ok(_) => batch.latencies.push(started.elapsed()),
            Err(err) => {
                batch.failed += 1;
                let fatal = err.is_connection_fatal();
                if batch.first_error.is_none() {
                    batch.first_error = Some(err);
                }
                if fatal {
                    // Nothing more can succeed on this connection.
                    batch.failed = count - batch.latencies.len();
                    break;
                }
            }
        }
    }
    batch
}

/// Spread `requests` over `workers` as evenly as possible.
fn split_requests(requests: usize, workers: usize) -> Vec<usize> {
    let base = requests / workers;
    let extra = requests % workers;
    (0..workers)
        .map(|i| base + usize::from(i < extra))
        .collect()
}

fn build_report(
    server: &str,
    args: &BenchArgs,
    concurrency: usize,
    mut latencies: Vec<Duration>,
    failed: usize,
    elapsed: Duration,
) -> BenchReport {
    latencies.sort_unstable();
    let succeeded = latencies.len();
    let secs = elapsed.as_secs_f64();
    BenchReport {
        server: server.to_string(),
        requests: args.requests,
        concurrency,
        payload_size: args.payload_size,
        succeeded,
        failed,
        elapsed_ms: millis(elapsed),
        throughput_rps: if secs > 0.0 {
            ((succeeded as f64 / secs) * 100.0).round() / 100.0
        } else {
            0.0
        },
        latency_p50_ms: percentile(&latencies, 50),
        latency_p99_ms: percentile(&latencies, 99),
        latency_max_ms: latencies.last().copied().map(millis).unwrap_or(0.0),
    }
}

/// Nearest-rank percentile of sorted samples.
fn percentile(sorted: &[Duration], pct: usize) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = (pct * sorted.len()).div_ceil(100).max(1);
    millis(sorted[rank - 1])
}

fn print_report(report: &BenchReport, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(report),
        OutputFormat::Table => {
            let table = key_value_table(&[
                ("server", report.server.clone()),
                ("requests", report.requests.to_string()),
                ("concurrency", report.concurrency.to_string()),
                ("succeeded", report.succeeded.to_string()),
                ("failed", report.failed.to_string()),
                ("elapsed", format!("{:.2}ms", report.elapsed_ms)),
                ("throughput", format!("{:.2} req/s", report.throughput_rps)),
                ("p50", format!("{:.2}ms", report.latency_p50_ms)),
                ("p99", format!("{:.2}ms", report.latency_p99_ms)),
                ("max", format!("{:.2}ms", report.latency_max_ms)),
            ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "{} requests ({} failed) over {} threads in {:.2}ms: {:.2} req/s, p50 {:.2}ms, p99 {:.2}ms",
                report.requests,
                report.failed,
                report.concurrency,
                report.elapsed_ms,
                report.throughput_rps,
                report.latency_p50_ms,
                report.latency_p99_ms
            );
        }
        OutputFormat::Raw => println!("{:.2}", report.throughput_rps),
    }
}

/// Deterministic printable request body.
fn payload(size: usize) -> Vec<u8> {
    (0..size).map(|i| b'a' + (i % 26) as u8).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmd::ConnectArgs;

    #[test]
    fn split_requests_is_even() {
        assert_eq!(split_requests(10, 3), vec![4, 3, 3]);
        assert_eq!(split_requests(4, 4), vec![1, 1, 1, 1]);
        assert_eq!(split_requests(7, 1), vec![7]);
    }

    #[test]
    fn percentile_uses_nearest_rank() {
        let samples: Vec<Duration> = (1..=100).map(Duration::from_millis).collect();
        assert_eq!(percentile(&samples, 50), 50.0);
        assert_eq!(percentile(&samples, 99), 99.0);
        assert_eq!(percentile(&[], 50), 0.0);
        assert_eq!(percentile(&samples[..1], 99), 1.0);
    }

    #[test]
    fn report_counts_successes() {
        let args = BenchArgs {
            connect: ConnectArgs::default(),
            requests: 3,
            concurrency: 2,
            payload_size: 8,
        };
        let latencies = vec![
            Duration::from_millis(3),
            Duration::from_millis(1),
            Duration::from_millis(2),
        ];
        let report = build_report("srv", &args, 2, latencies, 0, Duration::from_secs(1));
        assert_eq!(report.succeeded, 3);
        assert_eq!(report.throughput_rps, 3.0);
        assert_eq!(report.latency_max_ms, 3.0);
        assert_eq!(report.latency_p50_ms, 2.0);
    }

    #[test]
    fn payload_is_printable() {
        let body = payload(30);
        assert_eq!(body.len(), 30);
        assert_eq!(&body[..3], b"abc");
        assert_eq!(body[26], b'a');
    }
}
