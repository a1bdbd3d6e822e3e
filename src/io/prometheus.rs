//! Prometheus metrics HTTP endpoint
//!
//! Exposes monitor metrics in Prometheus text format at /metrics.
//! Uses hyper for the HTTP server.

use crate::infra::metrics::{Metrics, MetricsSummary, METRICS_BUCKET_BOUNDS, METRICS_NUM_BUCKETS};
use bytes::Bytes;
use http_body_util::Full;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::fmt::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};

/// Prometheus metric type
enum MetricType {
    Counter,
    Gauge,
}

impl MetricType {
    fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "counter",
            MetricType::Gauge => "gauge",
        }
    }
}

/// Write a simple metric (counter or gauge) with site label
fn write_metric(
    output: &mut String,
    name: &str,
    help: &str,
    typ: MetricType,
    site: &str,
    val: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} {}", typ.as_str());
    let _ = writeln!(output, "{name}{{site=\"{site}\"}} {val}");
}

/// Counter split by a `reason` label
fn write_labelled_counter(
    output: &mut String,
    name: &str,
    help: &str,
    site: &str,
    values: &[(&str, u64)],
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} counter");
    for (reason, val) in values {
        let _ = writeln!(output, "{name}{{site=\"{site}\",reason=\"{reason}\"}} {val}");
    }
}

/// Write a histogram metric with buckets, sum, and count
fn write_histogram(
    output: &mut String,
    name: &str,
    help: &str,
    site: &str,
    buckets: &[u64; METRICS_NUM_BUCKETS],
    bounds: &[u64; 10],
    sum: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} histogram");

    let mut cumulative = 0u64;
    for (i, &bound) in bounds.iter().enumerate() {
        cumulative += buckets[i];
        let _ = writeln!(output, "{name}_bucket{{site=\"{site}\",le=\"{bound}\"}} {cumulative}");
    }
    cumulative += buckets[METRICS_NUM_BUCKETS - 1];
    let _ = writeln!(output, "{name}_bucket{{site=\"{site}\",le=\"+Inf\"}} {cumulative}");

    let count: u64 = buckets.iter().sum();
    let _ = writeln!(output, "{name}_sum{{site=\"{site}\"}} {sum}");
    let _ = writeln!(output, "{name}_count{{site=\"{site}\"}} {count}");
}

/// Format metrics in Prometheus text exposition format
fn format_prometheus_metrics(metrics: &Metrics, site_id: &str) -> String {
    let summary = metrics.report();
    let mut output = String::with_capacity(4096);

    write_sensing_metrics(&mut output, site_id, &summary);
    write_reconcile_metrics(&mut output, site_id, &summary);
    write_availability_metrics(&mut output, site_id, &summary);

    output
}

fn write_sensing_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "parking_cycles_total",
        "Poll cycles completed",
        MetricType::Counter,
        site,
        summary.cycles_total,
    );
    write_metric(
        output,
        "parking_samples_total",
        "Sensor samples taken",
        MetricType::Counter,
        site,
        summary.samples_total,
    );
    write_labelled_counter(
        output,
        "parking_unknown_readings_total",
        "Samples that produced no usable occupancy value",
        site,
        &[
            ("timeout", summary.sensor_timeouts_total),
            ("implausible", summary.implausible_total),
            ("non_positive", summary.non_positive_total),
            ("line_error", summary.line_errors_total),
        ],
    );
}

fn write_reconcile_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_labelled_counter(
        output,
        "parking_reconcile_total",
        "Reconciliations by outcome",
        site,
        &[
            ("committed", summary.reconcile_committed_total),
            ("skipped", summary.reconcile_skipped_total),
            ("failed", summary.reconcile_failed_total),
        ],
    );
    write_metric(
        output,
        "parking_store_conflicts_total",
        "Compare-and-swap conflicts on the shared record",
        MetricType::Counter,
        site,
        summary.store_conflicts_total,
    );

    write_histogram(
        output,
        "parking_reconcile_latency_us",
        "Reconciliation latency in microseconds",
        site,
        &summary.reconcile_latency_buckets,
        &METRICS_BUCKET_BOUNDS,
        summary.reconcile_latency_sum_us,
    );
    write_metric(
        output,
        "parking_reconcile_latency_p99_us",
        "99th percentile reconciliation latency",
        MetricType::Gauge,
        site,
        summary.reconcile_latency_p99_us,
    );
    write_metric(
        output,
        "parking_reconcile_latency_max_us",
        "Maximum reconciliation latency",
        MetricType::Gauge,
        site,
        summary.reconcile_latency_max_us,
    );
}

fn write_availability_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "parking_available_slots",
        "Slots currently committed as available",
        MetricType::Gauge,
        site,
        summary.available_slots,
    );
    write_metric(
        output,
        "parking_total_slots",
        "Configured slots",
        MetricType::Gauge,
        site,
        summary.total_slots,
    );
    write_metric(
        output,
        "parking_uptime_seconds",
        "Seconds since process start",
        MetricType::Gauge,
        site,
        summary.uptime_secs,
    );
}

fn text_response(status: StatusCode, content_type: &str, body: String) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    if let Ok(value) = content_type.parse() {
        response.headers_mut().insert(hyper::header::CONTENT_TYPE, value);
    }
    response
}

/// Handle HTTP requests
async fn handle_request(
    req: Request<hyper::body::Incoming>,
    metrics: Arc<Metrics>,
    site_id: Arc<String>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    match (req.method(), req.uri().path()) {
        (&Method::GET, "/metrics") => Ok(text_response(
            StatusCode::OK,
            "text/plain; version=0.0.4; charset=utf-8",
            format_prometheus_metrics(&metrics, &site_id),
        )),
        (&Method::GET, "/health") => {
            Ok(text_response(StatusCode::OK, "text/plain", "ok".to_string()))
        }
        _ => Ok(text_response(StatusCode::NOT_FOUND, "text/plain", "Not Found".to_string())),
    }
}

/// Start the Prometheus metrics HTTP server
pub async fn start_metrics_server(
    port: u16,
    metrics: Arc<Metrics>,
    site_id: String,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    let site_id = Arc::new(site_id);

    info!(port = %port, site = %site_id, "prometheus_metrics_server_started");

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let io = TokioIo::new(stream);
                        let metrics = metrics.clone();
                        let site_id = site_id.clone();

                        tokio::spawn(async move {
                            let service = service_fn(move |req| {
                                let metrics = metrics.clone();
                                let site_id = site_id.clone();
                                async move { handle_request(req, metrics, site_id).await }
                            });

                            if let Err(e) = http1::Builder::new()
                                .serve_connection(io, service)
                                .await
                            {
                                error!(error = %e, "prometheus_http_error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "prometheus_accept_error");
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("prometheus_metrics_server_shutdown");
                    return Ok(());
                }
            }
        }
    }
}
