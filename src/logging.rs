//! Structured logging setup for production observability.
//!
//! JSON output in production and pretty output elsewhere, written through a
//! non-blocking appender (stdout, stderr or daily-rotated files), with an
//! optional OTLP exporter. Also home to the span constructors used by the
//! ledger and the schedulers.

use anyhow::{Context, Result};
use opentelemetry::{KeyValue, trace::TraceError};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{
    Resource,
    trace::{RandomIdGenerator, Sampler, Tracer},
};
use std::env;
use std::io;
use std::path::PathBuf;
use std::time::Duration;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

/// Configuration for logging setup.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub format: LogFormat,
    pub output: LogOutput,
    /// Directory for log files (when output is `File`)
    pub log_dir: PathBuf,
    pub log_file_prefix: String,
    pub service_name: String,
    pub service_version: String,
    /// e.g. "development", "production"
    pub environment: String,
    /// Emit span open/close events. Off by default: scheduler ticks open a
    /// span every couple of seconds.
    pub span_events: bool,
    pub enable_otel: bool,
    pub otlp_endpoint: Option<String>,
    /// Rotate log files daily
    pub enable_rotation: bool,
    /// OpenTelemetry trace sampling rate (0.0 to 1.0)
    pub otel_sampling_rate: f64,
    pub otlp_timeout_secs: u64,
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// JSON structured logging (production)
    Json,
    /// Human-readable pretty output (development)
    Pretty,
}

/// Log output destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogOutput {
    Stdout,
    Stderr,
    File,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        let environment = env::var("FARM_LEDGER_ENV")
            .or_else(|_| env::var("ENVIRONMENT"))
            .unwrap_or_else(|_| "development".to_string());
        let is_production = is_production(&environment);

        Self {
            format: if is_production {
                LogFormat::Json
            } else {
                LogFormat::Pretty
            },
            output: LogOutput::Stderr,
            log_dir: PathBuf::from("logs"),
            log_file_prefix: "farm-ledger".to_string(),
            service_name: "farm-ledger".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            environment,
            span_events: false,
            enable_otel: false,
            otlp_endpoint: None,
            enable_rotation: true,
            otel_sampling_rate: if is_production { 0.1 } else { 1.0 },
            otlp_timeout_secs: 10,
        }
    }
}

fn is_production(environment: &str) -> bool {
    matches!(environment, "production" | "prod")
}

impl LoggingConfig {
    /// Defaults overridden by `FARM_LEDGER_LOG_*` and the standard `OTEL_*`
    /// variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(format) = env::var("FARM_LEDGER_LOG_FORMAT") {
            config.format = match format.to_lowercase().as_str() {
                "json" => LogFormat::Json,
                "pretty" => LogFormat::Pretty,
                _ => config.format,
            };
        }

        if let Ok(output) = env::var("FARM_LEDGER_LOG_OUTPUT") {
            config.output = match output.to_lowercase().as_str() {
                "stdout" => LogOutput::Stdout,
                "stderr" => LogOutput::Stderr,
                "file" => LogOutput::File,
                _ => config.output,
            };
        }

        if let Ok(log_dir) = env::var("FARM_LEDGER_LOG_DIR") {
            config.log_dir = PathBuf::from(log_dir);
        }

        if let Ok(spans) = env::var("FARM_LEDGER_LOG_SPANS") {
            config.span_events = matches!(spans.to_lowercase().as_str(), "1" | "true" | "yes");
        }

        if let Ok(otel_endpoint) = env::var("OTEL_EXPORTER_OTLP_ENDPOINT") {
            config.enable_otel = true;
            config.otlp_endpoint = Some(otel_endpoint);
        }

        if let Some(rate) = env::var("OTEL_SAMPLING_RATE")
            .ok()
            .and_then(|rate| rate.parse::<f64>().ok())
        {
            config.otel_sampling_rate = rate.clamp(0.0, 1.0);
        }

        if let Some(timeout) = env::var("OTEL_EXPORTER_OTLP_TIMEOUT")
            .ok()
            .and_then(|timeout| timeout.parse::<u64>().ok())
        {
            config.otlp_timeout_secs = timeout;
        }

        config
    }

    fn resource(&self) -> Resource {
        Resource::new(vec![
            KeyValue::new(
                opentelemetry_semantic_conventions::resource::SERVICE_NAME,
                self.service_name.clone(),
            ),
            KeyValue::new(
                opentelemetry_semantic_conventions::resource::SERVICE_VERSION,
                self.service_version.clone(),
            ),
            KeyValue::new("environment", self.environment.clone()),
            KeyValue::new("service.namespace", "farm"),
        ])
    }

    fn sampler(&self) -> Sampler {
        if self.otel_sampling_rate >= 1.0 {
            Sampler::AlwaysOn
        } else if self.otel_sampling_rate <= 0.0 {
            Sampler::AlwaysOff
        } else {
            Sampler::ParentBased(Box::new(Sampler::TraceIdRatioBased(
                self.otel_sampling_rate,
            )))
        }
    }

    /// `RUST_LOG` wins; otherwise info in production, debug elsewhere, with
    /// per-commit store traces kept out.
    fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            let level = if is_production(&self.environment) {
                "info"
            } else {
                "debug"
            };
            EnvFilter::new(format!(
                "{level},farm_ledger::store=info,hyper=info,tower=info"
            ))
        })
    }

    fn span_events(&self) -> FmtSpan {
        if self.span_events {
            FmtSpan::NEW | FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        }
    }
}

/// Initialize structured logging with the given configuration.
///
/// The returned guard must be held for the lifetime of the process so
/// buffered lines are flushed on exit.
pub fn init_logging(config: LoggingConfig) -> Result<Option<WorkerGuard>> {
    let (writer, guard) = match config.output {
        LogOutput::Stdout => tracing_appender::non_blocking(io::stdout()),
        LogOutput::Stderr => tracing_appender::non_blocking(io::stderr()),
        LogOutput::File => {
            std::fs::create_dir_all(&config.log_dir).context("Failed to create log directory")?;

            let file_appender = if config.enable_rotation {
                tracing_appender::rolling::daily(&config.log_dir, &config.log_file_prefix)
            } else {
                tracing_appender::rolling::never(&config.log_dir, &config.log_file_prefix)
            };
            tracing_appender::non_blocking(file_appender)
        }
    };

    let fmt_layer = match config.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_writer(writer)
            .with_target(true)
            .with_line_number(true)
            .with_file(true)
            .with_thread_ids(true)
            .with_span_events(config.span_events())
            .with_current_span(true)
            .boxed(),
        LogFormat::Pretty => fmt::layer()
            .pretty()
            .with_writer(writer)
            .with_target(true)
            .with_line_number(true)
            .with_file(true)
            .with_span_events(config.span_events())
            .with_ansi(config.output != LogOutput::File)
            .boxed(),
    };

    let otel_layer = if config.enable_otel {
        match init_tracer(&config) {
            Ok(tracer) => Some(tracing_opentelemetry::layer().with_tracer(tracer)),
            Err(e) => {
                eprintln!(
                    "Warning: Failed to initialize OpenTelemetry exporter: {}. Continuing without distributed tracing.",
                    e
                );
                None
            }
        }
    } else {
        None
    };
    let otel_enabled = otel_layer.is_some();

    tracing_subscriber::registry()
        .with(fmt_layer.with_filter(config.env_filter()))
        .with(otel_layer)
        .try_init()
        .context("a global tracing subscriber is already installed")?;

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        environment = %config.environment,
        format = ?config.format,
        output = ?config.output,
        otel = otel_enabled,
        sampling_rate = config.otel_sampling_rate,
        "logging initialized"
    );

    Ok(Some(guard))
}

/// Installs the global OTLP batch pipeline and returns its tracer.
fn init_tracer(config: &LoggingConfig) -> Result<Tracer, TraceError> {
    let endpoint = config
        .otlp_endpoint
        .as_ref()
        .ok_or_else(|| TraceError::Other("No OTLP endpoint configured".into()))?;

    // Create OTLP exporter
    let exporter = opentelemetry_otlp::new_exporter()
        .tonic()
        .with_endpoint(endpoint)
        .with_timeout(Duration::from_secs(config.otlp_timeout_secs));

    opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(exporter)
        .with_trace_config(
            opentelemetry_sdk::trace::Config::default()
                .with_sampler(config.sampler())
                .with_id_generator(RandomIdGenerator::default())
                .with_resource(config.resource()),
        )
        .install_batch(opentelemetry_sdk::runtime::Tokio)
}

/// Shutdown OpenTelemetry gracefully
pub fn shutdown_telemetry() {
    tracing::info!("Shutting down OpenTelemetry");
    opentelemetry::global::shutdown_tracer_provider();
}

/// Log a slow operation warning.
///
/// Logs at WARN when `$duration` exceeds `$threshold_ms`, DEBUG otherwise.
#[macro_export]
macro_rules! log_slow_operation {
    ($duration:expr, $threshold_ms:expr, $($arg:tt)*) => {
        {
            let duration_ms = $duration.as_millis() as u64;
            if duration_ms > $threshold_ms {
                tracing::warn!(
                    duration_ms = duration_ms,
                    threshold_ms = $threshold_ms,
                    $($arg)*
                );
            } else {
                tracing::debug!(
                    duration_ms = duration_ms,
                    $($arg)*
                );
            }
        }
    };
}

/// Create a span for a user-triggered ledger operation.
pub fn ledger_span(operation: &'static str, user_id: &str) -> tracing::Span {
    tracing::info_span!(
        "ledger_operation",
        ledger.operation = operation,
        ledger.user_id = user_id,
        service = env!("CARGO_PKG_NAME"),
        version = env!("CARGO_PKG_VERSION")
    )
}

/// Create a span for one scheduler tick.
pub fn tick_span(scheduler: &'static str, tick: u64) -> tracing::Span {
    tracing::info_span!(
        "scheduler_tick",
        scheduler.name = scheduler,
        scheduler.tick = tick,
        service = env!("CARGO_PKG_NAME"),
        version = env!("CARGO_PKG_VERSION")
    )
}
