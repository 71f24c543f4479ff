//! Shared telemetry bootstrap for key visual binaries.

use crate::{Error, Result};

use opentelemetry::global;
use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_sdk::trace::{self, Sampler, TracerProvider};
use opentelemetry_sdk::{runtime, Resource};
use std::collections::BTreeMap;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

const ATTR_SERVICE_NAME: &str = "service.name";
const ATTR_SERVICE_NAMESPACE: &str = "service.namespace";
const ATTR_KEYVISUAL_RUN_ID: &str = "keyvisual.run_id";
const OTEL_PROTOCOL_GRPC: &str = "grpc";

/// Runtime mode for telemetry exporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TelemetryMode {
    Disabled,
    Otlp,
}

impl TelemetryMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TelemetryMode::Disabled => "disabled",
            TelemetryMode::Otlp => "otlp",
        }
    }
}

/// Output format of the log subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Text,
}

impl LogFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogFormat::Json => "json",
            LogFormat::Text => "text",
        }
    }
}

/// Parsed telemetry configuration.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub mode: TelemetryMode,
    pub service_name: String,
    pub format: LogFormat,
    pub otlp_endpoint: Option<String>,
    pub traces_sampler: String,
    pub run_id: Option<String>,
    pub resource_attributes: Vec<KeyValue>,
    sampler: Sampler,
}

impl TelemetryConfig {
    /// Environment variables:
    /// - OTEL_SERVICE_NAME: overrides the component name
    /// - OTEL_EXPORTER_OTLP_ENDPOINT: enables OTLP export when set
    /// - OTEL_EXPORTER_OTLP_PROTOCOL: only "grpc" is supported
    /// - OTEL_TRACES_SAMPLER / OTEL_TRACES_SAMPLER_ARG
    /// - OTEL_RESOURCE_ATTRIBUTES: comma separated key=value pairs
    /// - KEYVISUAL_TELEMETRY_ENABLED: forces export on or off
    /// - KEYVISUAL_TELEMETRY_RUN_ID: tags every exported resource
    /// - KEYVISUAL_LOG_FORMAT: "json" (default) or "text"
    pub fn from_env(default_service_name: &str) -> Result<Self> {
        Self::from_lookup(default_service_name, |name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(default_service_name: &str, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let service_name =
            lookup("OTEL_SERVICE_NAME").unwrap_or_else(|| default_service_name.to_string());
        let service_name = service_name.trim();
        if service_name.is_empty() {
            return Err(Error::Config(
                "OTEL_SERVICE_NAME cannot be empty".to_string(),
            ));
        }

        let endpoint = lookup("OTEL_EXPORTER_OTLP_ENDPOINT")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        if let Some(protocol) = lookup("OTEL_EXPORTER_OTLP_PROTOCOL") {
            parse_otlp_protocol(&protocol)?;
        }

        let telemetry_enabled = match lookup("KEYVISUAL_TELEMETRY_ENABLED") {
            Some(raw) => Some(parse_bool("KEYVISUAL_TELEMETRY_ENABLED", &raw)?),
            None => None,
        };
        let mode = match (telemetry_enabled, endpoint.is_some()) {
            (Some(false), _) => TelemetryMode::Disabled,
            (Some(true), true) => TelemetryMode::Otlp,
            (Some(true), false) => {
                return Err(Error::Config(
                    "KEYVISUAL_TELEMETRY_ENABLED=true requires OTEL_EXPORTER_OTLP_ENDPOINT"
                        .to_string(),
                ));
            }
            (None, true) => TelemetryMode::Otlp,
            (None, false) => TelemetryMode::Disabled,
        };

        let format = match lookup("KEYVISUAL_LOG_FORMAT") {
            Some(raw) => parse_log_format(&raw)?,
            None => LogFormat::Json,
        };

        let run_id = lookup("KEYVISUAL_TELEMETRY_RUN_ID")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        let sampler_name =
            lookup("OTEL_TRACES_SAMPLER").unwrap_or_else(|| "parentbased_always_on".to_string());
        let sampler_arg = lookup("OTEL_TRACES_SAMPLER_ARG");
        let sampler = parse_sampler(&sampler_name, sampler_arg.as_deref())?;

        let mut attr_map: BTreeMap<String, String> = BTreeMap::new();
        if let Some(attr_str) = lookup("OTEL_RESOURCE_ATTRIBUTES") {
            for (key, value) in parse_resource_attributes(&attr_str)? {
                attr_map.insert(key, value);
            }
        }

        attr_map.insert(ATTR_SERVICE_NAME.to_string(), service_name.to_string());
        attr_map
            .entry(ATTR_SERVICE_NAMESPACE.to_string())
            .or_insert_with(|| "keyvisual".to_string());
        if let Some(run_id) = &run_id {
            attr_map.insert(ATTR_KEYVISUAL_RUN_ID.to_string(), run_id.clone());
        }

        let attributes = attr_map
            .into_iter()
            .map(|(k, v)| KeyValue::new(k, v))
            .collect::<Vec<_>>();

        Ok(Self {
            mode,
            service_name: service_name.to_string(),
            format,
            otlp_endpoint: endpoint,
            traces_sampler: sampler_name,
            run_id,
            resource_attributes: attributes,
            sampler,
        })
    }
}

/// Handle that keeps telemetry SDK providers alive for process lifetime.
pub struct Telemetry {
    config: TelemetryConfig,
    tracer_provider: TracerProvider,
    meter_provider: SdkMeterProvider,
}

impl Telemetry {
    /// Initialize the `tracing` subscriber and the OTel SDK providers.
    ///
    /// Must run inside a tokio runtime when OTLP export is enabled.
    pub fn init_for_component(default_service_name: &str, log_level: &str) -> Result<Self> {
        let config = TelemetryConfig::from_env(default_service_name)?;
        let level = parse_log_level(log_level)?;

        let builder = FmtSubscriber::builder()
            .with_max_level(level)
            .with_target(true)
            .with_thread_ids(true);
        let installed = match config.format {
            LogFormat::Json => builder.json().try_init(),
            LogFormat::Text => builder.try_init(),
        };
        installed.map_err(|e| {
            Error::Config(format!("failed to initialize telemetry subscriber: {e}"))
        })?;

        let resource =
            Resource::default().merge(&Resource::new(config.resource_attributes.clone()));
        let trace_config = trace::Config::default()
            .with_sampler(config.sampler.clone())
            .with_resource(resource.clone());

        let (tracer_provider, meter_provider) = match (&config.mode, &config.otlp_endpoint) {
            (TelemetryMode::Otlp, Some(endpoint)) => {
                let tracer_provider = opentelemetry_otlp::new_pipeline()
                    .tracing()
                    .with_exporter(
                        opentelemetry_otlp::new_exporter()
                            .tonic()
                            .with_endpoint(endpoint.clone()),
                    )
                    .with_trace_config(trace_config)
                    .install_batch(runtime::Tokio)
                    .map_err(|e| Error::Config(format!("failed to install OTLP tracing: {e}")))?;
                let meter_provider = opentelemetry_otlp::new_pipeline()
                    .metrics(runtime::Tokio)
                    .with_exporter(
                        opentelemetry_otlp::new_exporter()
                            .tonic()
                            .with_endpoint(endpoint.clone()),
                    )
                    .with_resource(resource)
                    .build()
                    .map_err(|e| Error::Config(format!("failed to install OTLP metrics: {e}")))?;
                (tracer_provider, meter_provider)
            }
            _ => (
                TracerProvider::builder().with_config(trace_config).build(),
                SdkMeterProvider::builder().with_resource(resource).build(),
            ),
        };

        let _ = global::set_tracer_provider(tracer_provider.clone());
        global::set_meter_provider(meter_provider.clone());
        global::set_text_map_propagator(TraceContextPropagator::new());

        info!(
            service_name = %config.service_name,
            telemetry_mode = config.mode.as_str(),
            otlp_endpoint = %config.otlp_endpoint.as_deref().unwrap_or("none"),
            traces_sampler = %config.traces_sampler,
            log_format = config.format.as_str(),
            log_level = %level,
            run_id = %config.run_id.as_deref().unwrap_or("none"),
            "Telemetry bootstrap initialized"
        );

        Ok(Self {
            config,
            tracer_provider,
            meter_provider,
        })
    }

    pub fn run_id(&self) -> Option<&str> {
        self.config.run_id.as_deref()
    }

    pub fn service_name(&self) -> &str {
        &self.config.service_name
    }

    pub fn mode(&self) -> &TelemetryMode {
        &self.config.mode
    }
}

impl Drop for Telemetry {
    fn drop(&mut self) {
        let _ = self.meter_provider.shutdown();
        let _ = self.tracer_provider.shutdown();
    }
}

fn parse_otlp_protocol(raw: &str) -> Result<&'static str> {
    match raw.trim().to_ascii_lowercase().as_str() {
        OTEL_PROTOCOL_GRPC => Ok(OTEL_PROTOCOL_GRPC),
        other => Err(Error::Config(format!(
            "OTEL_EXPORTER_OTLP_PROTOCOL must be 'grpc', got '{other}'"
        ))),
    }
}

pub fn parse_log_level(raw: &str) -> Result<Level> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        other => Err(Error::Config(format!(
            "invalid log level '{other}', expected one of [trace, debug, info, warn, error]"
        ))),
    }
}

fn parse_log_format(raw: &str) -> Result<LogFormat> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "json" => Ok(LogFormat::Json),
        "text" | "pretty" => Ok(LogFormat::Text),
        other => Err(Error::Config(format!(
            "KEYVISUAL_LOG_FORMAT must be one of [json, text], got '{other}'"
        ))),
    }
}

fn parse_bool(name: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(Error::Config(format!(
            "{name} must be a boolean (true/false/1/0), got '{raw}'"
        ))),
    }
}

fn parse_sampler(name: &str, arg: Option<&str>) -> Result<Sampler> {
    let lower = name.trim().to_ascii_lowercase();
    match lower.as_str() {
        "always_on" => Ok(Sampler::AlwaysOn),
        "always_off" => Ok(Sampler::AlwaysOff),
        "traceidratio" => Ok(Sampler::TraceIdRatioBased(parse_ratio(arg)?)),
        "parentbased_always_on" => Ok(Sampler::ParentBased(Box::new(Sampler::AlwaysOn))),
        "parentbased_always_off" => Ok(Sampler::ParentBased(Box::new(Sampler::AlwaysOff))),
        "parentbased_traceidratio" => Ok(Sampler::ParentBased(Box::new(
            Sampler::TraceIdRatioBased(parse_ratio(arg)?),
        ))),
        other => Err(Error::Config(format!(
            "OTEL_TRACES_SAMPLER '{other}' is not supported"
        ))),
    }
}

fn parse_ratio(arg: Option<&str>) -> Result<f64> {
    let raw = arg.ok_or_else(|| {
        Error::Config("OTEL_TRACES_SAMPLER_ARG is required for ratio samplers".to_string())
    })?;
    let value = raw.trim().parse::<f64>().map_err(|e| {
        Error::Config(format!(
            "OTEL_TRACES_SAMPLER_ARG must be a float in [0,1]: {e}"
        ))
    })?;
    if !(0.0..=1.0).contains(&value) {
        return Err(Error::Config(format!(
            "OTEL_TRACES_SAMPLER_ARG must be in [0,1], got {value}"
        )));
    }
    Ok(value)
}

fn parse_resource_attributes(raw: &str) -> Result<Vec<(String, String)>> {
    let mut attrs = Vec::new();
    for pair in raw.split(',') {
        let trimmed = pair.trim();
        if trimmed.is_empty() {
            continue;
        }
        let Some((key, value)) = trimmed.split_once('=') else {
            return Err(Error::Config(format!(
                "OTEL_RESOURCE_ATTRIBUTES entry '{trimmed}' is invalid, expected key=value"
            )));
        };

        let key = key.trim();
        if key.is_empty() {
            return Err(Error::Config(
                "OTEL_RESOURCE_ATTRIBUTES contains an empty attribute key".to_string(),
            ));
        }

        attrs.push((key.to_string(), value.trim().to_string()));
    }
    Ok(attrs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<TelemetryConfig> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        TelemetryConfig::from_lookup("keyvisual", |name| vars.get(name).cloned())
    }

    fn attribute(config: &TelemetryConfig, key: &str) -> Option<String> {
        config
            .resource_attributes
            .iter()
            .find(|kv| kv.key.as_str() == key)
            .map(|kv| kv.value.to_string())
    }

    #[test]
    fn test_export_follows_endpoint() {
        let local = config(&[]).unwrap();
        assert_eq!(local.mode, TelemetryMode::Disabled);
        assert_eq!(local.format, LogFormat::Json);
        assert_eq!(attribute(&local, "service.name").as_deref(), Some("keyvisual"));

        let exported = config(&[
            ("OTEL_EXPORTER_OTLP_ENDPOINT", "http://collector:4317"),
            ("KEYVISUAL_TELEMETRY_RUN_ID", "bench-7"),
        ])
        .unwrap();
        assert_eq!(exported.mode, TelemetryMode::Otlp);
        assert_eq!(attribute(&exported, "keyvisual.run_id").as_deref(), Some("bench-7"));

        let forced_off = config(&[
            ("OTEL_EXPORTER_OTLP_ENDPOINT", "http://collector:4317"),
            ("KEYVISUAL_TELEMETRY_ENABLED", "off"),
        ])
        .unwrap();
        assert_eq!(forced_off.mode, TelemetryMode::Disabled);
    }

    #[test]
    fn test_rejects_inconsistent_settings() {
        let err = config(&[("KEYVISUAL_TELEMETRY_ENABLED", "true")]).unwrap_err();
        assert!(format!("{err}").contains("OTEL_EXPORTER_OTLP_ENDPOINT"));
        assert!(config(&[("OTEL_EXPORTER_OTLP_PROTOCOL", "http/json")]).is_err());
        assert!(config(&[("OTEL_SERVICE_NAME", "  ")]).is_err());
        assert!(config(&[("KEYVISUAL_LOG_FORMAT", "xml")]).is_err());
    }

    #[test]
    fn parse_log_level_accepts_known_levels() {
        assert_eq!(parse_log_level(" INFO ").unwrap(), Level::INFO);
        assert_eq!(parse_log_level("trace").unwrap(), Level::TRACE);
        assert!(format!("{}", parse_log_level("verbose").unwrap_err()).contains("verbose"));
    }

    #[test]
    fn parse_log_format_accepts_aliases() {
        assert_eq!(parse_log_format("pretty").unwrap(), LogFormat::Text);
    }

    #[test]
    fn parse_resource_attributes_rejects_invalid_pairs() {
        let attrs = parse_resource_attributes("service.instance.id=abc, foo=bar").unwrap();
        assert_eq!(attrs[1], ("foo".to_string(), "bar".to_string()));
        let err = parse_resource_attributes("broken").unwrap_err();
        assert!(format!("{err}").contains("key=value"));
    }

    #[test]
    fn parse_sampler_requires_ratio_arg() {
        let err = parse_sampler("traceidratio", None).unwrap_err();
        assert!(format!("{err}").contains("OTEL_TRACES_SAMPLER_ARG"));
        assert!(parse_sampler("traceidratio", Some("1.5")).is_err());
    }
}
