use opentelemetry::trace::TracerProvider as TracerProviderTrait;
use opentelemetry::KeyValue;
use opentelemetry_otlp::{WithExportConfig, WithHttpConfig};
use opentelemetry_sdk::trace::TracerProvider;
use opentelemetry_sdk::Resource;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

type BoxedLayer = Box<dyn Layer<tracing_subscriber::Registry> + Send + Sync>;

/// Initialize tracing with optional OTLP export.
///
/// - `service_name`: identifies this component (e.g. "elysium-deploy")
/// - `otlp_endpoint`: if `Some`, spans are exported via OTLP/HTTP to this base URL.
///   The exporter appends `/v1/traces`.
/// - `otlp_token`: bearer token sent with every export request
/// - `log_format`: `"json"` for one JSON object per line, anything else for text
///
/// Log lines go to stderr; stdout is left to the binaries.
///
/// Returns an optional `TracerProvider` that the caller should keep alive
/// and call `shutdown()` on before exit.
pub fn init_tracing(
    service_name: &str,
    otlp_endpoint: Option<&str>,
    otlp_token: Option<&str>,
    log_format: &str,
) -> Option<TracerProvider> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let fmt_layer: BoxedLayer = if log_format.eq_ignore_ascii_case("json") {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .boxed()
    };

    let Some(endpoint) = otlp_endpoint.filter(|e| !e.is_empty()) else {
        tracing_subscriber::registry()
            .with(fmt_layer.with_filter(env_filter))
            .init();
        return None;
    };

    let mut headers = std::collections::HashMap::new();
    if let Some(token) = otlp_token {
        if !token.is_empty() {
            headers.insert("Authorization".to_string(), format!("Bearer {token}"));
        }
    }

    let exporter = match opentelemetry_otlp::SpanExporter::builder()
        .with_http()
        .with_endpoint(endpoint)
        .with_headers(headers)
        .build()
    {
        Ok(e) => e,
        Err(err) => {
            eprintln!("failed to create OTLP exporter: {err}, falling back to stderr only");
            tracing_subscriber::registry()
                .with(fmt_layer.with_filter(env_filter))
                .init();
            return None;
        }
    };

    let provider = TracerProvider::builder()
        .with_batch_exporter(exporter, opentelemetry_sdk::runtime::Tokio)
        .with_resource(Resource::new([KeyValue::new(
            "service.name",
            service_name.to_string(),
        )]))
        .build();

    let otel_layer = tracing_opentelemetry::layer()
        .with_tracer(provider.tracer(service_name.to_string()))
        .boxed();

    tracing_subscriber::registry()
        .with(fmt_layer.and_then(otel_layer).with_filter(env_filter))
        .init();

    tracing::info!(endpoint, service_name, "OTLP tracing enabled");
    Some(provider)
}

/// Flush and stop the provider returned by [`init_tracing`]. Returns `false`
/// when the provider reported an error, which is logged.
pub fn shutdown_tracing(provider: Option<TracerProvider>) -> bool {
    let Some(provider) = provider else {
        return true;
    };
    match provider.shutdown() {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(error=%e, "failed to shut down tracer provider");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shutdown_without_provider() {
        assert!(shutdown_tracing(None));
    }

    #[test]
    fn test_shutdown_reports_error() {
        let provider = TracerProvider::builder().build();
        assert!(shutdown_tracing(Some(provider.clone())));
        // A second shutdown of the same provider fails.
        assert!(!shutdown_tracing(Some(provider)));
    }
}
