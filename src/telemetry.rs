use std::env;

use opentelemetry::global;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initializes tracing. With `JAEGER_ENDPOINT` set, spans are exported to
/// the collector there; otherwise logging stays on stdout only.
pub fn init() -> Result<(), Box<dyn std::error::Error>> {
    let filter_layer = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))?;

    match env::var("JAEGER_ENDPOINT") {
        Ok(endpoint) => {
            global::set_text_map_propagator(opentelemetry_jaeger::Propagator::new());

            let tracer = opentelemetry_jaeger::new_collector_pipeline()
                .with_endpoint(endpoint)
                .with_service_name("imgq")
                .with_isahc() // requires `isahc_collector_client` feature
                .with_timeout(std::time::Duration::from_secs(2))
                .install_batch(opentelemetry::runtime::Tokio)?;

            let telemetry = tracing_opentelemetry::layer().with_tracer(tracer);

            tracing_subscriber::registry()
                .with(telemetry)
                .with(filter_layer)
                .with(fmt::Layer::default())
                .try_init()?;
        }
        Err(_) => {
            tracing_subscriber::registry()
                .with(filter_layer)
                .with(fmt::Layer::default())
                .try_init()?;
        }
    }

    Ok(())
}

pub fn shutdown() {
    global::shutdown_tracer_provider();
}
