use clap::Parser;
use tracing::info;

use weblog::apm::{self, Exporter, JsonLinesExporter};
use weblog::config::TraceOutput;
use weblog::app::{App, routes};
use weblog::{Config, Router, RouterKind, ServeMux, Server, logging};

#[tokio::main]
async fn main() -> Result<(), weblog::Error> {
    let config = Config::parse();
    logging::init(config.log_format)?;

    let exporter: Box<dyn Exporter> = match &config.trace_output {
        TraceOutput::Stdout => Box::new(JsonLinesExporter::stdout()),
        TraceOutput::File(path) => Box::new(JsonLinesExporter::file(path)?),
    };
    let tracer = apm::start(config.tracer_config(), exporter);
    let flusher = tracer.spawn_flusher(config.flush_interval());

    info!(port = config.port, router = %config.router, trace_output = %config.trace_output, "starting weblog");

    let server = Server::bind(&config.listen_addr())?;
    let app = App::new(tracer.clone());
    let result = match config.router {
        RouterKind::Radix => server.serve(routes(Router::new(), app), tracer.clone()).await,
        RouterKind::Mux => server.serve(routes(ServeMux::new(), app), tracer.clone()).await,
    };

    flusher.abort();
    tracer.flush();
    result
}
