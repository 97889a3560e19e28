use anyhow::Result;
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, info};

use crate::MetricsConfig;

/// Prometheus exposition endpoint.
///
/// `install` registers the global recorder (once, from main init; a second
/// install fails) and `serve` answers scrapes on `/metrics` plus liveness
/// probes on `/healthz`.
pub struct MetricsServer {
    handle: PrometheusHandle,
    cfg: MetricsConfig,
}

impl MetricsServer {
    pub fn install(cfg: MetricsConfig) -> Result<Self> {
        let handle = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("_batch_items".to_string()),
                &[0.0, 1.0, 2.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0],
            )?
            .install_recorder()?;

        Ok(Self { handle, cfg })
    }

    pub async fn serve(self) -> Result<()> {
        let addr: SocketAddr = self.cfg.listen.parse()?;
        let listener = TcpListener::bind(addr).await?;
        info!("metrics listening on http://{}/metrics", addr);

        let handle = Arc::new(self.handle);
        loop {
            let (stream, peer) = listener.accept().await?;
            debug!(%peer, "metrics scrape connection");
            let handle = handle.clone();

            tokio::spawn(async move {
                let service = service_fn(move |req: Request<hyper::body::Incoming>| {
                    let handle = handle.clone();
                    async move { Ok::<_, hyper::Error>(respond(req.uri().path(), &handle)) }
                });
                let _ = hyper::server::conn::http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service)
                    .await;
            });
        }
    }
}

fn respond(path: &str, handle: &PrometheusHandle) -> Response<Full<Bytes>> {
    let (status, content_type, body) = match path {
        "/metrics" => (
            StatusCode::OK,
            "text/plain; version=0.0.4",
            handle.render(),
        ),
        "/healthz" => (StatusCode::OK, "text/plain", "ok\n".to_string()),
        _ => (StatusCode::NOT_FOUND, "text/plain", "not found\n".to_string()),
    };

    Response::builder()
        .status(status)
        .header("content-type", content_type)
        .body(Full::new(Bytes::from(body)))
        .unwrap()
}
