//! Prometheus metrics and the `/metrics` + `/healthz` endpoint

use anyhow::Result;
use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use prometheus::{Encoder, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Outcome label for a finished pass
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PassOutcome {
    Success,
    /// The pass ran but some objects or addresses could not be updated
    Partial,
    Error,
}

impl PassOutcome {
    fn as_label(self) -> &'static str {
        match self {
            PassOutcome::Success => "success",
            PassOutcome::Partial => "partial",
            PassOutcome::Error => "error",
        }
    }
}

/// Counters shared by both reconcilers
#[derive(Clone)]
pub struct Metrics {
    /// Reconciliation passes by reconciler and outcome
    pub reconcile_passes_total: IntCounterVec,
    /// Router IDs newly persisted, by ASN
    pub router_ids_allocated_total: IntCounterVec,
    /// Node annotation writes by ASN and outcome
    pub node_updates_total: IntCounterVec,
    /// Passes that ran out of pool addresses, by ASN
    pub pool_exhausted_total: IntCounterVec,
    /// Interface address changes by operation and outcome
    pub interface_changes_total: IntCounterVec,
    /// Size of the last computed desired address set
    pub desired_addresses: IntGauge,
    pub registry: Arc<Registry>,
}

impl Metrics {
    pub fn new() -> Result<Self> {
        let registry = Arc::new(Registry::new());

        let reconcile_passes_total = IntCounterVec::new(
            Opts::new("netsync_reconcile_passes_total", "Reconciliation passes"),
            &["reconciler", "outcome"],
        )?;
        let router_ids_allocated_total = IntCounterVec::new(
            Opts::new("netsync_router_ids_allocated_total", "Router IDs allocated to nodes"),
            &["asn"],
        )?;
        let node_updates_total = IntCounterVec::new(
            Opts::new("netsync_node_updates_total", "Node annotation updates"),
            &["asn", "outcome"],
        )?;
        let pool_exhausted_total = IntCounterVec::new(
            Opts::new("netsync_pool_exhausted_total", "Passes that exhausted an address pool"),
            &["asn"],
        )?;
        let interface_changes_total = IntCounterVec::new(
            Opts::new("netsync_interface_changes_total", "Interface address changes"),
            &["op", "outcome"],
        )?;
        let desired_addresses = IntGauge::new(
            "netsync_desired_addresses",
            "Service addresses that should be present on the interface",
        )?;

        registry.register(Box::new(reconcile_passes_total.clone()))?;
        registry.register(Box::new(router_ids_allocated_total.clone()))?;
        registry.register(Box::new(node_updates_total.clone()))?;
        registry.register(Box::new(pool_exhausted_total.clone()))?;
        registry.register(Box::new(interface_changes_total.clone()))?;
        registry.register(Box::new(desired_addresses.clone()))?;

        Ok(Self {
            reconcile_passes_total,
            router_ids_allocated_total,
            node_updates_total,
            pool_exhausted_total,
            interface_changes_total,
            desired_addresses,
            registry,
        })
    }

    pub fn record_pass(&self, reconciler: &str, outcome: PassOutcome) {
        self.reconcile_passes_total
            .with_label_values(&[reconciler, outcome.as_label()])
            .inc();
    }

    pub fn record_node_update(&self, asn: &str, ok: bool) {
        let outcome = if ok { "success" } else { "error" };
        self.node_updates_total.with_label_values(&[asn, outcome]).inc();
    }

    pub fn record_interface_change(&self, op: &str, ok: bool) {
        let outcome = if ok { "success" } else { "error" };
        self.interface_changes_total
            .with_label_values(&[op, outcome])
            .inc();
    }

    /// Gather all metrics in Prometheus text format
    pub fn gather(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = vec![];
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

/// Serve `/metrics` and `/healthz` until shutdown is signalled
pub async fn serve(
    addr: SocketAddr,
    metrics: Arc<Metrics>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let listener = TcpListener::bind(&addr).await?;
    info!("Metrics server listening on {}", addr);

    loop {
        let (stream, peer_addr) = tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("Error accepting metrics connection: {}", e);
                    continue;
                }
            },
            _ = shutdown.changed() => break,
        };

        let metrics = metrics.clone();
        tokio::task::spawn(async move {
            let service = service_fn(move |req: Request<Incoming>| {
                let metrics = metrics.clone();
                async move { Ok::<_, Infallible>(respond(req.method(), req.uri().path(), &metrics)) }
            });

            if let Err(e) = http1::Builder::new()
                .serve_connection(TokioIo::new(stream), service)
                .await
            {
                debug!("Error serving metrics connection from {}: {}", peer_addr, e);
            }
        });
    }

    info!("Metrics server stopped");
    Ok(())
}

fn respond(method: &Method, path: &str, metrics: &Metrics) -> Response<Full<Bytes>> {
    match (method, path) {
        (&Method::GET, "/metrics") => match metrics.gather() {
            Ok(text) => {
                let mut response = Response::new(Full::new(Bytes::from(text)));
                response.headers_mut().insert(
                    CONTENT_TYPE,
                    HeaderValue::from_static("text/plain; version=0.0.4"),
                );
                response
            }
            Err(e) => {
                warn!("Failed to gather metrics: {}", e);
                with_status(StatusCode::INTERNAL_SERVER_ERROR, "Failed to gather metrics\n")
            }
        },
        (_, "/healthz") => with_status(StatusCode::OK, "OK\n"),
        _ => with_status(StatusCode::NOT_FOUND, "Not Found\n"),
    }
}

fn with_status(status: StatusCode, body: &'static str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from_static(body.as_bytes())));
    *response.status_mut() = status;
    response
}
