use actix_web::{
    dev::{Service, ServiceRequest, ServiceResponse, Transform},
    Error,
};
use futures::future::{ready, Ready};
use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, Opts};
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::time::Instant;

struct HttpMetrics {
    requests_total: IntCounterVec,
    request_duration_seconds: HistogramVec,
}

static HTTP_METRICS: Lazy<Option<HttpMetrics>> = Lazy::new(|| {
    let requests_total = IntCounterVec::new(
        Opts::new("http_requests_total", "Total HTTP requests"),
        &["method", "path", "status"],
    )
    .ok()?;
    let request_duration_seconds = HistogramVec::new(
        HistogramOpts::new("http_request_duration_seconds", "HTTP request latency").buckets(vec![
            0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
        ]),
        &["method", "path", "status"],
    )
    .ok()?;

    let registry = prometheus::default_registry();
    if let Err(e) = registry.register(Box::new(requests_total.clone())) {
        tracing::warn!("failed to register http_requests_total: {}", e);
    }
    if let Err(e) = registry.register(Box::new(request_duration_seconds.clone())) {
        tracing::warn!("failed to register http_request_duration_seconds: {}", e);
    }

    Some(HttpMetrics {
        requests_total,
        request_duration_seconds,
    })
});

/// Prometheus Metrics Middleware
///
/// Labels requests by route pattern (`/messages/{id}`), not the raw path.
pub struct MetricsMiddleware;

impl<S, B> Transform<S, ServiceRequest> for MetricsMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Transform = MetricsMiddlewareService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(MetricsMiddlewareService {
            service: Rc::new(service),
        }))
    }
}

pub struct MetricsMiddlewareService<S> {
    service: Rc<S>,
}

impl<S, B> Service<ServiceRequest> for MetricsMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>>>>;

    actix_web::dev::forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = self.service.clone();
        let start = Instant::now();
        let method = req.method().to_string();
        let path = req
            .match_pattern()
            .unwrap_or_else(|| "unmatched".to_string());

        Box::pin(async move {
            let res = service.call(req).await?;

            if let Some(metrics) = HTTP_METRICS.as_ref() {
                let status = res.status().as_u16().to_string();
                metrics
                    .requests_total
                    .with_label_values(&[&method, &path, &status])
                    .inc();
                metrics
                    .request_duration_seconds
                    .with_label_values(&[&method, &path, &status])
                    .observe(start.elapsed().as_secs_f64());
            }

            Ok(res)
        })
    }
}
