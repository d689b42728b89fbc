//! Admission middleware - the request-facing facade of the rate limiter.
//!
//! Per request: resolve identifier and policy, run the sliding window
//! check through whichever backend the degradation manager has routed to,
//! record the decision, and emit the quota headers. A denial short-circuits
//! the pipeline with the 429 contract; everything else passes through
//! unchanged.

use actix_web::{
    Error, HttpResponse,
    body::EitherBody,
    dev::{Service, ServiceRequest, ServiceResponse, Transform, forward_ready},
    http::header::{self, HeaderMap, HeaderName, HeaderValue},
};
use std::future::{Future, Ready, ready};
use std::pin::Pin;
use std::rc::Rc;
use std::sync::Arc;

use verge_core::domain::{Decision, DecisionQuota};
use verge_core::limiter::{SlidingWindowLimiter, epoch_ms};
use verge_core::ports::{MetricRecord, MetricsRecorder};
use verge_core::resolver::{PolicyResolver, RequestContext};
use verge_shared::dto::RateLimitExceededBody;

use crate::config::HeaderStyle;

/// The designated API key header.
pub static API_KEY_HEADER: &str = "x-api-key";

/// Admission middleware factory.
#[derive(Clone)]
pub struct AdmissionMiddleware {
    limiter: Arc<SlidingWindowLimiter>,
    resolver: Arc<PolicyResolver>,
    metrics: Arc<dyn MetricsRecorder>,
    header_style: HeaderStyle,
}

impl AdmissionMiddleware {
    pub fn new(
        limiter: Arc<SlidingWindowLimiter>,
        resolver: Arc<PolicyResolver>,
        metrics: Arc<dyn MetricsRecorder>,
        header_style: HeaderStyle,
    ) -> Self {
        Self {
            limiter,
            resolver,
            metrics,
            header_style,
        }
    }
}

impl<S, B> Transform<S, ServiceRequest> for AdmissionMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Transform = AdmissionService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(AdmissionService {
            service: Rc::new(service),
            limiter: self.limiter.clone(),
            resolver: self.resolver.clone(),
            metrics: self.metrics.clone(),
            header_style: self.header_style,
        }))
    }
}

pub struct AdmissionService<S> {
    service: Rc<S>,
    limiter: Arc<SlidingWindowLimiter>,
    resolver: Arc<PolicyResolver>,
    metrics: Arc<dyn MetricsRecorder>,
    header_style: HeaderStyle,
}

impl<S, B> Service<ServiceRequest> for AdmissionService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>>>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = Rc::clone(&self.service);
        let limiter = self.limiter.clone();
        let resolver = self.resolver.clone();
        let metrics = self.metrics.clone();
        let header_style = self.header_style;

        Box::pin(async move {
            let api_key = req
                .headers()
                .get(API_KEY_HEADER)
                .and_then(|v| v.to_str().ok())
                .map(String::from);
            // The realip value may be a bare address (from a trusted
            // proxy header) or a socket address with a port.
            let client_ip = req.connection_info().realip_remote_addr().map(|addr| {
                addr.parse::<std::net::SocketAddr>()
                    .map(|sock| sock.ip().to_string())
                    .unwrap_or_else(|_| addr.to_string())
            });
            let method = req.method().as_str().to_string();
            let path = req.path().to_string();

            let resolution = resolver.resolve(&RequestContext {
                api_key: api_key.as_deref(),
                client_ip: client_ip.as_deref(),
                method: &method,
                path: &path,
            });

            if resolution.identity_missing {
                tracing::warn!(
                    %method,
                    %path,
                    "No usable API key or client address; pooling under the shared identifier"
                );
            }

            let decision = match limiter.check(&resolution.identifier, &resolution.policy).await {
                Ok(decision) => decision,
                Err(err) => {
                    // The degradation manager absorbs backend failures, so
                    // this arm means the fallback path itself failed.
                    // Availability wins over enforcement.
                    tracing::error!(%err, "Admission check failed; allowing open");
                    Decision {
                        allowed: true,
                        quota: None,
                    }
                }
            };

            let now_ms = epoch_ms();
            metrics.record(MetricRecord {
                identifier: resolution.identifier.to_string(),
                tier: resolution.policy.tier,
                endpoint: format!("{method} {path}"),
                allowed: decision.allowed,
                remaining: decision.remaining(),
                timestamp_ms: now_ms,
            });

            if !decision.allowed {
                if let Some(quota) = decision.quota {
                    tracing::warn!(
                        identifier = %resolution.identifier,
                        tier = resolution.policy.tier.as_str(),
                        %method,
                        %path,
                        "Rate limit exceeded"
                    );

                    let retry_after = quota.retry_after_secs(now_ms);
                    let body =
                        RateLimitExceededBody::new(retry_after, quota.limit, quota.reset_epoch_secs());

                    let mut response = HttpResponse::TooManyRequests()
                        .insert_header((header::RETRY_AFTER, retry_after.to_string()))
                        .json(body);
                    write_quota_headers(response.headers_mut(), &quota, header_style, now_ms);

                    let (http_req, _payload) = req.into_parts();
                    let res = ServiceResponse::new(http_req, response);
                    return Ok(res.map_into_right_body());
                }
            }

            let quota = decision.quota;
            let res = service.call(req).await?;
            let mut res = res.map_into_left_body();
            if let Some(quota) = quota {
                write_quota_headers(res.headers_mut(), &quota, header_style, now_ms);
            }
            Ok(res)
        })
    }
}

/// Emit the configured header set. Unlimited policies carry no quota and
/// therefore no headers.
fn write_quota_headers(
    headers: &mut HeaderMap,
    quota: &DecisionQuota,
    style: HeaderStyle,
    now_ms: u64,
) {
    match style {
        HeaderStyle::XRateLimit => {
            insert_numeric(headers, "x-ratelimit-limit", quota.limit as u64);
            insert_numeric(headers, "x-ratelimit-remaining", quota.remaining as u64);
            insert_numeric(headers, "x-ratelimit-reset", quota.reset_epoch_secs());
        }
        HeaderStyle::Draft7 => {
            // draft-7 expresses reset as delta seconds, not an epoch.
            let delta = quota.reset_at_ms.saturating_sub(now_ms).div_ceil(1000);
            insert_numeric(headers, "ratelimit-limit", quota.limit as u64);
            insert_numeric(headers, "ratelimit-remaining", quota.remaining as u64);
            insert_numeric(headers, "ratelimit-reset", delta);
        }
    }
}

fn insert_numeric(headers: &mut HeaderMap, name: &'static str, value: u64) {
    if let Ok(value) = HeaderValue::from_str(&value.to_string()) {
        headers.insert(HeaderName::from_static(name), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{App, HttpResponse, test, web};
    use std::net::SocketAddr;
    use std::time::Duration;

    use verge_core::domain::{Quota, TierQuotas};
    use verge_core::resolver::EndpointRule;
    use verge_infra::{
        DegradationManager, FailurePolicy, HealthConfig, InMemoryMetrics, LocalCounterConfig,
        LocalCounterStore, MetricsConfig,
    };

    fn tiny_tiers(max: u32) -> TierQuotas {
        let quota = Quota {
            window: Duration::from_millis(60_000),
            max_requests: max,
        };
        TierQuotas {
            free: quota,
            pro: quota,
            enterprise: quota,
        }
    }

    fn middleware(
        tiers: TierQuotas,
        overrides: Vec<EndpointRule>,
        style: HeaderStyle,
    ) -> AdmissionMiddleware {
        let local = Arc::new(LocalCounterStore::new(LocalCounterConfig::default()));
        let manager = Arc::new(DegradationManager::new(
            local.clone(),
            Some(local as Arc<dyn verge_core::ports::CounterStore>),
            HealthConfig {
                op_timeout: Duration::from_millis(250),
                probe_interval: Duration::from_secs(5),
                failure_policy: FailurePolicy::AllowOpen,
            },
        ));

        AdmissionMiddleware::new(
            Arc::new(SlidingWindowLimiter::new(manager)),
            Arc::new(PolicyResolver::new(tiers, overrides)),
            Arc::new(InMemoryMetrics::new(MetricsConfig::default())),
            style,
        )
    }

    async fn ok_handler() -> HttpResponse {
        HttpResponse::Ok().finish()
    }

    fn peer() -> SocketAddr {
        "10.0.0.1:40000".parse().unwrap()
    }

    fn header_u64(res: &actix_web::dev::ServiceResponse<impl actix_web::body::MessageBody>, name: &str) -> u64 {
        res.headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
            .unwrap()
    }

    #[actix_web::test]
    async fn five_allowed_then_denied_with_retry_after() {
        let app = test::init_service(
            App::new()
                .wrap(middleware(tiny_tiers(5), Vec::new(), HeaderStyle::XRateLimit))
                .route("/api/echo", web::get().to(ok_handler)),
        )
        .await;

        for expected_remaining in (0..5).rev() {
            let req = test::TestRequest::get()
                .uri("/api/echo")
                .peer_addr(peer())
                .to_request();
            let res = test::call_service(&app, req).await;

            assert_eq!(res.status(), 200);
            assert_eq!(header_u64(&res, "x-ratelimit-limit"), 5);
            assert_eq!(header_u64(&res, "x-ratelimit-remaining"), expected_remaining);
        }

        let req = test::TestRequest::get()
            .uri("/api/echo")
            .peer_addr(peer())
            .to_request();
        let res = test::call_service(&app, req).await;

        assert_eq!(res.status(), 429);
        assert_eq!(header_u64(&res, "x-ratelimit-remaining"), 0);
        let retry_after = header_u64(&res, "retry-after");
        assert!((59..=61).contains(&retry_after), "retry-after was {retry_after}");

        let body: serde_json::Value = test::read_body_json(res).await;
        assert_eq!(body["error"], "rate_limit_exceeded");
        assert_eq!(body["limit"], 5);
        assert_eq!(body["retryAfter"], retry_after);
    }

    #[actix_web::test]
    async fn admin_key_is_never_limited_and_carries_no_quota_headers() {
        let app = test::init_service(
            App::new()
                .wrap(middleware(tiny_tiers(1), Vec::new(), HeaderStyle::XRateLimit))
                .route("/api/echo", web::get().to(ok_handler)),
        )
        .await;

        for _ in 0..10 {
            let req = test::TestRequest::get()
                .uri("/api/echo")
                .insert_header(("x-api-key", "admin_root"))
                .peer_addr(peer())
                .to_request();
            let res = test::call_service(&app, req).await;

            assert_eq!(res.status(), 200);
            assert!(res.headers().get("x-ratelimit-limit").is_none());
        }
    }

    #[actix_web::test]
    async fn endpoint_override_is_stricter_than_the_tier_default() {
        let strict = Quota {
            window: Duration::from_millis(60_000),
            max_requests: 1,
        };
        let rule = EndpointRule::new("render", "GET", "/api/render/*", strict).unwrap();

        let app = test::init_service(
            App::new()
                .wrap(middleware(tiny_tiers(100), vec![rule], HeaderStyle::XRateLimit))
                .route("/api/render/{id}", web::get().to(ok_handler))
                .route("/api/echo", web::get().to(ok_handler)),
        )
        .await;

        let req = test::TestRequest::get()
            .uri("/api/render/4hhb")
            .peer_addr(peer())
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 200);

        let req = test::TestRequest::get()
            .uri("/api/render/4hhb")
            .peer_addr(peer())
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 429);

        // The tier default still governs other endpoints.
        let req = test::TestRequest::get()
            .uri("/api/echo")
            .peer_addr(peer())
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 200);
    }

    #[actix_web::test]
    async fn draft7_headers_use_delta_seconds() {
        let app = test::init_service(
            App::new()
                .wrap(middleware(tiny_tiers(5), Vec::new(), HeaderStyle::Draft7))
                .route("/api/echo", web::get().to(ok_handler)),
        )
        .await;

        let req = test::TestRequest::get()
            .uri("/api/echo")
            .peer_addr(peer())
            .to_request();
        let res = test::call_service(&app, req).await;

        assert_eq!(res.status(), 200);
        assert!(res.headers().get("x-ratelimit-limit").is_none());
        assert_eq!(header_u64(&res, "ratelimit-limit"), 5);
        let reset = header_u64(&res, "ratelimit-reset");
        assert!((1..=60).contains(&reset), "delta reset was {reset}");
    }

    #[actix_web::test]
    async fn requests_without_any_identity_share_one_bucket() {
        let app = test::init_service(
            App::new()
                .wrap(middleware(tiny_tiers(1), Vec::new(), HeaderStyle::XRateLimit))
                .route("/api/echo", web::get().to(ok_handler)),
        )
        .await;

        // No peer address, no API key: both calls pool on ip:unknown.
        let res = test::call_service(
            &app,
            test::TestRequest::get().uri("/api/echo").to_request(),
        )
        .await;
        assert_eq!(res.status(), 200);

        let res = test::call_service(
            &app,
            test::TestRequest::get().uri("/api/echo").to_request(),
        )
        .await;
        assert_eq!(res.status(), 429);
    }
}
