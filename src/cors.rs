// Origin allow-list gate, applied in front of every route.

use actix_cors::Cors;
use actix_web::body::{EitherBody, MessageBody};
use actix_web::dev::{ServiceRequest, ServiceResponse};
use actix_web::http::Method;
use actix_web::http::header::{self, HeaderMap};
use actix_web::middleware::Next;
use actix_web::{Error, HttpResponse, ResponseError, web};
use reqwest::Url;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::ApiError;

pub const ALLOWED_METHODS: &str = "GET,OPTIONS";
pub const PREFLIGHT_MAX_AGE_SECS: usize = 86_400;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OriginCheck {
    /// Neither `Origin` nor `Referer` was sent.
    SameOrigin,
    /// `Origin` was sent and is on the allow-list; it is echoed back.
    Allowed(String),
    /// Only a `Referer` was sent and it points at an allowed origin or at
    /// this host.
    AllowedReferer,
    Rejected(String),
}

#[derive(Debug, Clone)]
pub struct CorsPolicy {
    allowed: Arc<Vec<String>>,
}

impl CorsPolicy {
    pub fn new(allowed: impl IntoIterator<Item = String>) -> Self {
        CorsPolicy {
            allowed: Arc::new(
                allowed
                    .into_iter()
                    .map(|o| o.trim().trim_end_matches('/').to_string())
                    .collect(),
            ),
        }
    }

    pub fn allows(&self, origin: &str) -> bool {
        let origin = origin.trim().trim_end_matches('/');
        self.allowed.iter().any(|a| a.eq_ignore_ascii_case(origin))
    }

    /// Decides whether a request may proceed, given its `Origin`, `Referer`
    /// and the host it was addressed to.
    pub fn evaluate(&self, origin: Option<&str>, referer: Option<&str>, host: &str) -> OriginCheck {
        if let Some(origin) = origin {
            return if self.allows(origin) {
                OriginCheck::Allowed(origin.trim().to_string())
            } else {
                OriginCheck::Rejected(origin.to_string())
            };
        }

        let Some(referer) = referer else {
            return OriginCheck::SameOrigin;
        };

        match Url::parse(referer) {
            Ok(url) => {
                let referer_origin = url.origin().ascii_serialization();
                let authority = match (url.host_str(), url.port()) {
                    (Some(h), Some(p)) => format!("{}:{}", h, p),
                    (Some(h), None) => h.to_string(),
                    (None, _) => String::new(),
                };

                if self.allows(&referer_origin) || authority.eq_ignore_ascii_case(host) {
                    OriginCheck::AllowedReferer
                } else {
                    OriginCheck::Rejected(referer_origin)
                }
            }
            Err(_) => OriginCheck::Rejected(referer.to_string()),
        }
    }

    /// `actix-cors` layer that echoes allowed origins on actual responses.
    pub fn cors(&self) -> Cors {
        let policy = self.clone();
        Cors::default()
            .allowed_origin_fn(move |origin, _| {
                origin.to_str().map(|o| policy.allows(o)).unwrap_or(false)
            })
            .allowed_methods(vec!["GET", "OPTIONS"])
            .max_age(PREFLIGHT_MAX_AGE_SECS)
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: header::HeaderName) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn preflight_response(check: &OriginCheck) -> HttpResponse {
    let mut builder = HttpResponse::NoContent();
    if let OriginCheck::Allowed(origin) = check {
        builder.insert_header((header::ACCESS_CONTROL_ALLOW_ORIGIN, origin.as_str()));
    }
    builder
        .insert_header((header::ACCESS_CONTROL_ALLOW_METHODS, ALLOWED_METHODS))
        .insert_header((header::ACCESS_CONTROL_ALLOW_HEADERS, "Content-Type"))
        .insert_header((header::ACCESS_CONTROL_MAX_AGE, PREFLIGHT_MAX_AGE_SECS.to_string()))
        .insert_header((header::VARY, "Origin"))
        .finish()
}

/// Rejects disallowed origins with 403 and answers preflights directly.
/// Nothing behind the gate runs for either.
pub async fn cors_gate<B: MessageBody + 'static>(
    req: ServiceRequest,
    next: Next<B>,
) -> Result<ServiceResponse<EitherBody<B>>, Error> {
    let Some(policy) = req.app_data::<web::Data<CorsPolicy>>().cloned() else {
        warn!("⚠️  No CORS policy registered, passing {} through", req.path());
        return next.call(req).await.map(ServiceResponse::map_into_left_body);
    };

    let check = {
        let host = req.connection_info().host().to_string();
        let headers = req.headers();
        policy.evaluate(
            header_str(headers, header::ORIGIN),
            header_str(headers, header::REFERER),
            &host,
        )
    };

    if let OriginCheck::Rejected(origin) = check {
        warn!("🚫 Rejected {} {} from origin {}", req.method(), req.path(), origin);
        let response = ApiError::UnauthorizedOrigin(origin).error_response();
        return Ok(req.into_response(response).map_into_right_body());
    }

    if req.method() == Method::OPTIONS {
        debug!("✈️  Preflight for {}", req.path());
        let response = preflight_response(&check);
        return Ok(req.into_response(response).map_into_right_body());
    }

    next.call(req).await.map(ServiceResponse::map_into_left_body)
}
