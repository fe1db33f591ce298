//! Internal authentication middleware.
//!
//! The service sits behind a web frontend, not the open internet. When an
//! internal token is configured (mandatory in production) every request must
//! carry it; health and build-info stay public for load balancers. Per-user
//! identity is handled by the passkey session binding, not here.

use actix_web::body::{EitherBody, MessageBody};
use actix_web::dev::{Service, ServiceRequest, ServiceResponse, Transform, forward_ready};
use actix_web::{Error, HttpResponse};
use futures_util::future::{LocalBoxFuture, Ready, ready};

use crate::config::Settings;

/// Paths that stay reachable without the internal token.
const PUBLIC_PATHS: &[&str] = &["/health", "/build-info"];

/// Middleware enforcing internal service token authentication.
#[derive(Clone)]
pub struct InternalAuth {
    required: bool,
    token: Option<String>,
}

impl InternalAuth {
    /// Build from service settings.
    pub fn new(settings: &Settings) -> Self {
        Self {
            required: settings.internal_token_required(),
            token: settings.internal_token().map(ToString::to_string),
        }
    }

    /// Build directly from config (used for tests).
    pub fn from_config(required: bool, token: Option<String>) -> Self {
        Self { required, token }
    }

    /// Whether a request carrying `provided` may pass.
    ///
    /// A supplied token must always match the configured one; omitting the
    /// token is tolerated only outside of production (`required` unset).
    fn authorize(&self, provided: Option<&str>) -> bool {
        match (&self.token, provided) {
            (Some(expected), Some(provided)) => provided == expected,
            (_, _) => !self.required,
        }
    }

    fn extract_token(req: &ServiceRequest) -> Option<String> {
        let headers = req.headers();

        // Prefer Authorization: Bearer <token>
        if let Some(value) = headers.get("authorization")
            && let Ok(value) = value.to_str()
            && let Some(token) = value.strip_prefix("Bearer ")
        {
            return Some(token.trim().to_string());
        }

        // Fallback: X-Internal-Token header
        headers
            .get("x-internal-token")
            .and_then(|value| value.to_str().ok())
            .map(|value| value.trim().to_string())
    }
}

impl<S, B> Transform<S, ServiceRequest> for InternalAuth
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type InitError = ();
    type Transform = InternalAuthMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(InternalAuthMiddleware {
            service,
            auth: self.clone(),
        }))
    }
}

pub struct InternalAuthMiddleware<S> {
    service: S,
    auth: InternalAuth,
}

impl<S, B> Service<ServiceRequest> for InternalAuthMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let public = PUBLIC_PATHS.contains(&req.path());

        if !public {
            let provided = InternalAuth::extract_token(&req);
            if !self.auth.authorize(provided.as_deref()) {
                let (req, _pl) = req.into_parts();
                let response = HttpResponse::Unauthorized().json(serde_json::json!({
                    "error": "Unauthorized",
                }));
                return Box::pin(async move {
                    Ok(ServiceResponse::new(req, response.map_into_right_body()))
                });
            }
        }

        let fut = self.service.call(req);
        Box::pin(async move { fut.await.map(ServiceResponse::map_into_left_body) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{App, HttpResponse, test as actix_test, web};

    #[test]
    fn authorize_matrix() {
        // No token configured
        assert!(InternalAuth::from_config(false, None).authorize(None));
        assert!(!InternalAuth::from_config(true, None).authorize(None));

        // Token configured: a supplied token must match; omission is a
        // development-mode allowance
        let auth = InternalAuth::from_config(false, Some("secret".to_string()));
        assert!(auth.authorize(Some("secret")));
        assert!(!auth.authorize(Some("wrong")));
        assert!(auth.authorize(None));

        let auth = InternalAuth::from_config(true, Some("secret".to_string()));
        assert!(auth.authorize(Some("secret")));
        assert!(!auth.authorize(None));
    }

    #[actix_rt::test]
    async fn allows_public_routes_without_token() {
        let auth = InternalAuth::from_config(true, Some("secret".to_string()));

        let app = actix_test::init_service(App::new().wrap(auth).route(
            "/health",
            web::get().to(|| async { HttpResponse::Ok().finish() }),
        ))
        .await;

        let req = actix_test::TestRequest::get().uri("/health").to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert!(resp.status().is_success());
    }

    #[actix_rt::test]
    async fn rejects_missing_token_when_required() {
        let auth = InternalAuth::from_config(true, Some("secret".to_string()));

        let app = actix_test::init_service(App::new().wrap(auth).route(
            "/safe/create",
            web::post().to(|| async { HttpResponse::Ok().finish() }),
        ))
        .await;

        let req = actix_test::TestRequest::post().uri("/safe/create").to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), actix_web::http::StatusCode::UNAUTHORIZED);
    }

    #[actix_rt::test]
    async fn accepts_valid_token_when_required() {
        let auth = InternalAuth::from_config(true, Some("secret".to_string()));

        let app = actix_test::init_service(App::new().wrap(auth).route(
            "/safe/create",
            web::post().to(|| async { HttpResponse::Ok().finish() }),
        ))
        .await;

        let req = actix_test::TestRequest::post()
            .uri("/safe/create")
            .insert_header(("authorization", "Bearer secret"))
            .to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert!(resp.status().is_success());
    }
}
