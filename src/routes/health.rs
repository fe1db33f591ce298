//! Health check and build info endpoints.
//!
//! These endpoints are public (no authentication required).

use actix_web::{HttpResponse, web};
use serde::{Deserialize, Serialize};

use crate::config::Settings;

/// Health check response.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct HealthResponse {
    pub status: String,
    pub chains: Vec<u64>,
}

/// Build information response.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BuildInfoResponse {
    pub service: String,
    pub version: String,
    pub git_sha: String,
    pub build_time: String,
}

/// GET /health
///
/// Returns service health status. Used by load balancers and monitoring.
#[tracing::instrument(skip(settings))]
pub async fn health(settings: web::Data<Settings>) -> HttpResponse {
    let response = HealthResponse {
        status: "ok".to_string(),
        chains: settings.supported_chains().to_vec(),
    };

    HttpResponse::Ok().json(response)
}

/// GET /build-info
///
/// Returns build metadata for deployment verification.
#[tracing::instrument]
pub async fn build_info() -> HttpResponse {
    let response = BuildInfoResponse {
        service: "safe-orchestrator".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        git_sha: env!("GIT_SHA").to_string(),
        build_time: env!("BUILD_TIME").to_string(),
    };

    HttpResponse::Ok().json(response)
}

/// Configure health routes on the given scope.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health))
        .route("/build-info", web::get().to(build_info));
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{App, test};

    #[actix_rt::test]
    async fn test_health() {
        let settings = Settings::for_tests();
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(settings))
                .configure(configure),
        )
        .await;

        let req = test::TestRequest::get().uri("/health").to_request();
        let resp = test::call_service(&app, req).await;

        assert!(resp.status().is_success());

        let body: HealthResponse = test::read_body_json(resp).await;
        assert_eq!(body.status, "ok");
        assert_eq!(body.chains, vec![11_155_111]);
    }

    #[actix_rt::test]
    async fn test_build_info() {
        let settings = Settings::for_tests();
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(settings))
                .configure(configure),
        )
        .await;

        let req = test::TestRequest::get().uri("/build-info").to_request();
        let resp = test::call_service(&app, req).await;

        assert!(resp.status().is_success());

        let body: BuildInfoResponse = test::read_body_json(resp).await;
        assert_eq!(body.service, "safe-orchestrator");
    }
}
