//! Passkey authentication endpoints.
//!
//! Each endpoint is a synchronous wrapper around the corresponding
//! `PasskeyAuthProtocol` call, returning its result or propagating the typed
//! error as an HTTP status.

use actix_web::{HttpRequest, HttpResponse, ResponseError, web};
use serde_json::json;
use uuid::Uuid;

use crate::auth::PasskeyAuthProtocol;
use crate::auth::passkey::{ChallengeRequest, LoginRequest, RegisterRequest};
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::user::User;

/// Resolve the caller's login session from the `x-session-id` header.
pub fn session_user(
    req: &HttpRequest,
    auth: &PasskeyAuthProtocol,
) -> OrchestratorResult<User> {
    let session_id = req
        .headers()
        .get("x-session-id")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<Uuid>().ok())
        .ok_or(OrchestratorError::Unauthenticated)?;
    auth.authenticate(&session_id)
}

/// POST /auth/passkey/challenge
///
/// Issue a challenge for the explicitly requested branch (register or login).
#[tracing::instrument(skip(auth, request))]
pub async fn challenge(
    auth: web::Data<PasskeyAuthProtocol>,
    request: web::Json<ChallengeRequest>,
) -> HttpResponse {
    HttpResponse::Ok().json(auth.issue_challenge(&request))
}

/// POST /auth/passkey/register
///
/// Verify an attestation against a register challenge and create the user.
#[tracing::instrument(skip(auth, request), fields(credential_id = %request.credential_id))]
pub async fn register(
    auth: web::Data<PasskeyAuthProtocol>,
    request: web::Json<RegisterRequest>,
) -> HttpResponse {
    match auth.register(&request) {
        Ok(session) => HttpResponse::Ok().json(session),
        Err(e) => {
            tracing::warn!(error = %e, "Passkey registration failed");
            e.error_response()
        }
    }
}

/// POST /auth/passkey/login
///
/// Verify an assertion against a login challenge and bind a session.
#[tracing::instrument(skip(auth, request), fields(credential_id = %request.credential_id))]
pub async fn login(
    auth: web::Data<PasskeyAuthProtocol>,
    request: web::Json<LoginRequest>,
) -> HttpResponse {
    match auth.login(&request) {
        Ok(session) => {
            // Return the user's Safe inventory alongside the session binding
            match auth.authenticate(&session.session_id) {
                Ok(user) => HttpResponse::Ok().json(json!({
                    "sessionId": session.session_id,
                    "customId": session.custom_id,
                    "username": session.username,
                    "safesByChain": user.safes_by_chain,
                })),
                Err(e) => e.error_response(),
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "Passkey login failed");
            e.error_response()
        }
    }
}

/// POST /auth/logout
///
/// Clear the caller's session binding.
#[tracing::instrument(skip(auth, req))]
pub async fn logout(auth: web::Data<PasskeyAuthProtocol>, req: HttpRequest) -> HttpResponse {
    let session_id = req
        .headers()
        .get("x-session-id")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<Uuid>().ok());

    match session_id {
        Some(session_id) => {
            auth.logout(&session_id);
            HttpResponse::NoContent().finish()
        }
        None => OrchestratorError::Unauthenticated.error_response(),
    }
}

/// Configure auth routes; mounted under `/auth` by the server so the scope
/// can carry its own rate-limit tier.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/passkey/challenge", web::post().to(challenge))
        .route("/passkey/register", web::post().to(register))
        .route("/passkey/login", web::post().to(login))
        .route("/logout", web::post().to(logout));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::test_support::{test_keypair, webauthn_proof};
    use crate::auth::webauthn::Ceremony;
    use crate::auth::{ChallengeStore, SessionStore};
    use crate::user::UserStore;
    use actix_web::{App, test};
    use alloy_primitives::{B256, Bytes};
    use std::time::Duration;

    fn protocol_data() -> web::Data<PasskeyAuthProtocol> {
        web::Data::new(PasskeyAuthProtocol::new(
            ChallengeStore::new(Duration::from_secs(300)),
            SessionStore::new(Duration::from_secs(3600)),
            UserStore::open_memory().unwrap(),
            None,
        ))
    }

    #[actix_rt::test]
    async fn test_register_flow_over_http() {
        let data = protocol_data();
        let app = test::init_service(
            App::new()
                .app_data(data.clone())
                .service(web::scope("/auth").configure(configure)),
        )
        .await;

        // Challenge
        let req = test::TestRequest::post()
            .uri("/auth/passkey/challenge")
            .set_json(serde_json::json!({"mode": "register", "username": "alice"}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert!(resp.status().is_success());
        let body: serde_json::Value = test::read_body_json(resp).await;
        let challenge: B256 = body["challenge"].as_str().unwrap().parse().unwrap();

        // Register
        let (signing_key, public_key) = test_keypair();
        let (data_bytes, r, s) = webauthn_proof(&signing_key, &challenge, Ceremony::Create);
        let req = test::TestRequest::post()
            .uri("/auth/passkey/register")
            .set_json(serde_json::json!({
                "challenge": challenge,
                "credentialId": "cred-1",
                "publicKey": {"x": public_key.x, "y": public_key.y},
                "webauthnData": Bytes::from(data_bytes),
                "signatureR": r,
                "signatureS": s,
            }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert!(resp.status().is_success());
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["username"], "alice");
        assert!(body["sessionId"].as_str().is_some());
    }

    #[actix_rt::test]
    async fn test_stale_challenge_is_unauthorized() {
        let data = protocol_data();
        let app = test::init_service(
            App::new()
                .app_data(data.clone())
                .service(web::scope("/auth").configure(configure)),
        )
        .await;

        let (signing_key, public_key) = test_keypair();
        let challenge = B256::repeat_byte(0x77); // never issued
        let (data_bytes, r, s) = webauthn_proof(&signing_key, &challenge, Ceremony::Create);

        let req = test::TestRequest::post()
            .uri("/auth/passkey/register")
            .set_json(serde_json::json!({
                "challenge": challenge,
                "credentialId": "cred-1",
                "publicKey": {"x": public_key.x, "y": public_key.y},
                "webauthnData": Bytes::from(data_bytes),
                "signatureR": r,
                "signatureS": s,
            }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), actix_web::http::StatusCode::UNAUTHORIZED);
    }

    #[actix_rt::test]
    async fn test_logout_without_session_rejected() {
        let data = protocol_data();
        let app = test::init_service(
            App::new()
                .app_data(data.clone())
                .service(web::scope("/auth").configure(configure)),
        )
        .await;

        let req = test::TestRequest::post().uri("/auth/logout").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), actix_web::http::StatusCode::UNAUTHORIZED);
    }
}
