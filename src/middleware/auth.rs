use std::{
    future::{ready, Ready},
    sync::Arc,
};

use actix_web::{
    dev::{forward_ready, Payload, Service, ServiceRequest, ServiceResponse, Transform},
    http::header::AUTHORIZATION,
    web, Error, FromRequest, HttpMessage, HttpRequest,
};
use futures_util::future::LocalBoxFuture;
use tracing::{debug, warn};

use crate::{auth::CredentialManager, error::AppError, models::User, AppState};

/// Subject of a verified session token. No database lookup involved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub user_id: String,
}

/// The active user row behind a verified session token.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub User);

pub fn bearer_token(req: &HttpRequest) -> Option<&str> {
    req.headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| {
            value
                .strip_prefix("Bearer ")
                .or_else(|| value.strip_prefix("bearer "))
        })
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

pub struct Authentication {
    pub credentials: Arc<CredentialManager>,
}

// Middleware factory is `Transform` trait
// `S` - type of the next service
// `B` - type of response's body
impl<S, B> Transform<S, ServiceRequest> for Authentication
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = AuthenticationMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(AuthenticationMiddleware {
            service,
            credentials: self.credentials.clone(),
        }))
    }
}

pub struct AuthenticationMiddleware<S> {
    service: S,
    credentials: Arc<CredentialManager>,
}

impl<S, B> Service<ServiceRequest> for AuthenticationMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        // Rejection is left to the extractors so public routes stay reachable.
        match bearer_token(req.request()) {
            Some(token) => match self.credentials.verify_token(token) {
                Ok(claims) => {
                    debug!("Authenticated user: {}", &claims.sub);
                    req.extensions_mut()
                        .insert(AuthenticatedUser { user_id: claims.sub });
                }
                Err(e) => {
                    debug!("Bearer token is not a session token: {}", e);
                }
            },
            None => {
                debug!("No Authorization header found for {}", req.path());
            }
        };

        let fut = self.service.call(req);

        Box::pin(async move {
            let res = fut.await?;
            Ok(res)
        })
    }
}

impl FromRequest for AuthenticatedUser {
    type Error = AppError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        ready(
            req.extensions()
                .get::<AuthenticatedUser>()
                .cloned()
                .ok_or_else(AppError::unauthorized),
        )
    }
}

impl FromRequest for CurrentUser {
    type Error = AppError;
    type Future = LocalBoxFuture<'static, Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        let authenticated = req.extensions().get::<AuthenticatedUser>().cloned();
        let state = req.app_data::<web::Data<Arc<AppState>>>().cloned();

        Box::pin(async move {
            let authenticated = authenticated.ok_or_else(AppError::unauthorized)?;
            let state = state.ok_or_else(|| {
                AppError::Internal(anyhow::anyhow!("application state not registered"))
            })?;

            let user = User::find_by_id(state.db()?, &authenticated.user_id).await?;
            match user {
                Some(user) if user.is_active => Ok(CurrentUser(user)),
                Some(_) => {
                    warn!("Rejected token for inactive user {}", authenticated.user_id);
                    Err(AppError::unauthorized())
                }
                None => Err(AppError::unauthorized()),
            }
        })
    }
}

impl CurrentUser {
    pub fn require_admin(self, credentials: &CredentialManager) -> Result<User, AppError> {
        Ok(credentials.require_admin(self.0)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{get, test, App, HttpResponse};
    use chrono::Duration;

    use crate::auth::{AdminAllowlist, SessionKeys};

    #[get("/whoami")]
    async fn whoami(user: AuthenticatedUser) -> HttpResponse {
        HttpResponse::Ok().body(user.user_id)
    }

    fn credentials() -> Arc<CredentialManager> {
        Arc::new(CredentialManager::new(
            SessionKeys::new(b"middleware-secret", Duration::minutes(5)),
            AdminAllowlist::default(),
        ))
    }

    #[actix_web::test]
    async fn valid_token_reaches_handler() {
        let credentials = credentials();
        let token = credentials.issue_token("user-9").unwrap();
        let app = test::init_service(
            App::new()
                .wrap(Authentication {
                    credentials: credentials.clone(),
                })
                .service(whoami),
        )
        .await;

        let req = test::TestRequest::get()
            .uri("/whoami")
            .insert_header((AUTHORIZATION, format!("Bearer {token}")))
            .to_request();
        let body = test::call_and_read_body(&app, req).await;
        assert_eq!(body, "user-9");
    }

    #[actix_web::test]
    async fn missing_or_bad_token_is_unauthorized() {
        let app = test::init_service(
            App::new()
                .wrap(Authentication {
                    credentials: credentials(),
                })
                .service(whoami),
        )
        .await;

        let req = test::TestRequest::get().uri("/whoami").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 401);

        let req = test::TestRequest::get()
            .uri("/whoami")
            .insert_header((AUTHORIZATION, "Bearer not-a-jwt"))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 401);
    }
}
