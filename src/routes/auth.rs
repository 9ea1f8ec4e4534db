use std::sync::Arc;

use actix_web::{get, patch, post, web, HttpRequest};
use tracing::info;

use crate::auth::{FederatedIdentity, Signup};
use crate::error::AppError;
use crate::middleware::auth::{bearer_token, AuthenticatedUser, CurrentUser};
use crate::models::User;
use crate::types::{
    EmployeesQuery, FederatedSyncRequest, LoginRequest, MessageResponse, SignupRequest,
    TokenResponse, UpdateUserRequest,
};
use crate::AppState;

fn validate_signup(req: &SignupRequest) -> Result<(), AppError> {
    let email = req.email.trim();
    if email.is_empty() || !email.contains('@') {
        return Err(AppError::Validation("A valid email is required".to_string()));
    }
    if req.password.is_empty() {
        return Err(AppError::Validation("Password is required".to_string()));
    }
    if req.name.trim().is_empty() {
        return Err(AppError::Validation("Name is required".to_string()));
    }
    Ok(())
}

#[post("/signup")]
pub async fn signup(
    app_state: web::Data<Arc<AppState>>,
    body: web::Json<SignupRequest>,
) -> Result<web::Json<TokenResponse>, AppError> {
    validate_signup(&body)?;
    let pool = app_state.db()?;

    let user = app_state
        .credentials
        .register(
            pool,
            Signup {
                email: &body.email,
                password: &body.password,
                name: body.name.trim(),
                role: body.role.as_deref(),
                company_id: body.company_id.as_deref(),
            },
        )
        .await?;

    let token = app_state.credentials.issue_token(&user.id)?;
    Ok(web::Json(TokenResponse::bearer(token, user)))
}

#[post("/login")]
pub async fn login(
    app_state: web::Data<Arc<AppState>>,
    body: web::Json<LoginRequest>,
) -> Result<web::Json<TokenResponse>, AppError> {
    let pool = app_state.db()?;
    let user = app_state
        .credentials
        .authenticate(pool, &body.email, &body.password)
        .await?;

    info!("User logged in: {}", user.id);
    let token = app_state.credentials.issue_token(&user.id)?;
    Ok(web::Json(TokenResponse::bearer(token, user)))
}

#[get("/me")]
pub async fn me(current_user: CurrentUser) -> web::Json<User> {
    web::Json(current_user.0)
}

/// Sessions are stateless; the client drops its token.
#[post("/logout")]
pub async fn logout(authenticated_user: AuthenticatedUser) -> web::Json<MessageResponse> {
    info!("User logged out: {}", authenticated_user.user_id);
    web::Json(MessageResponse::new("Successfully logged out"))
}

#[get("/employees")]
pub async fn employees(
    app_state: web::Data<Arc<AppState>>,
    current_user: CurrentUser,
    query: web::Query<EmployeesQuery>,
) -> Result<web::Json<Vec<User>>, AppError> {
    current_user.require_admin(&app_state.credentials)?;
    // every company unless one is asked for
    let company_id = query
        .company_id
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty());

    let users = User::list_employees(app_state.db()?, company_id).await?;
    Ok(web::Json(users))
}

#[patch("/users/{user_id}")]
pub async fn update_user(
    app_state: web::Data<Arc<AppState>>,
    current_user: CurrentUser,
    user_id: web::Path<String>,
    body: web::Json<UpdateUserRequest>,
) -> Result<web::Json<User>, AppError> {
    current_user.require_admin(&app_state.credentials)?;
    let name = body.name.as_deref().map(str::trim).filter(|n| !n.is_empty());

    let user = User::update_profile(app_state.db()?, &user_id, name, body.is_active)
        .await?
        .ok_or_else(|| AppError::not_found("User"))?;
    info!("User {} updated (active: {})", user.id, user.is_active);
    Ok(web::Json(user))
}

/// Exchanges a federated ID token for a local session, provisioning the user on first sight.
#[post("/google-sync")]
pub async fn federated_sync(
    app_state: web::Data<Arc<AppState>>,
    req: HttpRequest,
    body: Option<web::Json<FederatedSyncRequest>>,
) -> Result<web::Json<TokenResponse>, AppError> {
    let verifier = app_state.identity.as_ref().ok_or_else(|| {
        AppError::Unauthorized("Federated sign-in is not configured".to_string())
    })?;
    let id_token = bearer_token(&req).ok_or_else(AppError::unauthorized)?;
    let body = body.map(web::Json::into_inner).unwrap_or_default();

    let mut identity: FederatedIdentity = verifier.verify(id_token).await?;
    if let Some(name) = body.name.filter(|n| !n.trim().is_empty()) {
        identity.name = Some(name);
    }

    let user = app_state
        .credentials
        .resolve_or_provision(
            app_state.db()?,
            &identity,
            body.role.as_deref(),
            body.company_id.as_deref(),
        )
        .await?;

    let token = app_state.credentials.issue_token(&user.id)?;
    Ok(web::Json(TokenResponse::bearer(token, user)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{test, App};
    use serde_json::json;

    use crate::routes;

    #[actix_web::test]
    async fn signup_requires_fields() {
        let valid = SignupRequest {
            email: "a@x.com".to_string(),
            password: "pw".to_string(),
            name: "A".to_string(),
            role: Some("employee".to_string()),
            company_id: Some("c1".to_string()),
        };
        assert!(validate_signup(&valid).is_ok());

        let no_at = SignupRequest {
            email: "ax.com".to_string(),
            ..valid
        };
        assert!(matches!(validate_signup(&no_at), Err(AppError::Validation(_))));
    }

    #[actix_web::test]
    async fn signup_without_database_is_a_500() {
        let state = AppState::for_tests(None);
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .configure(routes::configure),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/api/auth/signup")
            .set_json(json!({"email": "a@x.com", "password": "pw", "name": "A"}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 500);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["detail"], "database unavailable");
    }

    #[actix_web::test]
    async fn me_requires_a_token() {
        let state = AppState::for_tests(None);
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state.clone()))
                .wrap(crate::middleware::auth::Authentication {
                    credentials: state.credentials.clone(),
                })
                .configure(routes::configure),
        )
        .await;

        let req = test::TestRequest::get().uri("/api/auth/me").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 401);
    }

    #[actix_web::test]
    #[ignore = "requires DATABASE_URL"]
    async fn duplicate_signup_conflicts_case_insensitively() {
        let url = std::env::var("DATABASE_URL").unwrap();
        let pool = sqlx::PgPool::connect(&url).await.unwrap();
        crate::schema::reconcile(&pool).await.unwrap();
        let email = format!("dup-{}@x.com", uuid::Uuid::new_v4());

        let state = AppState::for_tests(Some(pool));
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .configure(routes::configure),
        )
        .await;

        let first = test::TestRequest::post()
            .uri("/api/auth/signup")
            .set_json(json!({
                "email": email, "password": "pw", "name": "A",
                "role": "employee", "company_id": "c1"
            }))
            .to_request();
        let resp = test::call_service(&app, first).await;
        assert_eq!(resp.status(), 200);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["token_type"], "bearer");
        assert!(body["access_token"].as_str().is_some());

        let second = test::TestRequest::post()
            .uri("/api/auth/signup")
            .set_json(json!({
                "email": format!("{} ", email.to_uppercase()), "password": "pw", "name": "A"
            }))
            .to_request();
        let resp = test::call_service(&app, second).await;
        assert_eq!(resp.status(), 409);

        let wrong_password = test::TestRequest::post()
            .uri("/api/auth/login")
            .set_json(json!({"email": email, "password": "wrong"}))
            .to_request();
        let resp = test::call_service(&app, wrong_password).await;
        assert_eq!(resp.status(), 401);
    }

    #[actix_web::test]
    #[ignore = "requires DATABASE_URL"]
    async fn employees_span_companies_unless_filtered() {
        let url = std::env::var("DATABASE_URL").unwrap();
        let pool = sqlx::PgPool::connect(&url).await.unwrap();
        crate::schema::reconcile(&pool).await.unwrap();
        let run = uuid::Uuid::new_v4();
        let (home, other) = (format!("home-{run}"), format!("other-{run}"));

        let state = AppState::for_tests(Some(pool));
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state.clone()))
                .wrap(crate::middleware::auth::Authentication {
                    credentials: state.credentials.clone(),
                })
                .configure(routes::configure),
        )
        .await;

        let mut token = String::new();
        for (who, role, company) in [("admin", "admin", &home), ("emp", "employee", &other)] {
            let req = test::TestRequest::post()
                .uri("/api/auth/signup")
                .set_json(json!({
                    "email": format!("{who}-{run}@x.com"), "password": "pw", "name": who,
                    "role": role, "company_id": company
                }))
                .to_request();
            let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
            if role == "admin" {
                token = body["access_token"].as_str().unwrap().to_string();
            }
        }
        let listed = |body: &serde_json::Value| {
            body.as_array()
                .unwrap()
                .iter()
                .any(|u| u["email"] == format!("emp-{run}@x.com"))
        };

        let req = test::TestRequest::get()
            .uri("/api/auth/employees")
            .insert_header(("Authorization", format!("Bearer {token}")))
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert!(listed(&body));

        let req = test::TestRequest::get()
            .uri(&format!("/api/auth/employees?company_id={home}"))
            .insert_header(("Authorization", format!("Bearer {token}")))
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert!(!listed(&body));
    }
}
