use std::sync::Arc;

use actix_web::{delete, get, post, put, web};
use tracing::info;
use uuid::Uuid;

use crate::error::AppError;
use crate::middleware::auth::CurrentUser;
use crate::models::call::CallFilter;
use crate::models::customer::CustomerDetails;
use crate::models::{Call, Customer, User};
use crate::types::{CustomerRequest, MessageResponse};
use crate::AppState;

const CUSTOMER_CALLS_LIMIT: i64 = 500;

pub(crate) async fn authorized_customer(
    app_state: &AppState,
    user: &User,
    customer_id: Uuid,
) -> Result<Customer, AppError> {
    let customer = Customer::get_by_id(app_state.db()?, customer_id)
        .await?
        .ok_or_else(|| AppError::not_found("Customer"))?;
    if !customer.accessible_by(&user.id, user.is_admin()) {
        return Err(AppError::forbidden());
    }
    Ok(customer)
}

#[post("")]
pub async fn create_customer(
    app_state: web::Data<Arc<AppState>>,
    current_user: CurrentUser,
    body: web::Json<CustomerRequest>,
) -> Result<web::Json<Customer>, AppError> {
    let mut details = CustomerDetails::from(body.into_inner());
    let phone_number = details
        .phone_number
        .take()
        .ok_or_else(|| AppError::Validation("phoneNumber is required".to_string()))?;

    let customer =
        Customer::create(app_state.db()?, &current_user.0.id, &phone_number, details).await?;
    info!("Customer {} created by {}", customer.id, customer.employee_id);
    Ok(web::Json(customer))
}

#[get("")]
pub async fn list_customers(
    app_state: web::Data<Arc<AppState>>,
    current_user: CurrentUser,
) -> Result<web::Json<Vec<Customer>>, AppError> {
    let user = &current_user.0;
    let employee_id = (!user.is_admin()).then_some(user.id.as_str());
    let customers = Customer::list(app_state.db()?, employee_id).await?;
    Ok(web::Json(customers))
}

#[get("/{customer_id}")]
pub async fn get_customer(
    app_state: web::Data<Arc<AppState>>,
    current_user: CurrentUser,
    customer_id: web::Path<Uuid>,
) -> Result<web::Json<Customer>, AppError> {
    let customer =
        authorized_customer(&app_state, &current_user.0, customer_id.into_inner()).await?;
    Ok(web::Json(customer))
}

#[put("/{customer_id}")]
pub async fn update_customer(
    app_state: web::Data<Arc<AppState>>,
    current_user: CurrentUser,
    customer_id: web::Path<Uuid>,
    body: web::Json<CustomerRequest>,
) -> Result<web::Json<Customer>, AppError> {
    let customer =
        authorized_customer(&app_state, &current_user.0, customer_id.into_inner()).await?;
    let customer =
        Customer::update(app_state.db()?, customer.id, CustomerDetails::from(body.into_inner()))
            .await?;
    Ok(web::Json(customer))
}

#[delete("/{customer_id}")]
pub async fn delete_customer(
    app_state: web::Data<Arc<AppState>>,
    current_user: CurrentUser,
    customer_id: web::Path<Uuid>,
) -> Result<web::Json<MessageResponse>, AppError> {
    let customer =
        authorized_customer(&app_state, &current_user.0, customer_id.into_inner()).await?;
    Customer::delete(app_state.db()?, customer.id).await?;

    info!("Deleted customer {}", customer.id);
    Ok(web::Json(MessageResponse::new("Customer deleted successfully")))
}

/// Calls the customer's owner logged with the customer's number.
#[get("/{customer_id}/calls")]
pub async fn customer_calls(
    app_state: web::Data<Arc<AppState>>,
    current_user: CurrentUser,
    customer_id: web::Path<Uuid>,
) -> Result<web::Json<Vec<Call>>, AppError> {
    let customer =
        authorized_customer(&app_state, &current_user.0, customer_id.into_inner()).await?;
    let calls = Call::list(
        app_state.db()?,
        CallFilter {
            customer_number: Some(customer.phone_number.as_str()),
            user_id: Some(customer.employee_id.as_str()),
            limit: CUSTOMER_CALLS_LIMIT,
        },
    )
    .await?;
    Ok(web::Json(calls))
}
