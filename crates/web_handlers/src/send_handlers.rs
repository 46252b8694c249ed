use actix_web::{HttpResponse, Result, web};
use job_store::JobStore;
use sms_dispatch::AdmissionController;
use uuid::Uuid;
use validator::Validate;

use crate::send_types::*;
use auth_services::middleware::AuthenticatedUser;

/// Admits a bulk send for the authenticated user
pub async fn create_send(
    admission: web::Data<AdmissionController>,
    user: Option<AuthenticatedUser>,
    request: web::Json<CreateSendRequest>,
) -> Result<HttpResponse, SendApiError> {
    request
        .validate()
        .map_err(|e| SendApiError::Validation(format!("Validation error: {}", e)))?;

    let actor = user.as_ref().map(|u| &u.0);
    let send_id = admission
        .create_send(actor, &request.phone_numbers, &request.message)
        .await?;

    Ok(HttpResponse::Ok().json(CreateSendResponse {
        success: true,
        send_id,
    }))
}

/// Gets a send and its recipients; only the creator may read it
pub async fn get_send(
    store: web::Data<dyn JobStore>,
    user: AuthenticatedUser,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, SendApiError> {
    let send_id = path.into_inner();

    let job = match store.get_job(&send_id).await? {
        Some(job) if job.created_by == user.0.id => job,
        _ => return Err(SendApiError::NotFound),
    };
    let recipients = store.list_recipients(&send_id).await?;

    Ok(HttpResponse::Ok().json(SendStatusResponse::new(job, recipients)))
}
