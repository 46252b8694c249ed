use actix_web::{HttpRequest, HttpResponse, web};
use sms_dispatch::{CallbackOutcome, DeliveryCorrelator};
use sms_gateway::signature::SIGNATURE_HEADER;

/// Receives provider delivery status callbacks.
///
/// Always answers 200 with an empty TwiML document; the provider retries
/// anything else, so problems are only logged.
pub async fn sms_status_callback(
    correlator: web::Data<DeliveryCorrelator>,
    req: HttpRequest,
    body: web::Bytes,
) -> HttpResponse {
    let signature = req
        .headers()
        .get(SIGNATURE_HEADER)
        .and_then(|h| h.to_str().ok());

    match correlator.handle_callback(signature, &body).await {
        CallbackOutcome::Updated { job_id, status, .. } => {
            log::debug!("Status callback applied to send {}: {}", job_id, status);
        }
        CallbackOutcome::Ignored(reason) => {
            log::debug!("Status callback ignored: {:?}", reason);
        }
    }

    HttpResponse::Ok()
        .content_type("text/xml")
        .body("<Response/>")
}
