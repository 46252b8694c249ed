use actix_web::{
    Error, HttpMessage, HttpResponse, Result,
    body::EitherBody,
    dev::{Service, ServiceRequest, ServiceResponse, Transform, forward_ready},
};
use futures_util::future::LocalBoxFuture;
use std::{
    future::{Ready, ready},
    rc::Rc,
};

use crate::jwt::JwtService;
use crate::types::Actor;

/// Middleware that verifies the bearer token and attaches the [`Actor`]
/// to the request extensions.
pub struct AuthMiddleware {
    jwt_service: JwtService,
}

impl AuthMiddleware {
    /// Creates the middleware around a configured token verifier
    pub fn new(jwt_service: JwtService) -> Self {
        Self { jwt_service }
    }
}

impl<S, B> Transform<S, ServiceRequest> for AuthMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type InitError = ();
    type Transform = AuthMiddlewareService<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(AuthMiddlewareService {
            service: Rc::new(service),
            jwt_service: self.jwt_service.clone(),
        }))
    }
}

/// Service that implements the authentication middleware logic
pub struct AuthMiddlewareService<S> {
    service: Rc<S>,
    jwt_service: JwtService,
}

impl<S, B> Service<ServiceRequest> for AuthMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = self.service.clone();
        let jwt_service = self.jwt_service.clone();

        Box::pin(async move {
            let token = req
                .headers()
                .get("Authorization")
                .and_then(|h| h.to_str().ok())
                .and_then(|h| h.strip_prefix("Bearer "));

            let actor = match token.map(|t| jwt_service.extract_actor_from_token(t)) {
                Some(Ok(actor)) => actor,
                Some(Err(e)) => {
                    log::debug!("Rejected bearer token: {}", e);
                    return Ok(unauthenticated(req));
                }
                None => return Ok(unauthenticated(req)),
            };

            req.extensions_mut().insert(actor);

            let res = service.call(req).await?;
            Ok(res.map_into_left_body())
        })
    }
}

fn unauthenticated<B>(req: ServiceRequest) -> ServiceResponse<EitherBody<B>> {
    let response = HttpResponse::Unauthorized().json(serde_json::json!({
        "error": "unauthenticated",
        "message": "Invalid or missing authorization token"
    }));
    req.into_response(response).map_into_right_body()
}

/// Extractor for the actor attached by [`AuthMiddleware`]
///
/// Use `Option<AuthenticatedUser>` to let the handler decide how to treat
/// anonymous requests.
pub struct AuthenticatedUser(pub Actor);

impl actix_web::FromRequest for AuthenticatedUser {
    type Error = Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &actix_web::HttpRequest, _: &mut actix_web::dev::Payload) -> Self::Future {
        let actor = req.extensions().get::<Actor>().cloned();

        ready(match actor {
            Some(actor) => Ok(AuthenticatedUser(actor)),
            None => Err(actix_web::error::ErrorUnauthorized(
                "User not authenticated",
            )),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{App, HttpResponse, test, web};
    use secrecy::SecretString;
    use uuid::Uuid;

    fn jwt() -> JwtService {
        JwtService::new(&SecretString::from("test-secret".to_string()))
    }

    async fn whoami(user: AuthenticatedUser) -> HttpResponse {
        HttpResponse::Ok().body(user.0.email)
    }

    #[actix_web::test]
    async fn test_valid_token_reaches_handler() {
        let app = test::init_service(
            App::new()
                .wrap(AuthMiddleware::new(jwt()))
                .route("/me", web::get().to(whoami)),
        )
        .await;

        let actor = Actor {
            id: Uuid::new_v4(),
            email: "ops@example.com".to_string(),
        };
        let token = jwt().generate_access_token(&actor).unwrap();

        let req = test::TestRequest::get()
            .uri("/me")
            .insert_header(("Authorization", format!("Bearer {}", token)))
            .to_request();
        let body = test::call_and_read_body(&app, req).await;
        assert_eq!(body, "ops@example.com");
    }

    #[actix_web::test]
    async fn test_missing_token_is_unauthorized() {
        let app = test::init_service(
            App::new()
                .wrap(AuthMiddleware::new(jwt()))
                .route("/me", web::get().to(whoami)),
        )
        .await;

        let req = test::TestRequest::get().uri("/me").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 401);

        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["error"], "unauthenticated");
    }

    #[actix_web::test]
    async fn test_invalid_token_is_unauthorized() {
        let app = test::init_service(
            App::new()
                .wrap(AuthMiddleware::new(jwt()))
                .route("/me", web::get().to(whoami)),
        )
        .await;

        let req = test::TestRequest::get()
            .uri("/me")
            .insert_header(("Authorization", "Bearer garbage"))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 401);
    }
}
