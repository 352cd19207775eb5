// Scheduler authentication for the cron endpoints

use actix_web::{
    body::{BoxBody, EitherBody},
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    Error, HttpResponse,
};
use futures::future::LocalBoxFuture;
use std::future::{ready, Ready};
use tracing::warn;

use crate::api::models::ApiResponse;
use crate::error::JobError;

/// Paths under this prefix require the scheduler secret.
pub const PROTECTED_PREFIX: &str = "/api/cron/";

/// Bearer check. Outside dev mode a missing secret rejects everything.
pub fn authorize(header: Option<&str>, secret: Option<&str>, dev_mode: bool) -> bool {
    if dev_mode {
        return true;
    }
    let (Some(secret), Some(token)) = (secret, header.and_then(|h| h.strip_prefix("Bearer "))) else {
        return false;
    };
    !secret.is_empty() && token.trim() == secret
}

/// Authentication middleware that validates the scheduler's Bearer token
pub struct Auth {
    secret: Option<String>,
    dev_mode: bool,
}

impl Auth {
    pub fn new(secret: Option<String>, dev_mode: bool) -> Self {
        Self { secret, dev_mode }
    }
}

impl<S, B> Transform<S, ServiceRequest> for Auth
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B, BoxBody>>;
    type Error = Error;
    type InitError = ();
    type Transform = AuthMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(AuthMiddleware {
            service,
            secret: self.secret.clone(),
            dev_mode: self.dev_mode,
        }))
    }
}

pub struct AuthMiddleware<S> {
    service: S,
    secret: Option<String>,
    dev_mode: bool,
}

impl<S, B> Service<ServiceRequest> for AuthMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B, BoxBody>>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let allowed = !req.path().starts_with(PROTECTED_PREFIX) || {
            let header = req
                .headers()
                .get("Authorization")
                .and_then(|h| h.to_str().ok());
            authorize(header, self.secret.as_deref(), self.dev_mode)
        };

        if allowed {
            let fut = self.service.call(req);
            return Box::pin(async move {
                let res = fut.await?;
                Ok(res.map_into_left_body())
            });
        }

        warn!(path = %req.path(), "rejected cron request without a valid token");
        Box::pin(async move {
            let response = HttpResponse::Unauthorized()
                .json(ApiResponse::<()>::error(JobError::Unauthorized.to_string()))
                .map_into_right_body();
            Ok(req.into_response(response))
        })
    }
}
