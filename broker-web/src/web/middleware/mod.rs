//! HTTP Basic Auth for the broker credential. Platform authentication is
//! explicitly out of scope for the core broker logic; this is transport
//! housekeeping only.

use std::future::{ready, Ready};

use actix_web::{dev::Payload, http::header::AUTHORIZATION, web::Data, FromRequest, HttpRequest};

use crate::{error::ApiError, server::ServerState};

/// Extractor that rejects the request unless it carries the configured
/// broker credential as HTTP Basic Auth.
pub struct BrokerAuth;

impl FromRequest for BrokerAuth {
    type Error = ApiError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        ready(check(req).map(|_| BrokerAuth))
    }
}

fn check(req: &HttpRequest) -> Result<(), ApiError> {
    let state = req
        .app_data::<Data<ServerState>>()
        .ok_or_else(|| ApiError::internal("server state missing"))?;

    let header = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(ApiError::unauthorized)?;

    let encoded = header.strip_prefix("Basic ").ok_or_else(ApiError::unauthorized)?;
    let decoded = base64::decode(encoded).map_err(|_| ApiError::unauthorized())?;
    let decoded = String::from_utf8(decoded).map_err(|_| ApiError::unauthorized())?;
    let (user, pass) = decoded.split_once(':').ok_or_else(ApiError::unauthorized)?;

    if user == state.broker_username && pass == state.broker_password {
        Ok(())
    } else {
        Err(ApiError::unauthorized())
    }
}
