//! The five Open Service Broker operations, plus Dockerflow.
use std::collections::HashMap;

use actix_web::{http::StatusCode, web, HttpResponse};
use broker_core::handler::{
    CdnParameters, DeprovisionRequest, LastOperationRequest, ProvisionRequest, UpdateRequest, UpdateResult,
};
use broker_db::model::OperationState;
use serde::{Deserialize, Serialize};

use crate::{error::ApiError, server::ServerState, web::middleware::BrokerAuth};

#[derive(Debug, Deserialize)]
pub struct AsyncQuery {
    #[serde(default)]
    pub accepts_incomplete: bool,
}

#[derive(Debug, Deserialize)]
pub struct LastOperationQuery {
    #[serde(default)]
    pub operation: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CdnParametersBody {
    #[serde(default)]
    pub origin: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub forward_cookies: Option<String>,
    #[serde(default)]
    pub forward_headers: Option<String>,
    #[serde(default)]
    pub insecure_origin: Option<bool>,
    #[serde(default)]
    pub error_responses: Option<HashMap<String, String>>,
}

impl From<CdnParametersBody> for CdnParameters {
    fn from(body: CdnParametersBody) -> Self {
        CdnParameters {
            origin: body.origin,
            path: body.path,
            forward_cookies: body.forward_cookies,
            forward_headers: body.forward_headers,
            insecure_origin: body.insecure_origin,
            error_responses: body.error_responses,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct RequestParameters {
    #[serde(default)]
    pub domains: Option<String>,
    #[serde(flatten)]
    pub cdn: CdnParametersBody,
}

#[derive(Debug, Deserialize)]
pub struct ProvisionBody {
    pub service_id: String,
    pub plan_id: String,
    #[serde(default)]
    pub parameters: RequestParameters,
}

#[derive(Debug, Deserialize)]
pub struct UpdateBody {
    #[serde(default)]
    pub parameters: RequestParameters,
}

#[derive(Debug, Serialize)]
struct OperationResponse {
    operation: String,
}

#[derive(Debug, Serialize)]
struct LastOperationResponse {
    state: &'static str,
    description: String,
}

#[derive(Debug, Serialize)]
struct CatalogPlan {
    id: &'static str,
    name: &'static str,
    description: &'static str,
}

#[derive(Debug, Serialize)]
struct CatalogService {
    id: &'static str,
    name: &'static str,
    description: &'static str,
    bindable: bool,
    plan_updateable: bool,
    plans: Vec<CatalogPlan>,
}

#[derive(Debug, Serialize)]
struct CatalogResponse {
    services: Vec<CatalogService>,
}

pub async fn catalog(_auth: BrokerAuth, state: web::Data<ServerState>) -> HttpResponse {
    let catalog = state.handler.catalog();
    HttpResponse::Ok().json(CatalogResponse {
        services: vec![CatalogService {
            id: "custom-domain-broker",
            name: "custom-domain",
            description: "Attach a custom DNS name to an application",
            bindable: false,
            plan_updateable: true,
            plans: catalog
                .plans
                .into_iter()
                .map(|p| CatalogPlan {
                    id: p.id,
                    name: p.name,
                    description: p.description,
                })
                .collect(),
        }],
    })
}

pub async fn provision(
    _auth: BrokerAuth,
    state: web::Data<ServerState>,
    path: web::Path<String>,
    query: web::Query<AsyncQuery>,
    body: web::Json<ProvisionBody>,
) -> Result<HttpResponse, ApiError> {
    let mut db = state.db_pool.get().await?;
    let body = body.into_inner();

    let result = state
        .handler
        .provision(
            &mut db,
            ProvisionRequest {
                instance_id: path.into_inner(),
                plan_id: body.plan_id,
                async_allowed: query.accepts_incomplete,
                domains: body.parameters.domains,
                cdn: body.parameters.cdn.into(),
            },
        )
        .await?;

    Ok(HttpResponse::build(StatusCode::ACCEPTED).json(OperationResponse {
        operation: result.operation_id.to_string(),
    }))
}

pub async fn update(
    _auth: BrokerAuth,
    state: web::Data<ServerState>,
    path: web::Path<String>,
    query: web::Query<AsyncQuery>,
    body: web::Json<UpdateBody>,
) -> Result<HttpResponse, ApiError> {
    let mut db = state.db_pool.get().await?;
    let body = body.into_inner();

    let result = state
        .handler
        .update(
            &mut db,
            UpdateRequest {
                instance_id: path.into_inner(),
                async_allowed: query.accepts_incomplete,
                domains: body.parameters.domains,
                cdn: body.parameters.cdn.into(),
            },
        )
        .await?;

    match result {
        UpdateResult::Enqueued { operation_id } => Ok(HttpResponse::build(StatusCode::ACCEPTED).json(OperationResponse {
            operation: operation_id.to_string(),
        })),
        UpdateResult::NoOp => Ok(HttpResponse::Ok().json(serde_json::json!({}))),
    }
}

pub async fn deprovision(
    _auth: BrokerAuth,
    state: web::Data<ServerState>,
    path: web::Path<String>,
    query: web::Query<AsyncQuery>,
) -> Result<HttpResponse, ApiError> {
    let mut db = state.db_pool.get().await?;

    let result = state
        .handler
        .deprovision(
            &mut db,
            DeprovisionRequest {
                instance_id: path.into_inner(),
                async_allowed: query.accepts_incomplete,
            },
        )
        .await?;

    Ok(HttpResponse::build(StatusCode::ACCEPTED).json(OperationResponse {
        operation: result.operation_id.to_string(),
    }))
}

pub async fn last_operation(
    _auth: BrokerAuth,
    state: web::Data<ServerState>,
    path: web::Path<String>,
    query: web::Query<LastOperationQuery>,
) -> Result<HttpResponse, ApiError> {
    let mut db = state.db_pool.get().await?;

    let result = state
        .handler
        .last_operation(
            &mut db,
            LastOperationRequest {
                instance_id: path.into_inner(),
                operation_id: query.operation,
            },
        )
        .await?;

    let state_str = match result.state {
        OperationState::InProgress => "in progress",
        OperationState::Succeeded => "succeeded",
        OperationState::Failed => "failed",
    };

    Ok(HttpResponse::Ok().json(LastOperationResponse {
        state: state_str,
        description: result.description,
    }))
}

pub async fn heartbeat(state: web::Data<ServerState>) -> HttpResponse {
    match state.db_pool.get().await {
        Ok(mut db) => match broker_db::Db::check(&mut db).await {
            Ok(true) => HttpResponse::Ok().json(serde_json::json!({"status": "ok"})),
            _ => HttpResponse::ServiceUnavailable().json(serde_json::json!({"status": "error"})),
        },
        Err(_) => HttpResponse::ServiceUnavailable().json(serde_json::json!({"status": "error"})),
    }
}

pub async fn test_error() -> HttpResponse {
    error!("Test Error");
    HttpResponse::ServiceUnavailable().body("Test error for Sentry")
}
