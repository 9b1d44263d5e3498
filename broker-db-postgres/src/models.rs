use broker_db::model::{Certificate, Challenge, Operation, OperationAction, OperationState, ServiceInstance};
use chrono::{DateTime, Utc};
use diesel::{Insertable, Queryable};

use crate::schema::{certificates, operations, service_instances};
use crate::DbError;

/// One row per `ServiceInstance`. The variant-specific fields live in
/// `payload` as the serialized enum; `instance_type`/`domain_names`/the
/// certificate id columns are pulled out for indexing and the
/// duplicate-cert/domain-collision queries.
#[derive(Debug, Queryable)]
pub struct ServiceInstanceRow {
    pub id: String,
    pub instance_type: String,
    pub domain_names: String,
    pub deactivated_at: Option<DateTime<Utc>>,
    pub current_certificate_id: Option<i64>,
    pub new_certificate_id: Option<i64>,
    pub payload: serde_json::Value,
}

#[derive(Debug, Insertable)]
#[table_name = "service_instances"]
pub struct NewServiceInstanceRow {
    pub id: String,
    pub instance_type: String,
    pub domain_names: String,
    pub deactivated_at: Option<DateTime<Utc>>,
    pub current_certificate_id: Option<i64>,
    pub new_certificate_id: Option<i64>,
    pub payload: serde_json::Value,
}

impl NewServiceInstanceRow {
    pub fn from_instance(instance: &ServiceInstance) -> Result<Self, DbError> {
        let core = instance.core();
        let payload = serde_json::to_value(instance)
            .map_err(|e| DbError::internal(format!("serializing instance: {e}")))?;
        Ok(Self {
            id: core.id.clone(),
            instance_type: instance.instance_type().plan_id().to_owned(),
            domain_names: core.domain_names.join(","),
            deactivated_at: core.deactivated_at,
            current_certificate_id: core.current_certificate_id,
            new_certificate_id: core.new_certificate_id,
            payload,
        })
    }
}

impl ServiceInstanceRow {
    pub fn into_instance(self) -> Result<ServiceInstance, DbError> {
        serde_json::from_value(self.payload)
            .map_err(|e| DbError::internal(format!("deserializing instance: {e}")))
    }
}

#[derive(Debug, Queryable)]
pub struct CertificateRow {
    pub id: i64,
    pub service_instance_id: String,
    pub private_key_pem: Option<String>,
    pub leaf_pem: Option<String>,
    pub fullchain_pem: Option<String>,
    pub iam_server_certificate_id: Option<String>,
    pub iam_server_certificate_arn: Option<String>,
    pub csr_pem: Option<String>,
    pub order_json: Option<String>,
    pub challenges: serde_json::Value,
}

impl CertificateRow {
    pub fn into_certificate(self) -> Result<Certificate, DbError> {
        let challenges: Vec<Challenge> = serde_json::from_value(self.challenges)
            .map_err(|e| DbError::internal(format!("deserializing challenges: {e}")))?;
        Ok(Certificate {
            id: self.id,
            service_instance_id: self.service_instance_id,
            private_key_pem: self.private_key_pem,
            leaf_pem: self.leaf_pem,
            fullchain_pem: self.fullchain_pem,
            iam_server_certificate_id: self.iam_server_certificate_id,
            iam_server_certificate_arn: self.iam_server_certificate_arn,
            csr_pem: self.csr_pem,
            order_json: self.order_json,
            challenges,
        })
    }
}

#[derive(Debug, Insertable)]
#[table_name = "certificates"]
pub struct NewCertificateRow {
    pub service_instance_id: String,
    pub private_key_pem: Option<String>,
    pub csr_pem: Option<String>,
    pub challenges: serde_json::Value,
}

#[derive(Debug, Queryable)]
pub struct OperationRow {
    pub id: i64,
    pub service_instance_id: String,
    pub action: String,
    pub state: String,
    pub step_description: String,
    pub created_at: DateTime<Utc>,
}

impl OperationRow {
    pub fn into_operation(self) -> Result<Operation, DbError> {
        Ok(Operation {
            id: self.id,
            service_instance_id: self.service_instance_id,
            action: parse_action(&self.action)?,
            state: parse_state(&self.state)?,
            step_description: self.step_description,
            created_at: self.created_at,
        })
    }
}

#[derive(Debug, Insertable)]
#[table_name = "operations"]
pub struct NewOperationRow {
    pub service_instance_id: String,
    pub action: String,
    pub state: String,
    pub step_description: String,
    pub created_at: DateTime<Utc>,
}

pub fn action_str(action: OperationAction) -> &'static str {
    match action {
        OperationAction::Provision => "provision",
        OperationAction::Deprovision => "deprovision",
        OperationAction::Update => "update",
        OperationAction::Renew => "renew",
    }
}

pub fn state_str(state: OperationState) -> &'static str {
    match state {
        OperationState::InProgress => "in-progress",
        OperationState::Succeeded => "succeeded",
        OperationState::Failed => "failed",
    }
}

fn parse_action(s: &str) -> Result<OperationAction, DbError> {
    match s {
        "provision" => Ok(OperationAction::Provision),
        "deprovision" => Ok(OperationAction::Deprovision),
        "update" => Ok(OperationAction::Update),
        "renew" => Ok(OperationAction::Renew),
        other => Err(DbError::internal(format!("unknown operation action: {other}"))),
    }
}

fn parse_state(s: &str) -> Result<OperationState, DbError> {
    match s {
        "in-progress" => Ok(OperationState::InProgress),
        "succeeded" => Ok(OperationState::Succeeded),
        "failed" => Ok(OperationState::Failed),
        other => Err(DbError::internal(format!("unknown operation state: {other}"))),
    }
}
