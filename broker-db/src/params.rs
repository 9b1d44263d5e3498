use crate::model::ServiceInstance;

#[derive(Debug, Clone)]
pub struct CreateInstance {
    pub instance: ServiceInstance,
}

#[derive(Debug, Clone)]
pub struct GetInstance {
    pub service_instance_id: String,
}

/// A full replacement of the stored instance. Callers read-modify-write:
/// fetch via `GetInstance`, mutate the in-memory value, then persist the
/// whole aggregate back. Mirrors the single-row, no-partial-update shape
/// the instance aggregate is stored as.
#[derive(Debug, Clone)]
pub struct UpdateInstance {
    pub instance: ServiceInstance,
}

#[derive(Debug, Clone)]
pub struct DeactivateInstance {
    pub service_instance_id: String,
}

/// Looks up whether `domain` is already claimed by some other
/// non-deactivated instance. `except_instance_id` excludes the instance
/// being updated from the collision check.
#[derive(Debug, Clone)]
pub struct DomainInUse {
    pub domain: String,
    pub except_instance_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CreateCertificate {
    pub service_instance_id: String,
    pub private_key_pem: Option<String>,
    pub csr_pem: Option<String>,
}

#[derive(Debug, Clone)]
pub struct UpdateCertificate {
    pub id: i64,
    pub leaf_pem: Option<String>,
    pub fullchain_pem: Option<String>,
    pub iam_server_certificate_id: Option<String>,
    pub iam_server_certificate_arn: Option<String>,
    pub order_json: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CreateOperation {
    pub service_instance_id: String,
    pub action: crate::model::OperationAction,
    pub step_description: String,
}

#[derive(Debug, Clone)]
pub struct GetOperation {
    pub service_instance_id: String,
    pub operation_id: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct UpdateOperationState {
    pub operation_id: i64,
    pub state: crate::model::OperationState,
    pub step_description: String,
}
