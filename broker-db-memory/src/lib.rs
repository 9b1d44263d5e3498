//! In-memory `Db`/`DbPool` implementation used by unit tests and as a
//! lightweight local dev backend, backed by real shared state rather
//! than stubbed returns.
#![allow(clippy::new_without_default)]

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use broker_db::{
    error::DbError,
    model::{Certificate, Operation, OperationState, ServiceInstance},
    params, results, Db, DbPool, GetPoolState, PoolState,
};
use chrono::Utc;

#[derive(Debug, Default)]
struct Shared {
    instances: HashMap<String, ServiceInstance>,
    certificates: HashMap<i64, Certificate>,
    next_certificate_id: i64,
    operations: HashMap<i64, Operation>,
    operations_by_instance: HashMap<String, Vec<i64>>,
    next_operation_id: i64,
}

#[derive(Clone, Debug, Default)]
pub struct MemoryDbPool {
    shared: Arc<Mutex<Shared>>,
}

impl MemoryDbPool {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DbPool for MemoryDbPool {
    type Error = DbError;

    async fn get(&self) -> Result<Box<dyn Db<Error = DbError>>, Self::Error> {
        Ok(Box::new(MemoryDb {
            shared: self.shared.clone(),
        }))
    }

    fn box_clone(&self) -> Box<dyn DbPool<Error = DbError>> {
        Box::new(self.clone())
    }
}

impl GetPoolState for MemoryDbPool {
    fn state(&self) -> PoolState {
        PoolState {
            connections: 1,
            idle_connections: 1,
        }
    }
}

#[derive(Clone, Debug)]
pub struct MemoryDb {
    shared: Arc<Mutex<Shared>>,
}

impl MemoryDb {
    pub fn new() -> Self {
        Self {
            shared: Arc::default(),
        }
    }
}

#[async_trait]
impl Db for MemoryDb {
    type Error = DbError;

    /// Transactions are a no-op here: every method locks the shared mutex
    /// for its own duration, so there is nothing to stage or roll back.
    async fn begin(&mut self, _for_write: bool) -> Result<(), Self::Error> {
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    async fn create_instance(&mut self, params: params::CreateInstance) -> Result<(), Self::Error> {
        let mut shared = self.shared.lock().unwrap();
        let id = params.instance.id().to_owned();
        if shared.instances.contains_key(&id) {
            return Err(DbError::conflict());
        }
        shared.instances.insert(id, params.instance);
        Ok(())
    }

    async fn get_instance(
        &mut self,
        params: params::GetInstance,
    ) -> Result<Option<ServiceInstance>, Self::Error> {
        let shared = self.shared.lock().unwrap();
        Ok(shared.instances.get(&params.service_instance_id).cloned())
    }

    async fn update_instance(&mut self, params: params::UpdateInstance) -> Result<(), Self::Error> {
        let mut shared = self.shared.lock().unwrap();
        let id = params.instance.id().to_owned();
        if !shared.instances.contains_key(&id) {
            return Err(DbError::instance_not_found());
        }
        shared.instances.insert(id, params.instance);
        Ok(())
    }

    async fn deactivate_instance(
        &mut self,
        params: params::DeactivateInstance,
    ) -> Result<(), Self::Error> {
        let mut shared = self.shared.lock().unwrap();
        let instance = shared
            .instances
            .get_mut(&params.service_instance_id)
            .ok_or_else(DbError::instance_not_found)?;
        instance.core_mut().deactivated_at = Some(Utc::now());
        Ok(())
    }

    async fn domain_in_use(
        &mut self,
        params: params::DomainInUse,
    ) -> Result<Option<String>, Self::Error> {
        let shared = self.shared.lock().unwrap();
        for instance in shared.instances.values() {
            if Some(instance.id()) == params.except_instance_id.as_deref() {
                continue;
            }
            if instance.core().is_deactivated() {
                continue;
            }
            if instance.domain_names().iter().any(|d| d == &params.domain) {
                return Ok(Some(params.domain));
            }
        }
        Ok(None)
    }

    async fn list_instance_ids(&mut self) -> Result<Vec<String>, Self::Error> {
        let shared = self.shared.lock().unwrap();
        Ok(shared.instances.keys().cloned().collect())
    }

    async fn create_certificate(
        &mut self,
        params: params::CreateCertificate,
    ) -> Result<results::CreateCertificate, Self::Error> {
        let mut shared = self.shared.lock().unwrap();
        shared.next_certificate_id += 1;
        let id = shared.next_certificate_id;
        shared.certificates.insert(
            id,
            Certificate {
                id,
                service_instance_id: params.service_instance_id,
                private_key_pem: params.private_key_pem,
                leaf_pem: None,
                fullchain_pem: None,
                iam_server_certificate_id: None,
                iam_server_certificate_arn: None,
                csr_pem: params.csr_pem,
                order_json: None,
                challenges: vec![],
            },
        );
        Ok(results::CreateCertificate { id })
    }

    async fn update_certificate(
        &mut self,
        params: params::UpdateCertificate,
    ) -> Result<(), Self::Error> {
        let mut shared = self.shared.lock().unwrap();
        let cert = shared
            .certificates
            .get_mut(&params.id)
            .ok_or_else(DbError::certificate_not_found)?;
        if params.leaf_pem.is_some() {
            cert.leaf_pem = params.leaf_pem;
        }
        if params.fullchain_pem.is_some() {
            cert.fullchain_pem = params.fullchain_pem;
        }
        if params.iam_server_certificate_id.is_some() {
            cert.iam_server_certificate_id = params.iam_server_certificate_id;
        }
        if params.iam_server_certificate_arn.is_some() {
            cert.iam_server_certificate_arn = params.iam_server_certificate_arn;
        }
        if params.order_json.is_some() {
            cert.order_json = params.order_json;
        }
        Ok(())
    }

    async fn get_certificate(&mut self, id: i64) -> Result<Option<Certificate>, Self::Error> {
        let shared = self.shared.lock().unwrap();
        Ok(shared.certificates.get(&id).cloned())
    }

    async fn get_duplicate_certs_for_service(
        &mut self,
        service_instance_id: &str,
    ) -> Result<Vec<Certificate>, Self::Error> {
        let shared = self.shared.lock().unwrap();
        let current_id = shared
            .instances
            .get(service_instance_id)
            .and_then(|i| i.core().current_certificate_id);
        let mut dupes: Vec<Certificate> = shared
            .certificates
            .values()
            .filter(|c| {
                c.service_instance_id == service_instance_id && Some(c.id) != current_id
            })
            .cloned()
            .collect();
        dupes.sort_by_key(|c| c.id);
        Ok(dupes)
    }

    async fn delete_certificates(&mut self, ids: &[i64]) -> Result<(), Self::Error> {
        let mut shared = self.shared.lock().unwrap();
        for id in ids {
            shared.certificates.remove(id);
        }
        Ok(())
    }

    async fn create_operation(
        &mut self,
        params: params::CreateOperation,
    ) -> Result<results::CreateOperation, Self::Error> {
        let mut shared = self.shared.lock().unwrap();
        shared.next_operation_id += 1;
        let id = shared.next_operation_id;
        shared.operations.insert(
            id,
            Operation {
                id,
                service_instance_id: params.service_instance_id.clone(),
                action: params.action,
                state: OperationState::InProgress,
                step_description: params.step_description,
                created_at: Utc::now(),
            },
        );
        shared
            .operations_by_instance
            .entry(params.service_instance_id)
            .or_default()
            .push(id);
        Ok(results::CreateOperation { id })
    }

    async fn get_operation(
        &mut self,
        params: params::GetOperation,
    ) -> Result<Option<Operation>, Self::Error> {
        let shared = self.shared.lock().unwrap();
        let Some(operation_id) = params.operation_id else {
            return Ok(None);
        };
        match shared.operations.get(&operation_id) {
            Some(op) if op.service_instance_id == params.service_instance_id => Ok(Some(op.clone())),
            _ => Ok(None),
        }
    }

    async fn get_operation_by_id(&mut self, operation_id: i64) -> Result<Option<Operation>, Self::Error> {
        let shared = self.shared.lock().unwrap();
        Ok(shared.operations.get(&operation_id).cloned())
    }

    async fn update_operation_state(
        &mut self,
        params: params::UpdateOperationState,
    ) -> Result<(), Self::Error> {
        let mut shared = self.shared.lock().unwrap();
        let op = shared
            .operations
            .get_mut(&params.operation_id)
            .ok_or_else(DbError::operation_not_found)?;
        op.state = params.state;
        op.step_description = params.step_description;
        Ok(())
    }

    async fn has_active_operation(
        &mut self,
        service_instance_id: &str,
    ) -> Result<bool, Self::Error> {
        let shared = self.shared.lock().unwrap();
        let Some(ids) = shared.operations_by_instance.get(service_instance_id) else {
            return Ok(false);
        };
        Ok(ids.iter().any(|id| {
            shared
                .operations
                .get(id)
                .map(|op| op.state == OperationState::InProgress)
                .unwrap_or(false)
        }))
    }

    async fn check(&mut self) -> Result<bool, Self::Error> {
        Ok(true)
    }
}

#[cfg(test)]
mod test {
    use broker_db::model::{InstanceCore, OperationAction};

    use super::*;

    fn alb(id: &str, domains: &[&str]) -> ServiceInstance {
        ServiceInstance::Alb(broker_db::model::AlbInstance {
            core: InstanceCore::new(id.to_owned(), domains.iter().map(|d| d.to_string()).collect()),
            alb_listener_arn: None,
            alb_arn: None,
            domain_internal: None,
            route53_alias_hosted_zone: None,
        })
    }

    #[tokio::test]
    async fn create_and_get_instance_round_trips() {
        let pool = MemoryDbPool::new();
        let mut db = pool.get().await.unwrap();

        db.create_instance(params::CreateInstance {
            instance: alb("inst-1", &["foo.example"]),
        })
        .await
        .unwrap();

        let fetched = db
            .get_instance(params::GetInstance {
                service_instance_id: "inst-1".to_owned(),
            })
            .await
            .unwrap()
            .expect("instance should exist");
        assert_eq!(fetched.domain_names(), &["foo.example".to_owned()]);
    }

    #[tokio::test]
    async fn duplicate_certs_excludes_current_and_sorts_ascending() {
        let pool = MemoryDbPool::new();
        let mut db = pool.get().await.unwrap();

        db.create_instance(params::CreateInstance {
            instance: alb("inst-1", &["foo.example"]),
        })
        .await
        .unwrap();

        let mut ids = vec![];
        for _ in 0..3 {
            let result = db
                .create_certificate(params::CreateCertificate {
                    service_instance_id: "inst-1".to_owned(),
                    private_key_pem: None,
                    csr_pem: None,
                })
                .await
                .unwrap();
            ids.push(result.id);
        }

        let mut instance = db
            .get_instance(params::GetInstance {
                service_instance_id: "inst-1".to_owned(),
            })
            .await
            .unwrap()
            .unwrap();
        instance.core_mut().current_certificate_id = Some(ids[0]);
        db.update_instance(params::UpdateInstance { instance })
            .await
            .unwrap();

        let dupes = db.get_duplicate_certs_for_service("inst-1").await.unwrap();
        assert_eq!(
            dupes.iter().map(|c| c.id).collect::<Vec<_>>(),
            vec![ids[1], ids[2]]
        );
    }

    #[tokio::test]
    async fn has_active_operation_reflects_in_progress_state() {
        let pool = MemoryDbPool::new();
        let mut db = pool.get().await.unwrap();

        db.create_instance(params::CreateInstance {
            instance: alb("inst-1", &["foo.example"]),
        })
        .await
        .unwrap();

        assert!(!db.has_active_operation("inst-1").await.unwrap());

        let op = db
            .create_operation(params::CreateOperation {
                service_instance_id: "inst-1".to_owned(),
                action: OperationAction::Provision,
                step_description: "Queuing tasks".to_owned(),
            })
            .await
            .unwrap();

        assert!(db.has_active_operation("inst-1").await.unwrap());

        db.update_operation_state(params::UpdateOperationState {
            operation_id: op.id,
            state: OperationState::Succeeded,
            step_description: "Done".to_owned(),
        })
        .await
        .unwrap();

        assert!(!db.has_active_operation("inst-1").await.unwrap());
    }
}
