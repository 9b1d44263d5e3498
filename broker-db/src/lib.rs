#![allow(non_local_definitions)]
pub mod error;
pub mod model;
pub mod params;
pub mod results;

use std::{
    fmt::Debug,
    future::Future,
    pin::Pin,
};

use async_trait::async_trait;

pub use error::{DbError, DbErrorIntrospect};
use model::{Certificate, Operation, ServiceInstance};

/// A mockable `r2d2::State`. Backend crates convert their own pool-status
/// type into this one so `broker-web`'s health checks stay backend-agnostic.
#[derive(Debug, Default, Clone, Copy)]
pub struct PoolState {
    pub connections: u32,
    pub idle_connections: u32,
}

pub trait GetPoolState {
    fn state(&self) -> PoolState;
}

pub type DbFuture<'a, T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'a>>;

#[async_trait]
pub trait DbPool: Sync + Send + Debug + GetPoolState {
    type Error;

    async fn get(&self) -> Result<Box<dyn Db<Error = Self::Error>>, Self::Error>;

    fn box_clone(&self) -> Box<dyn DbPool<Error = Self::Error>>;
}

impl<E> Clone for Box<dyn DbPool<Error = E>> {
    fn clone(&self) -> Box<dyn DbPool<Error = E>> {
        self.box_clone()
    }
}

/// The durable store behind one connection (or, for the in-memory backend,
/// one handle onto the shared map). Every mutating method commits its own
/// transaction; `begin`/`commit`/`rollback` exist so the handler can wrap
/// "check no active operation, then insert one" in a single transaction,
/// per the operation-creation concurrency guard.
#[async_trait]
pub trait Db: Sync + Send + Debug {
    type Error: DbErrorIntrospect + 'static;

    async fn begin(&mut self, for_write: bool) -> Result<(), Self::Error>;

    async fn commit(&mut self) -> Result<(), Self::Error>;

    async fn rollback(&mut self) -> Result<(), Self::Error>;

    // --- instance lifecycle ---

    async fn create_instance(&mut self, params: params::CreateInstance) -> Result<(), Self::Error>;

    async fn get_instance(
        &mut self,
        params: params::GetInstance,
    ) -> Result<Option<ServiceInstance>, Self::Error>;

    async fn update_instance(&mut self, params: params::UpdateInstance) -> Result<(), Self::Error>;

    async fn deactivate_instance(
        &mut self,
        params: params::DeactivateInstance,
    ) -> Result<(), Self::Error>;

    /// Returns the conflicting domain, if any, already held by some other
    /// non-deactivated instance.
    async fn domain_in_use(
        &mut self,
        params: params::DomainInUse,
    ) -> Result<Option<String>, Self::Error>;

    async fn list_instance_ids(&mut self) -> Result<Vec<String>, Self::Error>;

    // --- certificates ---

    async fn create_certificate(
        &mut self,
        params: params::CreateCertificate,
    ) -> Result<results::CreateCertificate, Self::Error>;

    async fn update_certificate(
        &mut self,
        params: params::UpdateCertificate,
    ) -> Result<(), Self::Error>;

    async fn get_certificate(&mut self, id: i64) -> Result<Option<Certificate>, Self::Error>;

    /// All certificates belonging to `service_instance_id` whose id is not
    /// the instance's `current_certificate_id`, in ascending id order.
    async fn get_duplicate_certs_for_service(
        &mut self,
        service_instance_id: &str,
    ) -> Result<Vec<Certificate>, Self::Error>;

    async fn delete_certificates(&mut self, ids: &[i64]) -> Result<(), Self::Error>;

    // --- operations ---

    async fn create_operation(
        &mut self,
        params: params::CreateOperation,
    ) -> Result<results::CreateOperation, Self::Error>;

    async fn get_operation(
        &mut self,
        params: params::GetOperation,
    ) -> Result<Option<Operation>, Self::Error>;

    /// Looks an operation up by id alone, for the task runtime, which only
    /// carries an operation id between steps and doesn't yet know which
    /// instance it belongs to.
    async fn get_operation_by_id(&mut self, operation_id: i64) -> Result<Option<Operation>, Self::Error>;

    async fn update_operation_state(
        &mut self,
        params: params::UpdateOperationState,
    ) -> Result<(), Self::Error>;

    async fn has_active_operation(
        &mut self,
        service_instance_id: &str,
    ) -> Result<bool, Self::Error>;

    async fn check(&mut self) -> Result<bool, Self::Error>;
}

/// Lets a boxed trait object stand in for a concrete `Db` at call sites
/// that are generic over `D: Db<Error = E>` (the HTTP layer only ever has
/// a `Box<dyn Db<Error = DbError>>` handed back by a `DbPool`).
#[async_trait]
impl<E: DbErrorIntrospect + 'static> Db for Box<dyn Db<Error = E>> {
    type Error = E;

    async fn begin(&mut self, for_write: bool) -> Result<(), Self::Error> {
        (**self).begin(for_write).await
    }

    async fn commit(&mut self) -> Result<(), Self::Error> {
        (**self).commit().await
    }

    async fn rollback(&mut self) -> Result<(), Self::Error> {
        (**self).rollback().await
    }

    async fn create_instance(&mut self, params: params::CreateInstance) -> Result<(), Self::Error> {
        (**self).create_instance(params).await
    }

    async fn get_instance(
        &mut self,
        params: params::GetInstance,
    ) -> Result<Option<ServiceInstance>, Self::Error> {
        (**self).get_instance(params).await
    }

    async fn update_instance(&mut self, params: params::UpdateInstance) -> Result<(), Self::Error> {
        (**self).update_instance(params).await
    }

    async fn deactivate_instance(
        &mut self,
        params: params::DeactivateInstance,
    ) -> Result<(), Self::Error> {
        (**self).deactivate_instance(params).await
    }

    async fn domain_in_use(
        &mut self,
        params: params::DomainInUse,
    ) -> Result<Option<String>, Self::Error> {
        (**self).domain_in_use(params).await
    }

    async fn list_instance_ids(&mut self) -> Result<Vec<String>, Self::Error> {
        (**self).list_instance_ids().await
    }

    async fn create_certificate(
        &mut self,
        params: params::CreateCertificate,
    ) -> Result<results::CreateCertificate, Self::Error> {
        (**self).create_certificate(params).await
    }

    async fn update_certificate(
        &mut self,
        params: params::UpdateCertificate,
    ) -> Result<(), Self::Error> {
        (**self).update_certificate(params).await
    }

    async fn get_certificate(&mut self, id: i64) -> Result<Option<Certificate>, Self::Error> {
        (**self).get_certificate(id).await
    }

    async fn get_duplicate_certs_for_service(
        &mut self,
        service_instance_id: &str,
    ) -> Result<Vec<Certificate>, Self::Error> {
        (**self).get_duplicate_certs_for_service(service_instance_id).await
    }

    async fn delete_certificates(&mut self, ids: &[i64]) -> Result<(), Self::Error> {
        (**self).delete_certificates(ids).await
    }

    async fn create_operation(
        &mut self,
        params: params::CreateOperation,
    ) -> Result<results::CreateOperation, Self::Error> {
        (**self).create_operation(params).await
    }

    async fn get_operation(
        &mut self,
        params: params::GetOperation,
    ) -> Result<Option<Operation>, Self::Error> {
        (**self).get_operation(params).await
    }

    async fn get_operation_by_id(&mut self, operation_id: i64) -> Result<Option<Operation>, Self::Error> {
        (**self).get_operation_by_id(operation_id).await
    }

    async fn update_operation_state(
        &mut self,
        params: params::UpdateOperationState,
    ) -> Result<(), Self::Error> {
        (**self).update_operation_state(params).await
    }

    async fn has_active_operation(&mut self, service_instance_id: &str) -> Result<bool, Self::Error> {
        (**self).has_active_operation(service_instance_id).await
    }

    async fn check(&mut self) -> Result<bool, Self::Error> {
        (**self).check().await
    }
}
