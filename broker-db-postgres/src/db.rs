use std::sync::Arc;

use async_trait::async_trait;
use broker_common::BlockingThreadpool;
use broker_db::{
    error::DbError,
    model::{Certificate, Operation, ServiceInstance},
    params, results, Db,
};
use chrono::Utc;
use diesel::{
    prelude::*,
    r2d2::{ConnectionManager, PooledConnection},
    PgConnection,
};

use crate::{
    error::from_diesel_result,
    models::{
        action_str, state_str, CertificateRow, NewCertificateRow, NewOperationRow,
        NewServiceInstanceRow, OperationRow, ServiceInstanceRow,
    },
    schema::{certificates, operations, service_instances},
};

type Conn = PooledConnection<ConnectionManager<diesel::PgConnection>>;

/// Synchronous diesel access to one pooled connection. Every method hands
/// its blocking diesel call to `blocking_threadpool` so the async `Db`
/// trait never blocks the tokio executor it's called from.
pub struct PostgresDb {
    conn: Arc<std::sync::Mutex<Conn>>,
    blocking_threadpool: Arc<BlockingThreadpool>,
}

impl PostgresDb {
    pub fn new(conn: Conn, blocking_threadpool: Arc<BlockingThreadpool>) -> Self {
        Self {
            conn: Arc::new(std::sync::Mutex::new(conn)),
            blocking_threadpool,
        }
    }
}

impl std::fmt::Debug for PostgresDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresDb").finish()
    }
}

macro_rules! blocking {
    ($self:ident, $body:expr) => {{
        let conn = $self.conn.clone();
        $self
            .blocking_threadpool
            .spawn(move || {
                let conn = conn.lock().unwrap();
                $body(&*conn)
            })
            .await
    }};
}

#[async_trait]
impl Db for PostgresDb {
    type Error = DbError;

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
        let row = NewServiceInstanceRow::from_instance(&params.instance)?;
        blocking!(self, |conn: &PgConnection| {
            diesel::insert_into(service_instances::table)
                .values(&row)
                .execute(conn)
                .map(|_| ())
                .map_err(from_diesel_result)
        })
    }

    async fn get_instance(
        &mut self,
        params: params::GetInstance,
    ) -> Result<Option<ServiceInstance>, Self::Error> {
        let id = params.service_instance_id;
        let row: Option<ServiceInstanceRow> = blocking!(self, |conn: &PgConnection| {
            service_instances::table
                .find(&id)
                .first(conn)
                .optional()
                .map_err(from_diesel_result)
        })?;
        row.map(|r| r.into_instance()).transpose()
    }

    async fn update_instance(&mut self, params: params::UpdateInstance) -> Result<(), Self::Error> {
        let row = NewServiceInstanceRow::from_instance(&params.instance)?;
        let id = row.id.clone();
        blocking!(self, |conn: &PgConnection| {
            diesel::update(service_instances::table.find(&id))
                .set((
                    service_instances::instance_type.eq(&row.instance_type),
                    service_instances::domain_names.eq(&row.domain_names),
                    service_instances::deactivated_at.eq(row.deactivated_at),
                    service_instances::current_certificate_id.eq(row.current_certificate_id),
                    service_instances::new_certificate_id.eq(row.new_certificate_id),
                    service_instances::payload.eq(&row.payload),
                ))
                .execute(conn)
                .map(|_| ())
                .map_err(from_diesel_result)
        })
    }

    async fn deactivate_instance(
        &mut self,
        params: params::DeactivateInstance,
    ) -> Result<(), Self::Error> {
        let id = params.service_instance_id;
        blocking!(self, |conn: &PgConnection| {
            diesel::update(service_instances::table.find(&id))
                .set(service_instances::deactivated_at.eq(Some(Utc::now())))
                .execute(conn)
                .map(|_| ())
                .map_err(from_diesel_result)
        })
    }

    async fn domain_in_use(
        &mut self,
        params: params::DomainInUse,
    ) -> Result<Option<String>, Self::Error> {
        let except = params.except_instance_id.clone();
        let domain = params.domain.clone();
        let rows: Vec<(String, String)> = blocking!(self, |conn: &PgConnection| {
            service_instances::table
                .filter(service_instances::deactivated_at.is_null())
                .select((service_instances::id, service_instances::domain_names))
                .load(conn)
                .map_err(from_diesel_result)
        })?;
        for (id, domain_names) in rows {
            if Some(id.as_str()) == except.as_deref() {
                continue;
            }
            if domain_names.split(',').any(|d| d == domain) {
                return Ok(Some(domain));
            }
        }
        Ok(None)
    }

    async fn list_instance_ids(&mut self) -> Result<Vec<String>, Self::Error> {
        blocking!(self, |conn: &PgConnection| {
            service_instances::table
                .select(service_instances::id)
                .load(conn)
                .map_err(from_diesel_result)
        })
    }

    async fn create_certificate(
        &mut self,
        params: params::CreateCertificate,
    ) -> Result<results::CreateCertificate, Self::Error> {
        let row = NewCertificateRow {
            service_instance_id: params.service_instance_id,
            private_key_pem: params.private_key_pem,
            csr_pem: params.csr_pem,
            challenges: serde_json::Value::Array(vec![]),
        };
        let id: i64 = blocking!(self, |conn: &PgConnection| {
            diesel::insert_into(certificates::table)
                .values(&row)
                .returning(certificates::id)
                .get_result(conn)
                .map_err(from_diesel_result)
        })?;
        Ok(results::CreateCertificate { id })
    }

    async fn update_certificate(
        &mut self,
        params: params::UpdateCertificate,
    ) -> Result<(), Self::Error> {
        let id = params.id;
        blocking!(self, |conn: &PgConnection| {
            conn.transaction(|| {
                let existing: CertificateRow = certificates::table.find(id).first(conn)?;
                diesel::update(certificates::table.find(id))
                    .set((
                        certificates::leaf_pem.eq(params.leaf_pem.clone().or(existing.leaf_pem)),
                        certificates::fullchain_pem
                            .eq(params.fullchain_pem.clone().or(existing.fullchain_pem)),
                        certificates::iam_server_certificate_id.eq(params
                            .iam_server_certificate_id
                            .clone()
                            .or(existing.iam_server_certificate_id)),
                        certificates::iam_server_certificate_arn.eq(params
                            .iam_server_certificate_arn
                            .clone()
                            .or(existing.iam_server_certificate_arn)),
                        certificates::order_json
                            .eq(params.order_json.clone().or(existing.order_json)),
                    ))
                    .execute(conn)
                    .map(|_| ())
            })
            .map_err(from_diesel_result)
        })
    }

    async fn get_certificate(&mut self, id: i64) -> Result<Option<Certificate>, Self::Error> {
        let row: Option<CertificateRow> = blocking!(self, |conn: &PgConnection| {
            certificates::table
                .find(id)
                .first(conn)
                .optional()
                .map_err(from_diesel_result)
        })?;
        row.map(|r| r.into_certificate()).transpose()
    }

    async fn get_duplicate_certs_for_service(
        &mut self,
        service_instance_id: &str,
    ) -> Result<Vec<Certificate>, Self::Error> {
        let service_instance_id = service_instance_id.to_owned();
        let current_id: Option<i64> = blocking!(self, |conn: &PgConnection| {
            service_instances::table
                .find(&service_instance_id)
                .select(service_instances::current_certificate_id)
                .first(conn)
                .optional()
                .map_err(from_diesel_result)
                .map(|v: Option<Option<i64>>| v.flatten())
        })?;
        let rows: Vec<CertificateRow> = blocking!(self, |conn: &PgConnection| {
            certificates::table
                .filter(certificates::service_instance_id.eq(&service_instance_id))
                .order(certificates::id.asc())
                .load(conn)
                .map_err(from_diesel_result)
        })?;
        rows.into_iter()
            .filter(|r| Some(r.id) != current_id)
            .map(|r| r.into_certificate())
            .collect()
    }

    async fn delete_certificates(&mut self, ids: &[i64]) -> Result<(), Self::Error> {
        let ids = ids.to_vec();
        blocking!(self, |conn: &PgConnection| {
            diesel::delete(certificates::table.filter(certificates::id.eq_any(&ids)))
                .execute(conn)
                .map(|_| ())
                .map_err(from_diesel_result)
        })
    }

    async fn create_operation(
        &mut self,
        params: params::CreateOperation,
    ) -> Result<results::CreateOperation, Self::Error> {
        let row = NewOperationRow {
            service_instance_id: params.service_instance_id,
            action: action_str(params.action).to_owned(),
            state: state_str(broker_db::model::OperationState::InProgress).to_owned(),
            step_description: params.step_description,
            created_at: Utc::now(),
        };
        let id: i64 = blocking!(self, |conn: &PgConnection| {
            diesel::insert_into(operations::table)
                .values(&row)
                .returning(operations::id)
                .get_result(conn)
                .map_err(from_diesel_result)
        })?;
        Ok(results::CreateOperation { id })
    }

    async fn get_operation(
        &mut self,
        params: params::GetOperation,
    ) -> Result<Option<Operation>, Self::Error> {
        let Some(operation_id) = params.operation_id else {
            return Ok(None);
        };
        let service_instance_id = params.service_instance_id;
        let row: Option<OperationRow> = blocking!(self, |conn: &PgConnection| {
            operations::table
                .find(operation_id)
                .first(conn)
                .optional()
                .map_err(from_diesel_result)
        })?;
        match row {
            Some(r) if r.service_instance_id == service_instance_id => Ok(Some(r.into_operation()?)),
            _ => Ok(None),
        }
    }

    async fn get_operation_by_id(&mut self, operation_id: i64) -> Result<Option<Operation>, Self::Error> {
        let row: Option<OperationRow> = blocking!(self, |conn: &PgConnection| {
            operations::table
                .find(operation_id)
                .first(conn)
                .optional()
                .map_err(from_diesel_result)
        })?;
        row.map(|r| r.into_operation()).transpose()
    }

    async fn update_operation_state(
        &mut self,
        params: params::UpdateOperationState,
    ) -> Result<(), Self::Error> {
        let state = state_str(params.state).to_owned();
        blocking!(self, |conn: &PgConnection| {
            diesel::update(operations::table.find(params.operation_id))
                .set((
                    operations::state.eq(&state),
                    operations::step_description.eq(&params.step_description),
                ))
                .execute(conn)
                .map(|_| ())
                .map_err(from_diesel_result)
        })
    }

    async fn has_active_operation(
        &mut self,
        service_instance_id: &str,
    ) -> Result<bool, Self::Error> {
        let service_instance_id = service_instance_id.to_owned();
        let in_progress = state_str(broker_db::model::OperationState::InProgress).to_owned();
        let count: i64 = blocking!(self, |conn: &PgConnection| {
            operations::table
                .filter(operations::service_instance_id.eq(&service_instance_id))
                .filter(operations::state.eq(&in_progress))
                .count()
                .get_result(conn)
                .map_err(from_diesel_result)
        })?;
        Ok(count > 0)
    }

    async fn check(&mut self) -> Result<bool, Self::Error> {
        blocking!(self, |conn: &PgConnection| {
            diesel::sql_query("SELECT 1")
                .execute(conn)
                .map(|_| true)
                .map_err(from_diesel_result)
        })
    }
}
