use std::fmt;

use metrics::counter;
use sqlx::{Sqlite, Transaction};
use thiserror::Error;
use tracing::{error, info, warn};

use customer_registry_core::{
    format_email, format_phone, Customer, CustomerInput, FormatError, NewCustomer,
};
use customer_registry_storage::{CustomerRepository, CustomerStoreError, Database};

/// Operation labels used in error messages, logs and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CustomerOperation {
    Create,
    Update,
    Delete,
    List,
    Fetch,
}

impl CustomerOperation {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::List => "list",
            Self::Fetch => "fetch",
        }
    }
}

impl fmt::Display for CustomerOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum CustomerServiceError {
    #[error(transparent)]
    InvalidFormat(#[from] FormatError),
    #[error("Customer with ID {0} not found.")]
    NotFound(i64),
    #[error("failed to {operation} customer: {source}")]
    OperationFailed {
        operation: CustomerOperation,
        source: CustomerStoreError,
    },
}

/// Business rules for customer records: contact fields are formatted before
/// they reach the store and mutations check that the target exists.
#[derive(Clone)]
pub struct CustomerService {
    repository: CustomerRepository,
}

impl CustomerService {
    pub fn new(database: &Database) -> Self {
        Self {
            repository: database.customers(),
        }
    }

    /// Formats the contact fields and persists a new customer.
    pub async fn create(&self, input: CustomerInput) -> Result<Customer, CustomerServiceError> {
        let operation = CustomerOperation::Create;
        let new_customer = match format_contact(&input) {
            Ok((email, phone)) => NewCustomer {
                name: input.name,
                email,
                phone,
            },
            Err(err) => {
                record_outcome(operation, "invalid");
                return Err(err.into());
            }
        };

        let mut tx = self
            .repository
            .begin()
            .await
            .map_err(operation_failed(operation))?;
        let created = self
            .repository
            .create(&mut tx, &new_customer)
            .await
            .map_err(operation_failed(operation))?;
        tx.commit()
            .await
            .map_err(CustomerStoreError::from)
            .map_err(operation_failed(operation))?;

        info!(stage = "service", operation = %operation, customer_id = created.id, "customer created");
        record_outcome(operation, "ok");
        Ok(created)
    }

    /// Rewrites the email and phone of an existing customer. The stored name
    /// is kept even when the input carries a different one.
    ///
    /// Existence is checked before the input is formatted, so an unknown id
    /// reports `NotFound` even when the fields are malformed.
    pub async fn update(
        &self,
        id: i64,
        input: CustomerInput,
    ) -> Result<Customer, CustomerServiceError> {
        let operation = CustomerOperation::Update;
        let existing = self
            .repository
            .find_by_id(id)
            .await
            .map_err(operation_failed(operation))?;
        let Some(mut customer) = existing else {
            return Err(not_found(operation, id));
        };

        let (email, phone) = match format_contact(&input) {
            Ok(contact) => contact,
            Err(err) => {
                record_outcome(operation, "invalid");
                return Err(err.into());
            }
        };
        customer.apply_contact(email, phone);

        let mut tx = self
            .repository
            .begin()
            .await
            .map_err(operation_failed(operation))?;
        let updated = self
            .repository
            .update(&mut tx, &customer)
            .await
            .map_err(operation_failed(operation))?;
        let Some(updated) = updated else {
            rollback(tx, operation).await;
            return Err(not_found(operation, id));
        };
        tx.commit()
            .await
            .map_err(CustomerStoreError::from)
            .map_err(operation_failed(operation))?;

        info!(stage = "service", operation = %operation, customer_id = id, "customer updated");
        record_outcome(operation, "ok");
        Ok(updated)
    }

    /// Deletes an existing customer.
    pub async fn delete(&self, id: i64) -> Result<(), CustomerServiceError> {
        let operation = CustomerOperation::Delete;
        let mut tx = self
            .repository
            .begin()
            .await
            .map_err(operation_failed(operation))?;

        let removed = self
            .repository
            .delete(&mut tx, id)
            .await
            .map_err(operation_failed(operation))?;
        if !removed {
            rollback(tx, operation).await;
            return Err(not_found(operation, id));
        }
        tx.commit()
            .await
            .map_err(CustomerStoreError::from)
            .map_err(operation_failed(operation))?;

        info!(stage = "service", operation = %operation, customer_id = id, "customer deleted");
        record_outcome(operation, "ok");
        Ok(())
    }

    pub async fn list_all(&self) -> Result<Vec<Customer>, CustomerServiceError> {
        let operation = CustomerOperation::List;
        let customers = self
            .repository
            .find_all()
            .await
            .map_err(operation_failed(operation))?;

        info!(stage = "service", operation = %operation, total = customers.len(), "customers listed");
        record_outcome(operation, "ok");
        Ok(customers)
    }

    /// Looks a customer up by id. Absence is reported as `Ok(None)`.
    pub async fn find_by_id(&self, id: i64) -> Result<Option<Customer>, CustomerServiceError> {
        let operation = CustomerOperation::Fetch;
        let customer = self
            .repository
            .find_by_id(id)
            .await
            .map_err(operation_failed(operation))?;

        if customer.is_some() {
            info!(stage = "service", operation = %operation, customer_id = id, "customer found");
            record_outcome(operation, "ok");
        } else {
            warn!(stage = "service", operation = %operation, customer_id = id, "customer not found");
            record_outcome(operation, "not_found");
        }
        Ok(customer)
    }
}

/// Email is formatted before phone so an invalid email is reported first.
fn format_contact(input: &CustomerInput) -> Result<(Option<String>, String), FormatError> {
    let email = format_email(input.email.as_deref())?;
    let phone = format_phone(input.phone.as_deref())?;
    Ok((email, phone))
}

fn not_found(operation: CustomerOperation, id: i64) -> CustomerServiceError {
    warn!(stage = "service", operation = %operation, customer_id = id, "customer not found");
    record_outcome(operation, "not_found");
    CustomerServiceError::NotFound(id)
}

fn operation_failed(
    operation: CustomerOperation,
) -> impl FnOnce(CustomerStoreError) -> CustomerServiceError {
    move |source| {
        error!(stage = "service", operation = %operation, error = %source, "customer operation failed");
        record_outcome(operation, "error");
        CustomerServiceError::OperationFailed { operation, source }
    }
}

async fn rollback(tx: Transaction<'static, Sqlite>, operation: CustomerOperation) {
    if let Err(err) = tx.rollback().await {
        warn!(stage = "service", operation = %operation, error = %err, "failed to roll back transaction");
    }
}

fn record_outcome(operation: CustomerOperation, outcome: &'static str) {
    counter!(
        "customer_operations_total",
        "operation" => operation.as_str(),
        "outcome" => outcome
    )
    .increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup_service() -> (CustomerService, Database) {
        let database = Database::connect("sqlite::memory:")
            .await
            .expect("connect");
        database.run_migrations().await.expect("migrations");
        (CustomerService::new(&database), database)
    }

    fn input(name: &str, email: &str, phone: &str) -> CustomerInput {
        CustomerInput {
            name: Some(name.to_string()),
            email: Some(email.to_string()),
            phone: Some(phone.to_string()),
        }
    }

    #[tokio::test]
    async fn create_formats_contact_fields() {
        let (service, _db) = setup_service().await;

        let created = service
            .create(input("João", "Joao@Ex.com ", "1234567891"))
            .await
            .expect("create");

        assert_eq!(created.name.as_deref(), Some("João"));
        assert_eq!(created.email.as_deref(), Some("joao@ex.com"));
        assert_eq!(created.phone, "(12) 3456-7891");
    }

    #[tokio::test]
    async fn created_customer_can_be_fetched() {
        let (service, _db) = setup_service().await;
        let created = service
            .create(input("Maria", "maria@example.com", "11987654321"))
            .await
            .expect("create");

        let fetched = service.find_by_id(created.id).await.expect("fetch");
        assert_eq!(fetched, Some(created));
    }

    #[tokio::test]
    async fn create_accepts_missing_email() {
        let (service, _db) = setup_service().await;
        let created = service
            .create(CustomerInput {
                name: Some("Sem Email".to_string()),
                email: None,
                phone: Some("1234567890".to_string()),
            })
            .await
            .expect("create");

        assert_eq!(created.email, None);
    }

    #[tokio::test]
    async fn create_rejects_invalid_fields_without_persisting() {
        let (service, _db) = setup_service().await;

        let err = service
            .create(input("Ana", "not-an-email", "1234567890"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CustomerServiceError::InvalidFormat(FormatError::InvalidEmail)
        ));

        let err = service
            .create(CustomerInput {
                phone: None,
                ..input("Ana", "ana@example.com", "")
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CustomerServiceError::InvalidFormat(FormatError::InvalidPhone)
        ));

        assert!(service.list_all().await.expect("list").is_empty());
    }

    #[tokio::test]
    async fn update_rewrites_contact_but_keeps_name() {
        let (service, _db) = setup_service().await;
        let created = service
            .create(input("João", "joao@example.com", "1234567899"))
            .await
            .expect("create");

        let updated = service
            .update(
                created.id,
                input("João Silva", " Joao.Silva@Example.com", "11987654321"),
            )
            .await
            .expect("update");

        assert_eq!(updated.id, created.id);
        assert_eq!(updated.name.as_deref(), Some("João"));
        assert_eq!(updated.email.as_deref(), Some("joao.silva@example.com"));
        assert_eq!(updated.phone, "(11) 98765-4321");
        assert_eq!(
            service.find_by_id(created.id).await.expect("fetch"),
            Some(updated)
        );
    }

    #[tokio::test]
    async fn update_with_invalid_phone_leaves_record_unchanged() {
        let (service, _db) = setup_service().await;
        let created = service
            .create(input("João", "joao@example.com", "1234567899"))
            .await
            .expect("create");

        let err = service
            .update(created.id, input("João", "joao@example.com", "987654321"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CustomerServiceError::InvalidFormat(FormatError::InvalidPhone)
        ));

        assert_eq!(
            service.find_by_id(created.id).await.expect("fetch"),
            Some(created)
        );
    }

    #[tokio::test]
    async fn update_missing_customer_is_not_found() {
        let (service, _db) = setup_service().await;
        let err = service
            .update(1, input("João", "joao@example.com", "1234567899"))
            .await
            .unwrap_err();
        assert!(matches!(err, CustomerServiceError::NotFound(1)));
        assert_eq!(err.to_string(), "Customer with ID 1 not found.");
    }

    #[tokio::test]
    async fn update_checks_existence_before_formatting() {
        let (service, _db) = setup_service().await;
        let err = service
            .update(5, input("João", "bad", "1"))
            .await
            .unwrap_err();
        assert!(matches!(err, CustomerServiceError::NotFound(5)));
    }

    #[tokio::test]
    async fn delete_removes_customer() {
        let (service, _db) = setup_service().await;
        let created = service
            .create(input("João", "joao@example.com", "1234567899"))
            .await
            .expect("create");

        service.delete(created.id).await.expect("delete");
        assert_eq!(service.find_by_id(created.id).await.expect("fetch"), None);

        let err = service.delete(created.id).await.unwrap_err();
        assert!(matches!(err, CustomerServiceError::NotFound(id) if id == created.id));
    }

    #[tokio::test]
    async fn list_all_returns_every_customer() {
        let (service, _db) = setup_service().await;
        assert!(service.list_all().await.expect("list").is_empty());

        service
            .create(input("João", "joao@example.com", "1234567899"))
            .await
            .expect("create");
        service
            .create(input("Maria", "maria@example.com", "9876543210"))
            .await
            .expect("create");

        let customers = service.list_all().await.expect("list");
        assert_eq!(customers.len(), 2);
        assert_eq!(customers[0].name.as_deref(), Some("João"));
        assert_eq!(customers[1].name.as_deref(), Some("Maria"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn concurrent_mutations_on_file_database_succeed() {
        let dir = tempfile::tempdir().expect("temp dir");
        let url = format!(
            "sqlite://{}?mode=rwc",
            dir.path().join("customers.db").display()
        );
        let database = Database::connect(&url).await.expect("connect");
        database.run_migrations().await.expect("migrations");
        let service = CustomerService::new(&database);

        let mut kept = Vec::new();
        let mut doomed = Vec::new();
        for n in 0..10 {
            let email = format!("cliente{n}@example.com");
            kept.push(
                service
                    .create(input(&format!("Cliente {n}"), &email, "1234567890"))
                    .await
                    .expect("create")
                    .id,
            );
            doomed.push(
                service
                    .create(input(&format!("Temporario {n}"), &email, "1234567890"))
                    .await
                    .expect("create")
                    .id,
            );
        }

        let mut tasks = tokio::task::JoinSet::new();
        for attempt in 0..50 {
            let service = service.clone();
            let id = kept[attempt % kept.len()];
            let phone = format!("123456789{}", attempt % 10);
            tasks.spawn(async move {
                service
                    .update(id, input("Ignorado", "novo@example.com", &phone))
                    .await
                    .map(|_| ())
            });
        }
        for id in doomed.iter().copied() {
            let service = service.clone();
            tasks.spawn(async move { service.delete(id).await });
        }

        while let Some(joined) = tasks.join_next().await {
            joined.expect("task should not panic").expect("mutation should succeed");
        }

        let customers = service.list_all().await.expect("list");
        assert_eq!(customers.iter().map(|c| c.id).collect::<Vec<_>>(), kept);
        assert!(customers
            .iter()
            .all(|c| c.email.as_deref() == Some("novo@example.com")));
        database.close().await;
    }

    #[tokio::test]
    async fn closed_pool_is_reported_as_operation_failure() {
        let (service, db) = setup_service().await;
        db.close().await;

        let err = service
            .create(input("João", "joao@example.com", "1234567899"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CustomerServiceError::OperationFailed {
                operation: CustomerOperation::Create,
                ..
            }
        ));
        assert!(err.to_string().starts_with("failed to create customer: "));

        let err = service.list_all().await.unwrap_err();
        assert!(matches!(
            err,
            CustomerServiceError::OperationFailed {
                operation: CustomerOperation::List,
                ..
            }
        ));
    }
}
