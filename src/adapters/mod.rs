//! Adapters: concrete implementations of the ports.

pub mod in_memory;
pub mod postgres_registration_repository;
pub mod postgres_transaction_store;

pub use in_memory::{AuditEntry, InMemoryPaymentStore};
pub use postgres_registration_repository::{
    PostgresCatalogReader, PostgresRegistrationRepository, TransactionalRegistrations,
};
pub use postgres_transaction_store::PostgresTransactionStore;
