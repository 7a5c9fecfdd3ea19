//! Ports: the seams between the payment core and its collaborators.

pub mod catalog_reader;
pub mod payment_gateway;
pub mod proof_generator;
pub mod registration_repository;
pub mod transaction_store;

pub use catalog_reader::CatalogReader;
pub use payment_gateway::{
    GatewayAck, GatewayError, GatewayStatus, PaymentGateway, RESULT_FAILED, RESULT_PENDING,
    RESULT_SUCCESS,
};
pub use proof_generator::{ProofArtifactGenerator, ProofPayload, PAID_MARKER};
pub use registration_repository::RegistrationRepository;
pub use transaction_store::{
    CascadeOutcome, NewTransaction, Reservation, StatusUpdate, TransactionStore,
};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;
