pub mod orchestrator;
pub mod sweeper;

pub use orchestrator::{
    OrchestratorSettings, PaymentView, Receipt, StatusView, TransactionOrchestrator,
};
pub use sweeper::{run_expiry_sweeper, sweep_once};
