pub mod caller;
pub mod error;
pub mod registration;
pub mod transaction;

pub use caller::{Caller, CallerRole};
pub use error::PaymentError;
pub use registration::{
    ItemKind, ItemRef, PayerProfile, PaymentMethod, PurchasableItem, Registration,
    RegistrationStatus,
};
pub use transaction::{
    format_gateway_amount, mint_order_ref, ReservationPlan, Transaction, TransactionStatus,
    DEFAULT_EXPIRY_MINUTES, ORDER_REF_PREFIX,
};
