pub mod auth;

pub use auth::{admin_auth, USER_ID_HEADER, USER_ROLE_HEADER};
