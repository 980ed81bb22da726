//! Domain layer for the customer registry.
//!
//! Hosts the customer types shared by the storage and HTTP crates together
//! with the pure email/phone formatting rules applied before persistence.
pub mod formatter;
pub mod types;

pub use formatter::{format_email, format_phone, FormatError};
pub use types::{Customer, CustomerInput, NewCustomer};
