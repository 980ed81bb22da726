use serde::{Deserialize, Serialize};

/// Customer record as persisted in the `customers` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    pub id: i64,
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: String,
}

impl Customer {
    /// Replaces the contact fields with already formatted values.
    ///
    /// The name is left untouched: updates only ever rewrite email and phone.
    pub fn apply_contact(&mut self, email: Option<String>, phone: String) {
        self.email = email;
        self.phone = phone;
    }
}

/// Request payload accepted by the create and update endpoints.
///
/// Every field is optional at the binding level; the formatter decides
/// whether the provided values are acceptable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerInput {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
}

/// Formatted customer data ready to be inserted. The identifier is assigned
/// by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCustomer {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: String,
}
