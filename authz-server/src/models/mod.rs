use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use utoipa::ToSchema;

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone, PartialEq)]
pub struct Customer {
    /// Unique identifier for the customer
    pub id: u32,
    /// Display name
    pub name: String,
    /// Contact email address
    pub email: String,
}

impl Customer {
    fn new(id: u32, name: &str, email: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
            email: email.to_string(),
        }
    }
}

/// Read-only in-memory customer store, ordered by id
#[derive(Debug, Clone)]
pub struct CustomerDirectory {
    customers: BTreeMap<u32, Customer>,
}

impl CustomerDirectory {
    pub fn new(customers: impl IntoIterator<Item = Customer>) -> Self {
        Self {
            customers: customers.into_iter().map(|c| (c.id, c)).collect(),
        }
    }

    pub fn list(&self) -> Vec<Customer> {
        self.customers.values().cloned().collect()
    }

    pub fn get(&self, id: u32) -> Option<&Customer> {
        self.customers.get(&id)
    }
}

impl Default for CustomerDirectory {
    fn default() -> Self {
        Self::new([
            Customer::new(1, "Ada Lovelace", "ada@example.com"),
            Customer::new(2, "Grace Hopper", "grace@example.com"),
            Customer::new(3, "Edsger Dijkstra", "edsger@example.com"),
        ])
    }
}
