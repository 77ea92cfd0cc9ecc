//! Customer and product lookups.
//!
//! Both datasets are owned by other systems; here they are read-only from the order
//! service's point of view and are filled from a seed file at startup.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, RwLock};

use serde::Deserialize;
use thiserror::Error;

use orderflow_core::{CustomerId, ProductId};
use orderflow_orders::{Customer, Product};

use super::StoreError;

pub trait CustomerDirectory: Send + Sync {
    fn get_customer(&self, id: CustomerId) -> Result<Option<Customer>, StoreError>;
}

pub trait ProductCatalog: Send + Sync {
    fn get_product(&self, id: ProductId) -> Result<Option<Product>, StoreError>;
}

impl<S> CustomerDirectory for Arc<S>
where
    S: CustomerDirectory + ?Sized,
{
    fn get_customer(&self, id: CustomerId) -> Result<Option<Customer>, StoreError> {
        (**self).get_customer(id)
    }
}

impl<S> ProductCatalog for Arc<S>
where
    S: ProductCatalog + ?Sized,
{
    fn get_product(&self, id: ProductId) -> Result<Option<Product>, StoreError> {
        (**self).get_product(id)
    }
}

#[derive(Debug, Error)]
pub enum SeedError {
    #[error("failed to read seed file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse seed file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Contents of a seed file: `{ "customers": [...], "products": [...] }`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct DirectorySeed {
    #[serde(default)]
    pub customers: Vec<Customer>,
    #[serde(default)]
    pub products: Vec<Product>,
}

impl DirectorySeed {
    pub fn from_json(path: &str, raw: &str) -> Result<Self, SeedError> {
        serde_json::from_str(raw).map_err(|source| SeedError::Parse {
            path: path.to_string(),
            source,
        })
    }

    pub fn load(path: &Path) -> Result<Self, SeedError> {
        let display = path.display().to_string();
        let raw = std::fs::read_to_string(path).map_err(|source| SeedError::Io {
            path: display.clone(),
            source,
        })?;
        Self::from_json(&display, &raw)
    }
}

/// In-memory customer directory and product catalog.
#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    customers: RwLock<HashMap<CustomerId, Customer>>,
    products: RwLock<HashMap<ProductId, Product>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_seed(seed: DirectorySeed) -> Result<Self, StoreError> {
        let directory = Self::new();
        directory.apply_seed(seed)?;
        Ok(directory)
    }

    /// Upsert every record of `seed`; later duplicates win.
    pub fn apply_seed(&self, seed: DirectorySeed) -> Result<(), StoreError> {
        for customer in seed.customers {
            self.upsert_customer(customer)?;
        }
        for product in seed.products {
            self.upsert_product(product)?;
        }
        Ok(())
    }

    pub fn upsert_customer(&self, customer: Customer) -> Result<(), StoreError> {
        let mut map = self
            .customers
            .write()
            .map_err(|_| StoreError::poisoned("customer directory"))?;
        map.insert(customer.id, customer);
        Ok(())
    }

    pub fn upsert_product(&self, product: Product) -> Result<(), StoreError> {
        let mut map = self
            .products
            .write()
            .map_err(|_| StoreError::poisoned("product catalog"))?;
        map.insert(product.id, product);
        Ok(())
    }
}

impl CustomerDirectory for InMemoryDirectory {
    fn get_customer(&self, id: CustomerId) -> Result<Option<Customer>, StoreError> {
        let map = self
            .customers
            .read()
            .map_err(|_| StoreError::poisoned("customer directory"))?;
        Ok(map.get(&id).cloned())
    }
}

impl ProductCatalog for InMemoryDirectory {
    fn get_product(&self, id: ProductId) -> Result<Option<Product>, StoreError> {
        let map = self
            .products
            .read()
            .map_err(|_| StoreError::poisoned("product catalog"))?;
        Ok(map.get(&id).cloned())
    }
}
