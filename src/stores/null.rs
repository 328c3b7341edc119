//! A store that accepts every write and finds nothing on read. Useful to measure the overhead of
//! the harness itself.
//!
//! ## Configuration Format
//!
//! ``` toml
//! [store]
//! name = "null"
//! ```

use crate::error::StoreError;
use crate::stores::Registry;
use crate::{RowStatus, Store, StoreHandle, SyntheticRow};
use std::sync::Arc;

#[derive(Clone, Default)]
pub struct NullStore;

impl NullStore {
    pub fn new() -> Self {
        Self
    }

    pub fn new_store(_opt: &toml::Table) -> Result<Arc<dyn Store>, StoreError> {
        Ok(Arc::new(Self::new()))
    }
}

impl Store for NullStore {
    fn handle(&self) -> Result<Box<dyn StoreHandle>, StoreError> {
        Ok(Box::new(self.clone()))
    }
}

impl StoreHandle for NullStore {
    fn mutate_batch(&mut self, rows: &[SyntheticRow]) -> Result<Vec<RowStatus>, StoreError> {
        Ok((0..rows.len()).map(RowStatus::ok).collect())
    }

    fn read_row(&mut self, _key: &str) -> Result<Option<SyntheticRow>, StoreError> {
        Ok(None)
    }
}

inventory::submit! {
    Registry::new("null", NullStore::new_store)
}
