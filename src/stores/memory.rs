//! An in-process store backed by [`hashbrown::HashMap`]. Internally sharded, each shard behind a
//! [`Mutex`].
//!
//! Every execution context that builds the store gets its own copy of the data, so with the
//! process executor each worker process writes to a private map.
//!
//! ## Configuration Format
//!
//! ``` toml
//! [store]
//! name = "memory"
//! shards = ... # number of shards, default 64
//! ```

use crate::error::StoreError;
use crate::stores::Registry;
use crate::{RowStatus, Store, StoreHandle, SyntheticRow};
use hashbrown::hash_map::DefaultHashBuilder;
use hashbrown::HashMap;
use parking_lot::Mutex;
use serde::Deserialize;
use std::hash::BuildHasher;
use std::sync::Arc;

type Shard = HashMap<String, SyntheticRow>;

fn default_shards() -> usize {
    64
}

#[derive(Deserialize)]
pub struct MemoryStoreOpt {
    #[serde(default = "default_shards")]
    pub shards: usize,
}

#[derive(Clone)]
pub struct MemoryStore {
    hasher: DefaultHashBuilder,
    shards: Arc<Vec<Mutex<Shard>>>,
}

impl MemoryStore {
    pub fn new(opt: &MemoryStoreOpt) -> Result<Self, StoreError> {
        if opt.shards == 0 {
            return Err(StoreError::Options("shards should be positive".into()));
        }
        let shards = (0..opt.shards).map(|_| Mutex::new(Shard::new())).collect();
        Ok(Self {
            hasher: DefaultHashBuilder::default(),
            shards: Arc::new(shards),
        })
    }

    pub fn new_store(opt: &toml::Table) -> Result<Arc<dyn Store>, StoreError> {
        let opt: MemoryStoreOpt = opt
            .clone()
            .try_into()
            .map_err(|e: toml::de::Error| StoreError::Options(e.to_string()))?;
        Ok(Arc::new(Self::new(&opt)?))
    }

    fn shard(&self, key: &str) -> &Mutex<Shard> {
        let sid = self.hasher.hash_one(key) as usize % self.shards.len();
        &self.shards[sid]
    }
}

impl Store for MemoryStore {
    fn handle(&self) -> Result<Box<dyn StoreHandle>, StoreError> {
        Ok(Box::new(self.clone()))
    }
}

impl StoreHandle for MemoryStore {
    fn mutate_batch(&mut self, rows: &[SyntheticRow]) -> Result<Vec<RowStatus>, StoreError> {
        let mut statuses = Vec::with_capacity(rows.len());
        for (i, row) in rows.iter().enumerate() {
            self.shard(&row.key).lock().insert(row.key.clone(), row.clone());
            statuses.push(RowStatus::ok(i));
        }
        Ok(statuses)
    }

    fn read_row(&mut self, key: &str) -> Result<Option<SyntheticRow>, StoreError> {
        Ok(self.shard(key).lock().get(key).cloned())
    }
}

inventory::submit! {
    Registry::new("memory", MemoryStore::new_store)
}
