//! Adapters for built-in and external stores.
//!
//! ## Configuration Format
//!
//! The configuration of a store lives in a table named `store`. A store's configuration file
//! looks like the following:
//!
//! ```toml
//! [store]
//! name = "..."
//! # option1 = ...
//! # option2 = ...
//! ```
//!
//! The field `name` must be given and it should be equal to the name registered by the store.
//! All other fields are handed over, as a [`toml::Table`], to the store's constructor function.
//! For the options of a built-in store, refer to its module-level documentation.
//!
//! ## Registering New Stores
//!
//! To benchmark your own store from your own crate, implement [`Store`] and [`StoreHandle`] for
//! it, and write a constructor with the signature
//! `fn(&toml::Table) -> Result<Arc<dyn Store>, StoreError>`.
//!
//! Then register the constructor under a name with [`inventory`]:
//! `inventory::submit! { Registry::new("name", constructor_fn) };`. Stores registered this way
//! also work with the process executor, since worker processes rebuild the store from the same
//! registry.

use crate::error::{Error, StoreError};
use crate::Store;
use hashbrown::HashMap;
use log::debug;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use toml::Table;

/// The signature of a store constructor.
pub type Constructor = fn(&Table) -> Result<Arc<dyn Store>, StoreError>;

/// The centralized registry that maps the name of a store to its constructor function.
pub struct Registry<'a> {
    pub(crate) name: &'a str,
    constructor: Constructor,
}

impl<'a> Registry<'a> {
    pub const fn new(name: &'a str, constructor: Constructor) -> Self {
        Self { name, constructor }
    }
}

inventory::collect!(Registry<'static>);

/// The `[store]` table: a registered name plus the store's own options.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct StoreOpt {
    pub name: String,
    #[serde(flatten)]
    pub opt: Table,
}

impl StoreOpt {
    /// Build the store through the registry.
    pub fn build(&self) -> Result<Arc<dyn Store>, Error> {
        let mut registered: HashMap<&'static str, Constructor> = HashMap::new();
        for r in inventory::iter::<Registry> {
            debug!("Adding supported store: {}", r.name);
            if registered.insert(r.name, r.constructor).is_some() {
                return Err(Error::Config(format!("store {} registered twice", r.name)));
            }
        }
        let f = registered
            .get(self.name.as_str())
            .ok_or_else(|| StoreError::Unknown(self.name.clone()))?;
        Ok(f(&self.opt)?)
    }

    /// This table as a standalone TOML document.
    pub(crate) fn to_toml(&self) -> Result<String, Error> {
        toml::to_string(self)
            .map_err(|e| Error::Config(format!("unencodable store table: {}", e)))
    }

    pub(crate) fn from_toml(text: &str) -> Result<Self, Error> {
        toml::from_str(text).map_err(|e| Error::Config(format!("invalid store table: {}", e)))
    }
}

/// Names of all registered stores.
pub fn registered() -> Vec<&'static str> {
    let mut names: Vec<&'static str> = inventory::iter::<Registry>
        .into_iter()
        .map(|r| r.name)
        .collect();
    names.sort_unstable();
    names
}

pub mod memory;
pub mod null;
