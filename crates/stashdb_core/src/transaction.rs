//! Typed view of a host transaction handed to caller code.

use crate::error::{StoreError, StoreResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use stashdb_host::{HostTransaction, Key, KeyRange, TransactionMode};

/// A transaction over a fixed set of stores.
///
/// Every call runs against the same consistent view. Writes become visible
/// to other transactions only when the enclosing closure returns `Ok`; an
/// error from the closure (or from any call below) aborts everything.
///
/// Records are JSON documents: values are serialized with `serde_json` on
/// the way in and deserialized on the way out.
pub struct Transaction<'a> {
    tx: &'a mut dyn HostTransaction,
}

impl<'a> Transaction<'a> {
    pub(crate) fn new(tx: &'a mut dyn HostTransaction) -> Self {
        Self { tx }
    }

    /// The transaction's mode.
    #[must_use]
    pub fn mode(&self) -> TransactionMode {
        self.tx.mode()
    }

    /// Looks up the record under `key`.
    ///
    /// # Errors
    ///
    /// `SchemaError` if the store is not in scope, `InvalidRequest` if the
    /// record does not deserialize into `T`.
    pub fn get<T: DeserializeOwned>(
        &self,
        store: &str,
        key: impl Into<Key>,
    ) -> StoreResult<Option<T>> {
        self.tx
            .get(store, &key.into())?
            .map(serde_json::from_value)
            .transpose()
            .map_err(StoreError::from)
    }

    /// Returns every record of `store` in key order.
    ///
    /// # Errors
    ///
    /// See [`Transaction::get`].
    pub fn get_all<T: DeserializeOwned>(&self, store: &str) -> StoreResult<Vec<T>> {
        decode_all(self.tx.get_all(store, None)?)
    }

    /// Returns the records of `store` whose key lies in `range`, in key order.
    ///
    /// # Errors
    ///
    /// See [`Transaction::get`].
    pub fn get_range<T: DeserializeOwned>(
        &self,
        store: &str,
        range: &KeyRange,
    ) -> StoreResult<Vec<T>> {
        decode_all(self.tx.get_all(store, Some(range))?)
    }

    /// Inserts `value` with its in-line or generated key.
    ///
    /// # Errors
    ///
    /// `KeyConflict` if the key (or a unique index key) is taken,
    /// `InvalidRequest` if no valid key can be derived.
    pub fn add<V: Serialize + ?Sized>(&mut self, store: &str, value: &V) -> StoreResult<Key> {
        self.insert_value(store, serde_json::to_value(value)?, None, false)
    }

    /// Inserts `value` under an explicit out-of-line key.
    ///
    /// # Errors
    ///
    /// See [`Transaction::add`].
    pub fn add_with_key<V: Serialize + ?Sized>(
        &mut self,
        store: &str,
        key: impl Into<Key>,
        value: &V,
    ) -> StoreResult<Key> {
        self.insert_value(store, serde_json::to_value(value)?, Some(key.into()), false)
    }

    /// Inserts or replaces `value` under its in-line or generated key.
    ///
    /// # Errors
    ///
    /// `KeyConflict` on a unique index violation, `InvalidRequest` if no
    /// valid key can be derived.
    pub fn put<V: Serialize + ?Sized>(&mut self, store: &str, value: &V) -> StoreResult<Key> {
        self.insert_value(store, serde_json::to_value(value)?, None, true)
    }

    /// Inserts or replaces `value` under an explicit out-of-line key.
    ///
    /// # Errors
    ///
    /// See [`Transaction::put`].
    pub fn put_with_key<V: Serialize + ?Sized>(
        &mut self,
        store: &str,
        key: impl Into<Key>,
        value: &V,
    ) -> StoreResult<Key> {
        self.insert_value(store, serde_json::to_value(value)?, Some(key.into()), true)
    }

    /// Removes the record under `key`. Missing keys are not an error.
    ///
    /// # Errors
    ///
    /// `InvalidRequest` in a read-only transaction.
    pub fn delete(&mut self, store: &str, key: impl Into<Key>) -> StoreResult<()> {
        Ok(self.tx.delete(store, &key.into())?)
    }

    /// Removes every record of `store`.
    ///
    /// # Errors
    ///
    /// `InvalidRequest` in a read-only transaction.
    pub fn clear(&mut self, store: &str) -> StoreResult<()> {
        Ok(self.tx.clear(store)?)
    }

    /// Number of records in `store`.
    ///
    /// # Errors
    ///
    /// `SchemaError` if the store is not in scope.
    pub fn count(&self, store: &str) -> StoreResult<u64> {
        Ok(self.tx.count(store, None)?)
    }

    /// Returns the records reachable through `index`, ordered by index key
    /// then primary key. Without a range every indexed record is returned.
    ///
    /// # Errors
    ///
    /// `SchemaError` if the store or index does not exist.
    pub fn query<T: DeserializeOwned>(
        &self,
        store: &str,
        index: &str,
        range: Option<&KeyRange>,
    ) -> StoreResult<Vec<T>> {
        decode_all(self.tx.index_get_all(store, index, range)?)
    }

    pub(crate) fn insert_value(
        &mut self,
        store: &str,
        value: Value,
        key: Option<Key>,
        overwrite: bool,
    ) -> StoreResult<Key> {
        let key = if overwrite {
            self.tx.put(store, value, key)?
        } else {
            self.tx.add(store, value, key)?
        };
        Ok(key)
    }
}

fn decode_all<T: DeserializeOwned>(values: Vec<Value>) -> StoreResult<Vec<T>> {
    values
        .into_iter()
        .map(|v| serde_json::from_value(v).map_err(StoreError::from))
        .collect()
}
