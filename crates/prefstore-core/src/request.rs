//! Host request/result pairs
//!
//! Bridges hand over loosely typed input: any string may be null, and
//! multi-key rows arrive as arrays of arbitrary length. `Request` models
//! that input as-is; `KeyValueStore::execute` validates it into the typed
//! operations and never lets a panic cross back into the host.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use tracing::error;

use crate::config::{at_position, Config};
use crate::error::{StoreError, StoreResult};
use crate::store::KeyValueStore;

/// One host call. `None` stands for a host-side null.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    SetItem { key: Option<String>, value: Option<String> },
    GetItem { key: Option<String> },
    RemoveItem { key: Option<String> },
    /// Each row should be exactly `[key, value]`
    MultiSet { rows: Option<Vec<Vec<Option<String>>>> },
    MultiGet { keys: Option<Vec<Option<String>>> },
    MultiRemove { keys: Option<Vec<Option<String>>> },
    Clear,
    GetAllKeys,
}

impl Request {
    /// Operation name as hosts call it.
    pub fn name(&self) -> &'static str {
        match self {
            Request::SetItem { .. } => "setItem",
            Request::GetItem { .. } => "getItem",
            Request::RemoveItem { .. } => "removeItem",
            Request::MultiSet { .. } => "multiSet",
            Request::MultiGet { .. } => "multiGet",
            Request::MultiRemove { .. } => "multiRemove",
            Request::Clear => "clear",
            Request::GetAllKeys => "getAllKeys",
        }
    }
}

/// Successful result of a `Request`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Write completed
    Done,
    /// `getItem` result
    Item(Option<String>),
    /// `multiGet` rows, aligned with the requested keys
    Items(Vec<(String, Option<String>)>),
    /// `getAllKeys` result
    Keys(Vec<String>),
}

impl KeyValueStore {
    /// Serve one host request.
    ///
    /// A panic while serving is caught and reported as `StorageUnavailable`
    /// carrying the panic message. The committed state is unaffected because
    /// batches only publish after a successful write.
    pub fn execute(&self, request: Request) -> StoreResult<Response> {
        let op = request.name();
        match panic::catch_unwind(AssertUnwindSafe(|| self.dispatch(request))) {
            Ok(result) => result,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!(op, message = %message, "request panicked");
                Err(StoreError::unclassified(format!("{} failed: {}", op, message)))
            }
        }
    }

    fn dispatch(&self, request: Request) -> StoreResult<Response> {
        match request {
            Request::SetItem { key, value } => {
                let key = require_key(key, None)?;
                let value = value.ok_or_else(|| StoreError::invalid_value("null value"))?;
                self.set_item(&key, &value)?;
                Ok(Response::Done)
            }
            Request::GetItem { key } => {
                let key = require_key(key, None)?;
                Ok(Response::Item(self.get_item(&key)?))
            }
            Request::RemoveItem { key } => {
                let key = require_key(key, None)?;
                self.remove_item(&key)?;
                Ok(Response::Done)
            }
            Request::MultiSet { rows } => {
                let rows = rows.ok_or_else(|| StoreError::invalid_key("null key-value collection"))?;
                let config = self.config();
                config.check_batch_len(rows.len())?;
                let pairs = rows
                    .into_iter()
                    .enumerate()
                    .map(|(i, row)| pair_from_row(row, i, config))
                    .collect::<StoreResult<Vec<_>>>()?;
                self.multi_set(&pairs)?;
                Ok(Response::Done)
            }
            Request::MultiGet { keys } => {
                let keys = require_keys(keys)?;
                Ok(Response::Items(self.multi_get(&keys)?))
            }
            Request::MultiRemove { keys } => {
                let keys = require_keys(keys)?;
                self.multi_remove(&keys)?;
                Ok(Response::Done)
            }
            Request::Clear => {
                self.clear()?;
                Ok(Response::Done)
            }
            Request::GetAllKeys => Ok(Response::Keys(self.get_all_keys()?)),
        }
    }
}

fn require_key(key: Option<String>, position: Option<usize>) -> StoreResult<String> {
    match key {
        Some(key) if !key.is_empty() => Ok(key),
        Some(_) => Err(StoreError::invalid_key(format!("empty key{}", at_position(position)))),
        None => Err(StoreError::invalid_key(format!("null key{}", at_position(position)))),
    }
}

fn require_keys(keys: Option<Vec<Option<String>>>) -> StoreResult<Vec<String>> {
    keys.ok_or_else(|| StoreError::invalid_key("null key collection"))?
        .into_iter()
        .enumerate()
        .map(|(i, key)| require_key(key, Some(i)))
        .collect()
}

/// Checks one `[key, value]` row completely, limits included, so the first
/// bad row decides the error.
fn pair_from_row(row: Vec<Option<String>>, position: usize, config: &Config) -> StoreResult<(String, String)> {
    if row.len() != 2 {
        return Err(StoreError::invalid_value(format!(
            "entry has {} elements, expected 2{}",
            row.len(),
            at_position(Some(position))
        )));
    }
    let mut cells = row.into_iter();
    let key = require_key(cells.next().flatten(), Some(position))?;
    config.check_key(&key, Some(position))?;
    let value = cells
        .next()
        .flatten()
        .ok_or_else(|| StoreError::invalid_value(format!("null value{}", at_position(Some(position)))))?;
    config.check_value(&value, Some(position))?;
    Ok((key, value))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
