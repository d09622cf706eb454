use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::Value;

static NEXT_BLACKBOARD_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BlackboardError {
    #[error("invalid blackboard key `{key}`")]
    InvalidKey { key: String },

    #[error("client `{client}` is not registered with this blackboard")]
    UnknownClient { client: String },

    #[error("client `{client}` was issued by a different blackboard")]
    ForeignClient { client: String },

    #[error("client `{client}` has no {access} access to `{key}`")]
    AccessDenied {
        client: String,
        key: String,
        access: &'static str,
    },

    #[error("`{key}` is exclusively written by `{holder}`")]
    ExclusiveWriteHeld { key: String, holder: String },

    #[error("value for `{key}` violates its schema: {reason}")]
    SchemaViolation { key: String, reason: String },
}

/// Normalise a path-like key so `counter`, `/counter` and ` /counter ` address the same entry.
pub fn normalize_key(key: &str) -> Result<String, BlackboardError> {
    let trimmed = key.trim().trim_start_matches('/');
    if trimmed.is_empty() || trimmed.chars().any(char::is_whitespace) {
        return Err(BlackboardError::InvalidKey {
            key: key.to_string(),
        });
    }
    Ok(format!("/{trimmed}"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Access {
    Read,
    /// Read and write. Any number of clients may hold it.
    Write,
    /// Read and write, and no other client may write the key.
    ExclusiveWrite,
}

impl Access {
    pub fn can_write(self) -> bool {
        !matches!(self, Access::Read)
    }
}

/// Capability returned by [`Blackboard::register_client`].
///
/// Reads and writes are checked against the keys registered for the token. Tokens are bound to
/// the blackboard that issued them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientToken {
    blackboard: u64,
    id: u64,
    name: String,
}

impl ClientToken {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariableType {
    Int,
    Float,
    String,
    Bool,
    Array,
    Object,
    Any,
}

impl VariableType {
    fn accepts(self, value: &Value) -> bool {
        matches!(
            (self, value),
            (VariableType::Any, _)
                | (VariableType::Int, Value::Int(_))
                | (VariableType::Float, Value::Int(_) | Value::Float(_))
                | (VariableType::String, Value::String(_))
                | (VariableType::Bool, Value::Bool(_))
                | (VariableType::Array, Value::Array(_))
                | (VariableType::Object, Value::Object(_))
        )
    }
}

/// Declared type and bounds of one blackboard variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableSchema {
    #[serde(rename = "type")]
    pub kind: VariableType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<VariableType>,
}

impl VariableSchema {
    pub fn new(kind: VariableType) -> Self {
        Self {
            kind,
            default: None,
            min: None,
            max: None,
            items: None,
        }
    }

    pub fn validate(&self, key: &str, value: &Value) -> Result<(), BlackboardError> {
        let violation = |reason: String| BlackboardError::SchemaViolation {
            key: key.to_string(),
            reason,
        };

        if !self.kind.accepts(value) {
            return Err(violation(format!(
                "expected {:?}, got {}",
                self.kind,
                value.type_name()
            )));
        }

        if let Some(n) = value.as_f64() {
            if let Some(min) = self.min {
                if n < min {
                    return Err(violation(format!("{n} is below minimum {min}")));
                }
            }
            if let Some(max) = self.max {
                if n > max {
                    return Err(violation(format!("{n} is above maximum {max}")));
                }
            }
        }

        if let (Some(items), Value::Array(values)) = (self.items, value) {
            if let Some(bad) = values.iter().find(|v| !items.accepts(v)) {
                return Err(violation(format!(
                    "array item {bad} is not {items:?}"
                )));
            }
        }

        Ok(())
    }
}

/// Who may read and write a key, for introspection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct KeyAccessInfo {
    pub readers: Vec<String>,
    pub writers: Vec<String>,
    pub exclusive_writer: Option<String>,
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    revision: u64,
    writer: Option<String>,
}

#[derive(Debug, Clone)]
struct ClientRecord {
    name: String,
    keys: BTreeMap<String, Access>,
}

/// Access-controlled key/value store scoped to one execution.
///
/// Nodes talk to it through a [`ClientToken`]; the owner of the blackboard (the execution
/// instance, the debugger, snapshots) uses the unchecked `value`/`write` view.
#[derive(Debug)]
pub struct Blackboard {
    id: u64,
    entries: BTreeMap<String, Entry>,
    clients: BTreeMap<u64, ClientRecord>,
    schema: BTreeMap<String, VariableSchema>,
    next_client: u64,
    revision: u64,
}

impl Default for Blackboard {
    fn default() -> Self {
        Self::new()
    }
}

impl Blackboard {
    pub fn new() -> Self {
        Self {
            id: NEXT_BLACKBOARD_ID.fetch_add(1, Ordering::Relaxed),
            entries: BTreeMap::new(),
            clients: BTreeMap::new(),
            schema: BTreeMap::new(),
            next_client: 1,
            revision: 0,
        }
    }

    /// Create a blackboard that validates writes against `schema` and seeds its defaults.
    pub fn with_schema<'a>(
        schema: impl IntoIterator<Item = (&'a String, &'a VariableSchema)>,
    ) -> Result<Self, BlackboardError> {
        let mut bb = Self::new();
        for (key, var) in schema {
            let key = normalize_key(key)?;
            bb.schema.insert(key.clone(), var.clone());
            if let Some(default) = &var.default {
                bb.write(&key, default.clone())?;
            }
        }
        Ok(bb)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn schema(&self) -> &BTreeMap<String, VariableSchema> {
        &self.schema
    }

    pub fn register_client(&mut self, name: impl Into<String>) -> ClientToken {
        let id = self.next_client;
        self.next_client += 1;
        let name = name.into();
        self.clients.insert(
            id,
            ClientRecord {
                name: name.clone(),
                keys: BTreeMap::new(),
            },
        );
        ClientToken {
            blackboard: self.id,
            id,
            name,
        }
    }

    pub fn unregister_client(&mut self, token: &ClientToken) -> bool {
        token.blackboard == self.id && self.clients.remove(&token.id).is_some()
    }

    pub fn register_key(
        &mut self,
        token: &ClientToken,
        key: &str,
        access: Access,
    ) -> Result<(), BlackboardError> {
        let key = normalize_key(key)?;
        self.record(token)?;

        let conflict = if access == Access::ExclusiveWrite {
            self.writers_of(&key)
                .find(|(id, _)| *id != token.id)
                .map(|(_, name)| name.to_string())
        } else if access.can_write() {
            self.exclusive_writer(&key)
                .filter(|(id, _)| *id != token.id)
                .map(|(_, name)| name.to_string())
        } else {
            None
        };
        if let Some(holder) = conflict {
            return Err(BlackboardError::ExclusiveWriteHeld { key, holder });
        }

        let record = self.record_mut(token)?;
        let entry = record.keys.entry(key).or_insert(access);
        // Never downgrade an existing write grant to read.
        if access.can_write() || !entry.can_write() {
            *entry = access;
        }
        Ok(())
    }

    /// Scoped view that carries `token` along with the blackboard.
    pub fn client<'a>(&'a mut self, token: &'a ClientToken) -> BlackboardClient<'a> {
        BlackboardClient {
            blackboard: self,
            token,
        }
    }

    pub fn get(&self, token: &ClientToken, key: &str) -> Result<Option<&Value>, BlackboardError> {
        let key = self.check(token, key, false)?;
        Ok(self.entries.get(&key).map(|e| &e.value))
    }

    pub fn exists(&self, token: &ClientToken, key: &str) -> Result<bool, BlackboardError> {
        Ok(self.get(token, key)?.is_some())
    }

    /// Write `value`. With `overwrite == false` an existing entry is left untouched and `false`
    /// is returned.
    pub fn set(
        &mut self,
        token: &ClientToken,
        key: &str,
        value: Value,
        overwrite: bool,
    ) -> Result<bool, BlackboardError> {
        let key = self.check(token, key, true)?;
        if !overwrite && self.entries.contains_key(&key) {
            return Ok(false);
        }
        let writer = token.name.clone();
        self.insert(key, value, Some(writer))?;
        Ok(true)
    }

    pub fn unset(&mut self, token: &ClientToken, key: &str) -> Result<bool, BlackboardError> {
        let key = self.check(token, key, true)?;
        Ok(self.entries.remove(&key).is_some())
    }

    /// Unchecked read for the owner of the blackboard.
    pub fn value(&self, key: &str) -> Option<&Value> {
        let key = normalize_key(key).ok()?;
        self.entries.get(&key).map(|e| &e.value)
    }

    /// Unchecked write for the owner of the blackboard. Still validated against the schema.
    pub fn write(&mut self, key: &str, value: Value) -> Result<(), BlackboardError> {
        let key = normalize_key(key)?;
        self.insert(key, value, None)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let key = normalize_key(key).ok()?;
        self.entries.remove(&key).map(|e| e.value)
    }

    /// Monotonic revision of the last write to `key`.
    pub fn revision(&self, key: &str) -> Option<u64> {
        let key = normalize_key(key).ok()?;
        self.entries.get(&key).map(|e| e.revision)
    }

    /// Name of the client that last wrote `key` (`None` for owner writes).
    pub fn last_writer(&self, key: &str) -> Option<&str> {
        let key = normalize_key(key).ok()?;
        self.entries.get(&key)?.writer.as_deref()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn snapshot(&self) -> BTreeMap<String, Value> {
        self.entries
            .iter()
            .map(|(k, e)| (k.clone(), e.value.clone()))
            .collect()
    }

    pub fn key_access(&self, key: &str) -> KeyAccessInfo {
        let Ok(key) = normalize_key(key) else {
            return KeyAccessInfo::default();
        };
        let mut info = KeyAccessInfo::default();
        for record in self.clients.values() {
            match record.keys.get(&key) {
                Some(Access::Read) => info.readers.push(record.name.clone()),
                Some(Access::Write) => info.writers.push(record.name.clone()),
                Some(Access::ExclusiveWrite) => {
                    info.writers.push(record.name.clone());
                    info.exclusive_writer = Some(record.name.clone());
                }
                None => {}
            }
        }
        info
    }

    /// Drop every value, keep clients and schema.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    fn insert(
        &mut self,
        key: String,
        value: Value,
        writer: Option<String>,
    ) -> Result<(), BlackboardError> {
        if let Some(schema) = self.schema.get(&key) {
            schema.validate(&key, &value)?;
        }
        self.revision += 1;
        self.entries.insert(
            key,
            Entry {
                value,
                revision: self.revision,
                writer,
            },
        );
        Ok(())
    }

    fn record(&self, token: &ClientToken) -> Result<&ClientRecord, BlackboardError> {
        if token.blackboard != self.id {
            return Err(BlackboardError::ForeignClient {
                client: token.name.clone(),
            });
        }
        self.clients
            .get(&token.id)
            .ok_or_else(|| BlackboardError::UnknownClient {
                client: token.name.clone(),
            })
    }

    fn record_mut(&mut self, token: &ClientToken) -> Result<&mut ClientRecord, BlackboardError> {
        self.record(token)?;
        self.clients
            .get_mut(&token.id)
            .ok_or_else(|| BlackboardError::UnknownClient {
                client: token.name.clone(),
            })
    }

    fn check(&self, token: &ClientToken, key: &str, write: bool) -> Result<String, BlackboardError> {
        let key = normalize_key(key)?;
        let record = self.record(token)?;
        let allowed = match record.keys.get(&key) {
            Some(access) => !write || access.can_write(),
            None => false,
        };
        if !allowed {
            return Err(BlackboardError::AccessDenied {
                client: token.name.clone(),
                key,
                access: if write { "write" } else { "read" },
            });
        }
        Ok(key)
    }

    fn writers_of<'a>(&'a self, key: &'a str) -> impl Iterator<Item = (u64, &'a str)> + 'a {
        self.clients.iter().filter_map(move |(id, record)| {
            record
                .keys
                .get(key)
                .filter(|a| a.can_write())
                .map(|_| (*id, record.name.as_str()))
        })
    }

    fn exclusive_writer(&self, key: &str) -> Option<(u64, &str)> {
        self.clients.iter().find_map(|(id, record)| {
            (record.keys.get(key) == Some(&Access::ExclusiveWrite))
                .then_some((*id, record.name.as_str()))
        })
    }
}

/// A blackboard borrowed together with one client's token.
pub struct BlackboardClient<'a> {
    blackboard: &'a mut Blackboard,
    token: &'a ClientToken,
}

impl<'a> BlackboardClient<'a> {
    pub fn token(&self) -> &ClientToken {
        self.token
    }

    pub fn get(&self, key: &str) -> Result<Option<&Value>, BlackboardError> {
        self.blackboard.get(self.token, key)
    }

    pub fn exists(&self, key: &str) -> Result<bool, BlackboardError> {
        self.blackboard.exists(self.token, key)
    }

    pub fn set(&mut self, key: &str, value: Value, overwrite: bool) -> Result<bool, BlackboardError> {
        self.blackboard.set(self.token, key, value, overwrite)
    }

    pub fn unset(&mut self, key: &str) -> Result<bool, BlackboardError> {
        self.blackboard.unset(self.token, key)
    }
}
