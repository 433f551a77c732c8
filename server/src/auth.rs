//! Account storage and password hashing used by the pre-game login flow
//!
//! Usernames are case-insensitive: stores key records by the lower-cased
//! name. Passwords are kept only as bcrypt hashes.

use log::info;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::runtime::{Handle, RuntimeFlavor};

const MAX_USERNAME_CHARS: usize = 20;

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("user already exists: {0}")]
    AlreadyExists(String),
    #[error("credential storage failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("credential file is malformed: {0}")]
    Format(#[from] serde_json::Error),
    #[error("password hashing failed: {0}")]
    Hash(#[from] bcrypt::BcryptError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: u64,
    pub username: String,
    pub password_hash: String,
}

/// Persistent account lookup and creation
pub trait CredentialStore: Send + Sync {
    /// Returns the record for `username`, or `None` if there is no such user
    fn get_user_by_username(&self, username: &str) -> Result<Option<UserRecord>, CredentialError>;

    /// Stores a new account, failing with [`CredentialError::AlreadyExists`]
    /// if the name is taken
    fn create_user(&self, username: &str, password_hash: &str) -> Result<UserRecord, CredentialError>;
}

struct Accounts {
    users: HashMap<String, UserRecord>,
    next_id: u64,
}

impl Accounts {
    fn from_records(records: Vec<UserRecord>) -> Self {
        let next_id = records.iter().map(|r| r.id).max().unwrap_or(0) + 1;
        let users = records
            .into_iter()
            .map(|record| (record.username.to_lowercase(), record))
            .collect();
        Self { users, next_id }
    }

    fn insert(&mut self, username: &str, password_hash: &str) -> Result<UserRecord, CredentialError> {
        let key = username.to_lowercase();
        if self.users.contains_key(&key) {
            return Err(CredentialError::AlreadyExists(key));
        }

        let record = UserRecord {
            id: self.next_id,
            username: key.clone(),
            password_hash: password_hash.to_string(),
        };
        self.next_id += 1;
        self.users.insert(key, record.clone());
        Ok(record)
    }

    fn records(&self) -> Vec<UserRecord> {
        let mut records: Vec<UserRecord> = self.users.values().cloned().collect();
        records.sort_by_key(|r| r.id);
        records
    }
}

/// Accounts kept in memory for the lifetime of the process
pub struct MemoryCredentialStore {
    accounts: Mutex<Accounts>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self {
            accounts: Mutex::new(Accounts::from_records(Vec::new())),
        }
    }
}

impl Default for MemoryCredentialStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn get_user_by_username(&self, username: &str) -> Result<Option<UserRecord>, CredentialError> {
        Ok(self.accounts.lock().users.get(&username.to_lowercase()).cloned())
    }

    fn create_user(&self, username: &str, password_hash: &str) -> Result<UserRecord, CredentialError> {
        self.accounts.lock().insert(username, password_hash)
    }
}

/// Accounts persisted as a JSON array, rewritten after every new account
pub struct FileCredentialStore {
    path: PathBuf,
    accounts: Mutex<Accounts>,
}

impl FileCredentialStore {
    /// Loads `path` if it exists, otherwise starts empty and creates the file
    /// on the first registration
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CredentialError> {
        let path = path.as_ref().to_path_buf();
        let records: Vec<UserRecord> = if path.exists() {
            let contents = fs::read_to_string(&path)?;
            if contents.trim().is_empty() {
                Vec::new()
            } else {
                serde_json::from_str(&contents)?
            }
        } else {
            Vec::new()
        };

        info!("Loaded {} accounts from {}", records.len(), path.display());

        Ok(Self {
            path,
            accounts: Mutex::new(Accounts::from_records(records)),
        })
    }

    fn persist(&self, records: &[UserRecord]) -> Result<(), CredentialError> {
        let json = serde_json::to_string_pretty(records)?;
        let tmp = self.path.with_extension("tmp");
        run_blocking(|| {
            fs::write(&tmp, json)?;
            fs::rename(&tmp, &self.path)
        })?;
        Ok(())
    }
}

impl CredentialStore for FileCredentialStore {
    fn get_user_by_username(&self, username: &str) -> Result<Option<UserRecord>, CredentialError> {
        Ok(self.accounts.lock().users.get(&username.to_lowercase()).cloned())
    }

    fn create_user(&self, username: &str, password_hash: &str) -> Result<UserRecord, CredentialError> {
        let mut accounts = self.accounts.lock();
        let record = accounts.insert(username, password_hash)?;

        if let Err(e) = self.persist(&accounts.records()) {
            // keep memory and disk in agreement
            accounts.users.remove(&record.username);
            return Err(e);
        }

        Ok(record)
    }
}

/// Checks a requested username, returning a short reason when it is unusable
pub fn validate_username(username: &str) -> Result<(), &'static str> {
    if username.is_empty() {
        return Err("empty");
    }
    if username.chars().count() > MAX_USERNAME_CHARS {
        return Err("too long");
    }
    if username != username.trim() {
        return Err("leading or trailing whitespace");
    }
    Ok(())
}

/// Hashes a password with a fresh random salt at the given bcrypt cost
pub fn hash_password(password: &str, cost: u32) -> Result<String, CredentialError> {
    Ok(run_blocking(|| bcrypt::hash(password, cost))?)
}

/// Checks `password` against a stored hash. Malformed hashes never match.
pub fn verify_password(stored_hash: &str, password: &str) -> bool {
    run_blocking(|| bcrypt::verify(password, stored_hash)).unwrap_or(false)
}

/// Runs slow synchronous work (disk writes, password hashing) from inside a
/// state handler. On a multi-threaded runtime the worker hands its other
/// tasks off first; elsewhere the work simply runs inline.
fn run_blocking<T>(work: impl FnOnce() -> T) -> T {
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(work)
        }
        _ => work(),
    }
}
