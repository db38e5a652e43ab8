//! JSON-file ticket store with a durable per-community id counter.
//!
//! Each community owns two files under the data directory:
//! `<key>_tickets.json` (array of tickets) and `<key>_counter.json`
//! (`{"last": n}`), where `<key>` is the [`file_key`] of the community id.
//! Writes go to a temporary sibling first and are renamed into place, so a
//! crash never leaves a half-written collection behind.

use std::collections::HashMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::debug;

use crate::models::ticket::Ticket;
use crate::{AppError, Result};

#[derive(Debug, Default, Serialize, Deserialize)]
struct CounterFile {
    #[serde(default)]
    last: u64,
}

/// File-backed ticket repository.
///
/// Every read-modify-write of a community's files runs under that
/// community's lock, so concurrent callers in this process never interleave.
#[derive(Clone)]
pub struct TicketStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    data_dir: PathBuf,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl TicketStore {
    /// Open (and create if needed) a store rooted at `data_dir`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Persistence` if the directory cannot be created.
    pub fn open(data_dir: impl Into<PathBuf>) -> Result<Self> {
        let data_dir = data_dir.into();
        fs::create_dir_all(&data_dir).map_err(|err| {
            AppError::Persistence(format!(
                "failed to create data dir {}: {err}",
                data_dir.display()
            ))
        })?;
        Ok(Self {
            inner: Arc::new(StoreInner {
                data_dir,
                locks: Mutex::new(HashMap::new()),
            }),
        })
    }

    /// Directory the store writes into.
    #[must_use]
    pub fn data_dir(&self) -> &Path {
        &self.inner.data_dir
    }

    /// Load every ticket of a community; a missing file is an empty list.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Persistence` on I/O or JSON failure.
    pub fn load(&self, community_id: &str) -> Result<Vec<Ticket>> {
        let lock = self.community_lock(community_id);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.read_tickets(community_id)
    }

    /// Replace a community's whole collection.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Persistence` on I/O or JSON failure.
    pub fn save(&self, community_id: &str, tickets: &[Ticket]) -> Result<()> {
        let lock = self.community_lock(community_id);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.write_tickets(community_id, tickets)
    }

    /// Allocate the next ticket number of a community.
    ///
    /// The counter is written durably before the number is returned, so
    /// numbers are never handed out twice, even across restarts.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Persistence` if the counter cannot be read or written.
    pub fn next_id(&self, community_id: &str) -> Result<u64> {
        let lock = self.community_lock(community_id);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let path = self.counter_path(community_id);
        let mut counter: CounterFile = read_json(&path)?.unwrap_or_default();
        counter.last = counter
            .last
            .checked_add(1)
            .ok_or_else(|| AppError::Persistence("ticket counter overflow".into()))?;
        write_json_atomic(&path, &counter)?;

        debug!(community = community_id, id = counter.last, "allocated ticket id");
        Ok(counter.last)
    }

    /// Find the ticket bound to a channel.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Persistence` on I/O or JSON failure.
    pub fn find_by_channel(&self, community_id: &str, channel_id: &str) -> Result<Option<Ticket>> {
        // Open tickets win over closed records that once used the same channel.
        let mut closed = None;
        for ticket in self.load(community_id)? {
            if ticket.channel_id != channel_id {
                continue;
            }
            if ticket.is_open() {
                return Ok(Some(ticket));
            }
            closed.get_or_insert(ticket);
        }
        Ok(closed)
    }

    /// Find a ticket by number.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Persistence` on I/O or JSON failure.
    pub fn find_by_id(&self, community_id: &str, ticket_id: u64) -> Result<Option<Ticket>> {
        Ok(self
            .load(community_id)?
            .into_iter()
            .find(|t| t.id == ticket_id))
    }

    /// Add a new ticket to a community's collection.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Persistence` on I/O failure, or if a ticket with
    /// the same number already exists.
    pub fn append(&self, community_id: &str, ticket: &Ticket) -> Result<()> {
        let lock = self.community_lock(community_id);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let mut tickets = self.read_tickets(community_id)?;
        if tickets.iter().any(|t| t.id == ticket.id) {
            return Err(AppError::Persistence(format!(
                "ticket {} already exists",
                ticket.id
            )));
        }
        tickets.push(ticket.clone());
        self.write_tickets(community_id, &tickets)
    }

    /// Replace the stored record with the same ticket number.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if no record has that number, or
    /// `AppError::Persistence` on I/O failure.
    pub fn upsert(&self, community_id: &str, ticket: &Ticket) -> Result<()> {
        let lock = self.community_lock(community_id);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let mut tickets = self.read_tickets(community_id)?;
        let slot = tickets
            .iter_mut()
            .find(|t| t.id == ticket.id)
            .ok_or_else(|| AppError::NotFound(format!("ticket #{} not found", ticket.id)))?;
        *slot = ticket.clone();
        self.write_tickets(community_id, &tickets)
    }

    fn community_lock(&self, community_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self
            .inner
            .locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(community_id.to_owned()).or_default())
    }

    fn tickets_path(&self, community_id: &str) -> PathBuf {
        self.inner
            .data_dir
            .join(format!("{}_tickets.json", file_key(community_id)))
    }

    fn counter_path(&self, community_id: &str) -> PathBuf {
        self.inner
            .data_dir
            .join(format!("{}_counter.json", file_key(community_id)))
    }

    fn read_tickets(&self, community_id: &str) -> Result<Vec<Ticket>> {
        Ok(read_json(&self.tickets_path(community_id))?.unwrap_or_default())
    }

    fn write_tickets(&self, community_id: &str, tickets: &[Ticket]) -> Result<()> {
        write_json_atomic(&self.tickets_path(community_id), &tickets)
    }
}

/// Encode a community id as a single file-name component.
///
/// ASCII letters, digits and `-` pass through; every other byte becomes
/// `_` plus two lower-case hex digits. Distinct ids therefore never share a
/// file, and no id can climb out of the directory it is joined onto.
#[must_use]
pub fn file_key(community_id: &str) -> String {
    let mut key = String::with_capacity(community_id.len());
    for byte in community_id.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' {
            key.push(char::from(byte));
        } else {
            key.push_str(&format!("_{byte:02x}"));
        }
    }
    key
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<Option<T>> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(AppError::Persistence(format!(
                "failed to read {}: {err}",
                path.display()
            )))
        }
    };
    if raw.trim().is_empty() {
        return Ok(None);
    }
    serde_json::from_str(&raw)
        .map(Some)
        .map_err(|err| AppError::Persistence(format!("invalid json in {}: {err}", path.display())))
}

fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| AppError::Persistence(format!("no parent dir for {}", path.display())))?;
    let body = serde_json::to_vec_pretty(value)?;

    let mut file = NamedTempFile::new_in(dir)?;
    file.write_all(&body)?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|err| {
        AppError::Persistence(format!("failed to replace {}: {}", path.display(), err.error))
    })?;
    Ok(())
}
