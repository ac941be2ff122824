//! Local call-control state persisted as JSON files
//!
//! Contacts, call history and blocked numbers are kept in memory and written
//! through to `contacts.json`, `call-logs.json` and `blocked.json` after each
//! change. Dial-pad state and the active call are never persisted.

use std::path::{Path, PathBuf};

use chrono::Utc;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{
    digits_of, ActiveCall, CallContext, CallControl, CallDirection, CallError, CallLog, Contact,
};

const CONTACTS_FILE: &str = "contacts.json";
const CALL_LOGS_FILE: &str = "call-logs.json";
const BLOCKED_FILE: &str = "blocked.json";

const DIAL_KEYS: &[char] = &['0', '1', '2', '3', '4', '5', '6', '7', '8', '9', '*', '#', '+'];

#[derive(Debug, Default)]
struct CallState {
    contacts: Vec<Contact>,
    /// Newest first
    call_logs: Vec<CallLog>,
    blocked: Vec<String>,
    staged: String,
    active: Option<ActiveCall>,
}

impl CallState {
    fn contact_by_number(&self, number: &str) -> Option<&Contact> {
        let digits = digits_of(number);
        if digits.is_empty() {
            return None;
        }
        self.contacts
            .iter()
            .find(|c| digits_of(&c.phone_number) == digits)
    }
}

/// In-process call control backed by the daemon's data directory
pub struct LocalCallControl {
    state: Mutex<CallState>,
    /// `None` keeps everything in memory
    dir: Option<PathBuf>,
}

impl LocalCallControl {
    /// Purely in-memory store
    pub fn in_memory() -> Self {
        Self {
            state: Mutex::new(CallState::default()),
            dir: None,
        }
    }

    /// Load stores from `dir`, treating missing files as empty
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, CallError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;

        let state = CallState {
            contacts: load_json(&dir.join(CONTACTS_FILE))?,
            call_logs: load_json(&dir.join(CALL_LOGS_FILE))?,
            blocked: load_json(&dir.join(BLOCKED_FILE))?,
            ..CallState::default()
        };

        info!(
            dir = %dir.display(),
            contacts = state.contacts.len(),
            call_logs = state.call_logs.len(),
            "call stores loaded"
        );

        Ok(Self {
            state: Mutex::new(state),
            dir: Some(dir),
        })
    }

    fn persist<T: Serialize>(&self, file: &str, value: &T) -> Result<(), CallError> {
        match &self.dir {
            Some(dir) => save_json(&dir.join(file), value),
            None => Ok(()),
        }
    }

    // -- contacts --

    pub fn contacts(&self) -> Vec<Contact> {
        self.state.lock().contacts.clone()
    }

    pub fn add_contact(&self, name: &str, phone_number: &str) -> Result<Contact, CallError> {
        let mut state = self.state.lock();
        if let Some(existing) = state.contact_by_number(phone_number) {
            return Err(CallError::ContactExists {
                number: phone_number.to_string(),
                name: existing.name.clone(),
            });
        }

        let contact = Contact {
            id: Uuid::new_v4().to_string(),
            name: name.trim().to_string(),
            phone_number: phone_number.trim().to_string(),
            favorite: false,
            last_called: None,
        };
        state.contacts.push(contact.clone());
        self.persist(CONTACTS_FILE, &state.contacts)?;

        info!(id = %contact.id, name = %contact.name, "contact added");
        Ok(contact)
    }

    pub fn update_contact(&self, contact: Contact) -> Result<(), CallError> {
        let mut state = self.state.lock();
        let slot = state
            .contacts
            .iter_mut()
            .find(|c| c.id == contact.id)
            .ok_or_else(|| CallError::ContactNotFound(contact.id.clone()))?;
        *slot = contact;
        self.persist(CONTACTS_FILE, &state.contacts)
    }

    pub fn delete_contact(&self, id: &str) -> Result<(), CallError> {
        let mut state = self.state.lock();
        let before = state.contacts.len();
        state.contacts.retain(|c| c.id != id);
        if state.contacts.len() == before {
            return Err(CallError::ContactNotFound(id.to_string()));
        }
        self.persist(CONTACTS_FILE, &state.contacts)
    }

    pub fn toggle_favorite(&self, id: &str) -> Result<bool, CallError> {
        let mut state = self.state.lock();
        let contact = state
            .contacts
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| CallError::ContactNotFound(id.to_string()))?;
        contact.favorite = !contact.favorite;
        let favorite = contact.favorite;
        self.persist(CONTACTS_FILE, &state.contacts)?;
        Ok(favorite)
    }

    // -- call history --

    pub fn call_logs(&self) -> Vec<CallLog> {
        self.state.lock().call_logs.clone()
    }

    pub fn delete_call_log(&self, id: &str) -> Result<(), CallError> {
        let mut state = self.state.lock();
        let before = state.call_logs.len();
        state.call_logs.retain(|log| log.id != id);
        if state.call_logs.len() == before {
            return Err(CallError::CallLogNotFound(id.to_string()));
        }
        self.persist(CALL_LOGS_FILE, &state.call_logs)
    }

    pub fn clear_call_logs(&self) -> Result<(), CallError> {
        let mut state = self.state.lock();
        state.call_logs.clear();
        self.persist(CALL_LOGS_FILE, &state.call_logs)
    }

    // -- dial pad --

    /// Append a dial-pad key to the staged number
    pub fn press_key(&self, key: char) -> Result<String, CallError> {
        if !DIAL_KEYS.contains(&key) {
            return Err(CallError::InvalidKey(key));
        }
        let mut state = self.state.lock();
        state.staged.push(key);
        Ok(state.staged.clone())
    }

    pub fn blocked(&self) -> Vec<String> {
        self.state.lock().blocked.clone()
    }
}

impl CallContext for LocalCallControl {
    fn staged_number(&self) -> String {
        self.state.lock().staged.clone()
    }

    fn most_recent_call(&self) -> Option<CallLog> {
        self.state.lock().call_logs.first().cloned()
    }

    fn find_contact_by_name(&self, fragment: &str) -> Option<Contact> {
        let needle = fragment.trim().to_lowercase();
        if needle.is_empty() {
            return None;
        }
        self.state
            .lock()
            .contacts
            .iter()
            .find(|c| c.name.to_lowercase().contains(&needle))
            .cloned()
    }

    fn active_call(&self) -> Option<ActiveCall> {
        self.state.lock().active.clone()
    }
}

impl CallControl for LocalCallControl {
    fn dial(&self, number: &str) -> Result<ActiveCall, CallError> {
        let number = number.trim();
        if number.is_empty() {
            return Err(CallError::NothingToDial);
        }

        let mut state = self.state.lock();
        if let Some(active) = &state.active {
            return Err(CallError::CallInProgress(active.number.clone()));
        }

        let now = Utc::now();
        let contact = state.contact_by_number(number).cloned();
        let log = CallLog {
            id: Uuid::new_v4().to_string(),
            contact_id: contact.as_ref().map(|c| c.id.clone()),
            name: contact.as_ref().map(|c| c.name.clone()),
            phone_number: number.to_string(),
            timestamp: now,
            duration: 0,
            direction: CallDirection::Outgoing,
        };

        let call = ActiveCall {
            log_id: log.id.clone(),
            number: number.to_string(),
            name: log.name.clone(),
            started_at: now,
        };

        state.call_logs.insert(0, log);
        state.active = Some(call.clone());
        self.persist(CALL_LOGS_FILE, &state.call_logs)?;

        if let Some(contact) = contact {
            if let Some(c) = state.contacts.iter_mut().find(|c| c.id == contact.id) {
                c.last_called = Some(now);
            }
            self.persist(CONTACTS_FILE, &state.contacts)?;
        }

        info!(number = %call.number, name = ?call.name, "call started");
        Ok(call)
    }

    fn hangup(&self) -> Result<CallLog, CallError> {
        let mut state = self.state.lock();
        let call = state.active.take().ok_or(CallError::NoActiveCall)?;
        let duration = (Utc::now() - call.started_at).num_seconds().max(0) as u64;

        let existing = state.call_logs.iter().position(|log| log.id == call.log_id);
        let log = match existing {
            Some(index) => {
                state.call_logs[index].duration = duration;
                state.call_logs[index].clone()
            }
            None => {
                // history was cleared mid-call; record the call again
                let log = CallLog {
                    id: call.log_id.clone(),
                    contact_id: None,
                    name: call.name.clone(),
                    phone_number: call.number.clone(),
                    timestamp: call.started_at,
                    duration,
                    direction: CallDirection::Outgoing,
                };
                state.call_logs.insert(0, log.clone());
                log
            }
        };
        self.persist(CALL_LOGS_FILE, &state.call_logs)?;

        info!(number = %call.number, duration_secs = duration, "call ended");
        Ok(log)
    }

    fn save_contact(&self, number: &str, suggested_name: &str) -> Result<Contact, CallError> {
        let name = if suggested_name.trim().is_empty() {
            format!("Contact {}", number)
        } else {
            suggested_name.to_string()
        };
        self.add_contact(&name, number)
    }

    fn delete_last_digit(&self) -> String {
        let mut state = self.state.lock();
        state.staged.pop();
        debug!(staged = %state.staged, "digit deleted");
        state.staged.clone()
    }

    fn clear_number(&self) {
        self.state.lock().staged.clear();
    }

    fn block(&self, number: Option<&str>) -> Result<(), CallError> {
        let number = number
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .ok_or(CallError::NothingToBlock)?;

        let mut state = self.state.lock();
        let digits = digits_of(number);
        if state.blocked.iter().any(|b| digits_of(b) == digits) {
            debug!(%number, "number already blocked");
            return Ok(());
        }
        state.blocked.push(number.to_string());
        self.persist(BLOCKED_FILE, &state.blocked)?;

        info!(%number, "number blocked");
        Ok(())
    }
}

fn load_json<T: DeserializeOwned + Default>(path: &Path) -> Result<T, CallError> {
    match std::fs::read_to_string(path) {
        Ok(data) => match serde_json::from_str(&data) {
            Ok(value) => Ok(value),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "unreadable store, starting empty");
                Ok(T::default())
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(T::default()),
        Err(e) => Err(e.into()),
    }
}

/// Write via a temp file and rename so a crash never leaves half a store
fn save_json<T: Serialize>(path: &Path, value: &T) -> Result<(), CallError> {
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, serde_json::to_vec_pretty(value)?)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}
