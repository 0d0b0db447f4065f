//! Name directory: maps each display name to the one session holding it.
use std::collections::HashMap;

use super::registry::SessionId;

/// Bounds on a chosen display name.
const MIN_NAME_LEN: usize = 3;
const MAX_NAME_LEN: usize = 20;

/// Why a rename was refused. The messages are shown to the user verbatim.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RenameError {
    #[error("Invalid username. Use 3-20 chars: letters, numbers, _ or -")]
    InvalidFormat,
    #[error("New username must be different from current username")]
    Unchanged,
    #[error("That username is already in use")]
    Conflict,
}

/// `^[A-Za-z0-9_-]{3,20}$`
pub fn is_valid_name(name: &str) -> bool {
    (MIN_NAME_LEN..=MAX_NAME_LEN).contains(&name.len())
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

/// Which session holds which name, plus the guest-name counter.
#[derive(Debug)]
pub struct NameDirectory {
    by_name: HashMap<String, SessionId>,
    /// Next guest sequence number. Only ever grows.
    next_guest: u64,
}

impl Default for NameDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl NameDirectory {
    pub fn new() -> Self {
        Self {
            by_name: HashMap::new(),
            next_guest: 1,
        }
    }

    /// Produce a `GuestN` name nobody currently holds.
    ///
    /// The counter is never rewound, so a released guest number is not handed
    /// out again. A user may have renamed themselves to a future `GuestN`;
    /// those numbers are skipped.
    pub fn allocate_guest_name(&mut self) -> String {
        loop {
            let name = format!("Guest{}", self.next_guest);
            self.next_guest += 1;
            if !self.is_taken(&name) {
                return name;
            }
        }
    }

    /// Record that `session` holds `name`. Returns false if the name was
    /// already held by someone.
    pub fn claim(&mut self, name: &str, session: SessionId) -> bool {
        if self.by_name.contains_key(name) {
            return false;
        }
        self.by_name.insert(name.to_owned(), session);
        true
    }

    /// Move the holder of `old` over to `new`.
    pub fn try_rename(&mut self, old: &str, new: &str) -> Result<(), RenameError> {
        if !is_valid_name(new) {
            return Err(RenameError::InvalidFormat);
        }
        if new == old {
            return Err(RenameError::Unchanged);
        }
        let owner = self.by_name.get(old).copied();
        match self.by_name.get(new) {
            Some(holder) if Some(*holder) != owner => return Err(RenameError::Conflict),
            _ => {}
        }
        // Renaming a name nobody holds would mint an orphan entry.
        let Some(owner) = owner else {
            return Err(RenameError::Conflict);
        };
        self.by_name.remove(old);
        self.by_name.insert(new.to_owned(), owner);
        Ok(())
    }

    /// Drop the mapping for `name`. Returns the previous holder, if any.
    pub fn release(&mut self, name: &str) -> Option<SessionId> {
        self.by_name.remove(name)
    }

    pub fn lookup(&self, name: &str) -> Option<SessionId> {
        self.by_name.get(name).copied()
    }

    pub fn is_taken(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// All held names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.by_name.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}
