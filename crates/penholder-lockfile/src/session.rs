//! Write-token operations against the shared lock file.

use penholder_proto::Username;

use crate::{error::LockError, record::LockRecord, store::LockFile};

/// One user's handle on the shared lock.
///
/// Every operation is a read-modify-write of the whole file. The returned
/// record is what this process wrote.
#[derive(Debug, Clone)]
pub struct LockSession {
    file: LockFile,
    me: Username,
}

impl LockSession {
    /// Act on `file` as `me`.
    pub fn new(file: LockFile, me: Username) -> Self {
        Self { file, me }
    }

    /// Local user.
    pub fn username(&self) -> &Username {
        &self.me
    }

    /// Underlying file.
    pub fn file(&self) -> &LockFile {
        &self.file
    }

    /// Current record, if any.
    pub fn current(&self) -> Result<Option<LockRecord>, LockError> {
        self.file.load()
    }

    /// Whether the local user holds the lock right now.
    pub fn holds_lock(&self) -> Result<bool, LockError> {
        Ok(self.file.load()?.is_some_and(|record| record.is_owner(&self.me)))
    }

    /// Register as a user. The first user to join takes the lock.
    pub fn join(&self) -> Result<LockRecord, LockError> {
        let record = match self.file.load()? {
            Some(mut record) => {
                record.users.insert(self.me.clone());
                record
            },
            None => LockRecord::founded_by(self.me.clone()),
        };

        self.file.store(&record)?;
        tracing::info!(username = %self.me, owner = %record.owner, "joined lock");
        Ok(record)
    }

    /// Queue a request for the lock.
    pub fn request(&self) -> Result<LockRecord, LockError> {
        let mut record = self.member_record()?;
        if record.is_owner(&self.me) {
            return Err(LockError::AlreadyOwner);
        }

        record.push_request(&self.me);
        self.file.store(&record)?;
        Ok(record)
    }

    /// Hand the lock to another member.
    pub fn give(&self, target: &Username) -> Result<LockRecord, LockError> {
        let mut record = self.member_record()?;
        if !record.is_owner(&self.me) {
            return Err(LockError::NotOwner { owner: record.owner });
        }
        if *target == self.me || !record.users.contains(target) {
            return Err(LockError::InvalidTarget { username: target.clone() });
        }

        record.owner = target.clone();
        record.drop_request(target);
        self.file.store(&record)?;
        tracing::info!(from = %self.me, to = %target, "lock given");
        Ok(record)
    }

    /// Drop a pending request without handing over the lock.
    pub fn decline(&self, requester: &Username) -> Result<LockRecord, LockError> {
        let mut record = self.member_record()?;
        if !record.is_owner(&self.me) {
            return Err(LockError::NotOwner { owner: record.owner });
        }
        if !record.requests.contains(requester) {
            return Err(LockError::InvalidTarget { username: requester.clone() });
        }

        record.drop_request(requester);
        self.file.store(&record)?;
        Ok(record)
    }

    /// Take the lock without the owner's consent.
    pub fn take(&self) -> Result<LockRecord, LockError> {
        let mut record = self.member_record()?;
        if record.is_owner(&self.me) {
            return Err(LockError::AlreadyOwner);
        }

        let previous = std::mem::replace(&mut record.owner, self.me.clone());
        record.drop_request(&self.me);
        self.file.store(&record)?;
        tracing::info!(from = %previous, to = %self.me, "lock taken");
        Ok(record)
    }

    /// Deregister. An owner's lock passes to the oldest requester, then to
    /// any remaining user. The last user out deletes the file.
    pub fn leave(&self) -> Result<Option<LockRecord>, LockError> {
        let mut record = self.member_record()?;

        record.users.remove(&self.me);
        record.drop_request(&self.me);

        if record.is_owner(&self.me) {
            let heir = record.requests.first().cloned().or_else(|| record.users.first().cloned());
            match heir {
                Some(heir) => {
                    record.drop_request(&heir);
                    record.owner = heir;
                },
                None => {
                    self.file.remove()?;
                    tracing::info!(username = %self.me, "last user left, lock removed");
                    return Ok(None);
                },
            }
        }

        self.file.store(&record)?;
        Ok(Some(record))
    }

    fn member_record(&self) -> Result<LockRecord, LockError> {
        let record = self.file.load()?.ok_or(LockError::NoLock)?;
        if !record.users.contains(&self.me) {
            return Err(LockError::NotMember { username: self.me.clone() });
        }
        Ok(record)
    }
}
