//! Log replay.

use crate::error::CoreResult;
use crate::zil::record::{
    AclRecord, CreateRecord, LinkRecord, LogRecord, RecordBody, RemoveRecord, RenameRecord,
    SetAttrRecord, SymlinkRecord, TruncateRecord, WriteRecord,
};

/// Applies logged operations during [`crate::IntentLog::replay`].
///
/// Every method defaults to doing nothing, so a handler only implements
/// the kinds it cares about. Logging is suppressed while a handler runs;
/// handlers typically apply each record under a transaction from
/// [`crate::TransactionManager::begin_replay`].
pub trait ReplayHandler {
    /// Replays a create.
    fn create(&mut self, _record: &CreateRecord) -> CoreResult<()> {
        Ok(())
    }

    /// Replays a remove.
    fn remove(&mut self, _record: &RemoveRecord) -> CoreResult<()> {
        Ok(())
    }

    /// Replays a hard link.
    fn link(&mut self, _record: &LinkRecord) -> CoreResult<()> {
        Ok(())
    }

    /// Replays a symbolic link.
    fn symlink(&mut self, _record: &SymlinkRecord) -> CoreResult<()> {
        Ok(())
    }

    /// Replays a rename.
    fn rename(&mut self, _record: &RenameRecord) -> CoreResult<()> {
        Ok(())
    }

    /// Replays a write. Inline records carry the data; indirect records
    /// name the block that already holds it.
    fn write(&mut self, _record: &WriteRecord) -> CoreResult<()> {
        Ok(())
    }

    /// Replays a truncate.
    fn truncate(&mut self, _record: &TruncateRecord) -> CoreResult<()> {
        Ok(())
    }

    /// Replays an attribute change.
    fn setattr(&mut self, _record: &SetAttrRecord) -> CoreResult<()> {
        Ok(())
    }

    /// Replays an access control list change.
    fn acl(&mut self, _record: &AclRecord) -> CoreResult<()> {
        Ok(())
    }

    /// Dispatches one record to the method for its kind.
    ///
    /// # Errors
    ///
    /// Returns the handler's error, which stops replay.
    fn replay(&mut self, record: &LogRecord) -> CoreResult<()> {
        match record.body() {
            RecordBody::Create(r) => self.create(r),
            RecordBody::Remove(r) => self.remove(r),
            RecordBody::Link(r) => self.link(r),
            RecordBody::Symlink(r) => self.symlink(r),
            RecordBody::Rename(r) => self.rename(r),
            RecordBody::Write(r) => self.write(r),
            RecordBody::Truncate(r) => self.truncate(r),
            RecordBody::SetAttr(r) => self.setattr(r),
            RecordBody::Acl(r) => self.acl(r),
            RecordBody::Commit(_) => Ok(()),
        }
    }
}

/// What a replay did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    /// Records handed to the handler.
    pub replayed: u64,
    /// Records skipped because their group had already synced.
    pub skipped: u64,
    /// Log blocks read.
    pub blocks: u64,
}
