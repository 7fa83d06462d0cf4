//! Log record types and serialization.

use crate::error::{CoreError, CoreResult};
use crate::object::BlockPointer;
use crate::types::{LogSeq, ObjectId, TxgId};
use crate::zil::commit::CommitWaiter;
use bytes::Bytes;
use std::sync::Arc;

/// Encoded size of the header in front of every record payload.
///
/// txtype (1) + flags (1) + reserved (2) + payload length (4) + txg (8) + seq (8)
pub const RECORD_HEADER_SIZE: usize = 24;

/// Encoded size of a write record without its data.
///
/// header (24) + object (8) + offset (8) + length (8) + birth (8) + allocated (8)
pub const WRITE_RECORD_HEADER_SIZE: usize = RECORD_HEADER_SIZE + 40;

/// Record flag: the record was logged synchronously.
const FLAG_SYNC: u8 = 0x01;

/// Completion callback of a record, run once when the record is destroyed.
pub type RecordCallback = Box<dyn FnOnce() + Send>;

/// Kind of a log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TxType {
    /// Commit marker; never written to a log block.
    Commit = 0,
    /// Create a file.
    Create = 1,
    /// Create a directory.
    Mkdir = 2,
    /// Create an extended attribute directory.
    MkXattr = 3,
    /// Create a symbolic link.
    Symlink = 4,
    /// Remove a file.
    Remove = 5,
    /// Remove a directory.
    Rmdir = 6,
    /// Add a hard link.
    Link = 7,
    /// Rename an entry.
    Rename = 8,
    /// Write data.
    Write = 9,
    /// Free a range of data.
    Truncate = 10,
    /// Change attributes.
    SetAttr = 11,
    /// Replace the access control list.
    Acl = 13,
}

impl TxType {
    /// Converts a byte to a record kind.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(Self::Commit),
            1 => Some(Self::Create),
            2 => Some(Self::Mkdir),
            3 => Some(Self::MkXattr),
            4 => Some(Self::Symlink),
            5 => Some(Self::Remove),
            6 => Some(Self::Rmdir),
            7 => Some(Self::Link),
            8 => Some(Self::Rename),
            9 => Some(Self::Write),
            10 => Some(Self::Truncate),
            11 => Some(Self::SetAttr),
            13 => Some(Self::Acl),
            _ => None,
        }
    }

    /// Converts the record kind to a byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }

    /// Kinds that only need ordering against other records of the same
    /// object and can wait on the per-object async lists.
    #[must_use]
    pub const fn is_out_of_order(self) -> bool {
        matches!(self, Self::Write | Self::Truncate | Self::SetAttr | Self::Acl)
    }
}

/// Where the payload of a write record comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteState {
    /// The data is embedded in the record.
    Copied,
    /// The data is read from the object store when the record is written.
    NeedCopy,
    /// The record points at a data block written directly by the store.
    Indirect,
}

/// What kind of object a create record makes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateKind {
    /// A regular file.
    File,
    /// A directory.
    Directory,
    /// An extended attribute directory.
    XattrDir,
}

/// A created object and its directory entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateRecord {
    /// What was created.
    pub kind: CreateKind,
    /// Directory holding the new entry.
    pub parent: ObjectId,
    /// The new object.
    pub object: ObjectId,
    /// Permission bits and type.
    pub mode: u64,
    /// Entry name.
    pub name: String,
    /// Initial access control list.
    pub acl: Option<Vec<u8>>,
}

/// A removed directory entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoveRecord {
    /// Whether a directory was removed.
    pub directory: bool,
    /// Directory holding the entry.
    pub parent: ObjectId,
    /// Entry name.
    pub name: String,
}

/// A new hard link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkRecord {
    /// Directory receiving the entry.
    pub parent: ObjectId,
    /// Linked object.
    pub object: ObjectId,
    /// Entry name.
    pub name: String,
}

/// A new symbolic link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymlinkRecord {
    /// Directory receiving the entry.
    pub parent: ObjectId,
    /// The link object.
    pub object: ObjectId,
    /// Permission bits and type.
    pub mode: u64,
    /// Entry name.
    pub name: String,
    /// Link target.
    pub target: String,
}

/// A renamed entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenameRecord {
    /// The object being renamed.
    pub object: ObjectId,
    /// Source directory.
    pub src_parent: ObjectId,
    /// Source name.
    pub src_name: String,
    /// Target directory.
    pub dst_parent: ObjectId,
    /// Target name.
    pub dst_name: String,
}

/// A data write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRecord {
    /// Written object.
    pub object: ObjectId,
    /// Byte offset of the write.
    pub offset: u64,
    /// Length of the write.
    pub length: u64,
    /// Source of the payload.
    pub state: WriteState,
    /// Inline payload, present for [`WriteState::Copied`].
    pub data: Option<Bytes>,
    /// Block holding the data, present for [`WriteState::Indirect`] once written.
    pub block: Option<BlockPointer>,
}

/// A freed range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TruncateRecord {
    /// Truncated object.
    pub object: ObjectId,
    /// Start of the range.
    pub offset: u64,
    /// Length of the range.
    pub length: u64,
}

/// Changed attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetAttrRecord {
    /// Changed object.
    pub object: ObjectId,
    /// Which of the fields below apply.
    pub mask: u32,
    /// Permission bits.
    pub mode: u64,
    /// Owner.
    pub uid: u64,
    /// Group.
    pub gid: u64,
    /// File size.
    pub size: u64,
    /// Access time in nanoseconds.
    pub atime: u64,
    /// Modification time in nanoseconds.
    pub mtime: u64,
}

/// A replaced access control list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AclRecord {
    /// Changed object.
    pub object: ObjectId,
    /// Encoded list.
    pub acl: Vec<u8>,
}

/// Payload of a log record.
#[derive(Debug)]
pub enum RecordBody {
    /// See [`CreateRecord`].
    Create(CreateRecord),
    /// See [`RemoveRecord`].
    Remove(RemoveRecord),
    /// See [`LinkRecord`].
    Link(LinkRecord),
    /// See [`SymlinkRecord`].
    Symlink(SymlinkRecord),
    /// See [`RenameRecord`].
    Rename(RenameRecord),
    /// See [`WriteRecord`].
    Write(WriteRecord),
    /// See [`TruncateRecord`].
    Truncate(TruncateRecord),
    /// See [`SetAttrRecord`].
    SetAttr(SetAttrRecord),
    /// See [`AclRecord`].
    Acl(AclRecord),
    /// A commit waiter parked in the chain.
    Commit(Option<Arc<CommitWaiter>>),
}

impl PartialEq for RecordBody {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Create(a), Self::Create(b)) => a == b,
            (Self::Remove(a), Self::Remove(b)) => a == b,
            (Self::Link(a), Self::Link(b)) => a == b,
            (Self::Symlink(a), Self::Symlink(b)) => a == b,
            (Self::Rename(a), Self::Rename(b)) => a == b,
            (Self::Write(a), Self::Write(b)) => a == b,
            (Self::Truncate(a), Self::Truncate(b)) => a == b,
            (Self::SetAttr(a), Self::SetAttr(b)) => a == b,
            (Self::Acl(a), Self::Acl(b)) => a == b,
            (Self::Commit(_), Self::Commit(_)) => true,
            _ => false,
        }
    }
}

impl RecordBody {
    /// Returns the record kind.
    #[must_use]
    pub fn tx_type(&self) -> TxType {
        match self {
            Self::Create(r) => match r.kind {
                CreateKind::File => TxType::Create,
                CreateKind::Directory => TxType::Mkdir,
                CreateKind::XattrDir => TxType::MkXattr,
            },
            Self::Remove(r) if r.directory => TxType::Rmdir,
            Self::Remove(_) => TxType::Remove,
            Self::Link(_) => TxType::Link,
            Self::Symlink(_) => TxType::Symlink,
            Self::Rename(_) => TxType::Rename,
            Self::Write(_) => TxType::Write,
            Self::Truncate(_) => TxType::Truncate,
            Self::SetAttr(_) => TxType::SetAttr,
            Self::Acl(_) => TxType::Acl,
            Self::Commit(_) => TxType::Commit,
        }
    }

    /// The object whose async list an out-of-order record joins, or the
    /// renamed object for renames.
    #[must_use]
    pub fn object(&self) -> Option<ObjectId> {
        match self {
            Self::Create(r) => Some(r.object),
            Self::Link(r) => Some(r.object),
            Self::Symlink(r) => Some(r.object),
            Self::Rename(r) => Some(r.object),
            Self::Write(r) => Some(r.object),
            Self::Truncate(r) => Some(r.object),
            Self::SetAttr(r) => Some(r.object),
            Self::Acl(r) => Some(r.object),
            Self::Remove(_) | Self::Commit(_) => None,
        }
    }
}

/// One logged operation (an itx).
///
/// A record is owned by the log chain from assignment until it is written
/// to a log block, cleaned because its group synced, or discarded. Its
/// completion callback runs exactly once when the record is dropped.
pub struct LogRecord {
    body: RecordBody,
    txg: TxgId,
    seq: LogSeq,
    sync: bool,
    callback: Option<RecordCallback>,
}

impl LogRecord {
    /// Creates an unassigned record.
    #[must_use]
    pub fn new(body: RecordBody) -> Self {
        Self {
            body,
            txg: TxgId::NONE,
            seq: LogSeq::default(),
            sync: true,
            callback: None,
        }
    }

    /// Sets whether the record must be written by the next commit of any
    /// object rather than only by a commit of its own object.
    #[must_use]
    pub fn with_sync(mut self, sync: bool) -> Self {
        self.sync = sync;
        self
    }

    /// Sets the completion callback.
    #[must_use]
    pub fn with_callback(mut self, callback: RecordCallback) -> Self {
        self.callback = Some(callback);
        self
    }

    /// The payload.
    #[must_use]
    pub fn body(&self) -> &RecordBody {
        &self.body
    }

    pub(crate) fn body_mut(&mut self) -> &mut RecordBody {
        &mut self.body
    }

    /// The record kind.
    #[must_use]
    pub fn tx_type(&self) -> TxType {
        self.body.tx_type()
    }

    /// Group the record was assigned to.
    #[must_use]
    pub fn txg(&self) -> TxgId {
        self.txg
    }

    pub(crate) fn set_txg(&mut self, txg: TxgId) {
        self.txg = txg;
    }

    /// Sequence number in the log, set when the record is written.
    #[must_use]
    pub fn seq(&self) -> LogSeq {
        self.seq
    }

    pub(crate) fn set_seq(&mut self, seq: LogSeq) {
        self.seq = seq;
    }

    /// Whether the record goes to the synchronous list.
    #[must_use]
    pub fn is_sync(&self) -> bool {
        self.sync
    }

    pub(crate) fn set_sync(&mut self, sync: bool) {
        self.sync = sync;
    }

    /// Encoded size of the record inside a log block.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        RECORD_HEADER_SIZE + self.payload_len()
    }

    fn payload_len(&self) -> usize {
        let string = |s: &str| 2 + s.len();
        match &self.body {
            RecordBody::Create(r) => {
                8 + 8 + 8 + 1 + string(&r.name) + 1 + r.acl.as_ref().map_or(0, |a| 4 + a.len())
            }
            RecordBody::Remove(r) => 8 + string(&r.name),
            RecordBody::Link(r) => 8 + 8 + string(&r.name),
            RecordBody::Symlink(r) => 8 + 8 + 8 + string(&r.name) + string(&r.target),
            RecordBody::Rename(r) => 8 + 8 + 8 + string(&r.src_name) + string(&r.dst_name),
            RecordBody::Write(r) => {
                WRITE_RECORD_HEADER_SIZE - RECORD_HEADER_SIZE + r.data.as_ref().map_or(0, Bytes::len)
            }
            RecordBody::Truncate(_) => 24,
            RecordBody::SetAttr(_) => 8 + 4 + 8 * 6,
            RecordBody::Acl(r) => 8 + 4 + r.acl.len(),
            RecordBody::Commit(_) => 0,
        }
    }

    /// Appends the encoded record to `buf`.
    ///
    /// # Errors
    ///
    /// Returns an error for commit markers and for write records whose
    /// payload has not been resolved yet.
    pub fn encode_into(&self, buf: &mut Vec<u8>) -> CoreResult<()> {
        if matches!(self.body, RecordBody::Commit(_)) {
            return Err(CoreError::invalid_operation(
                "commit markers are not written to the log",
            ));
        }
        if let RecordBody::Write(r) = &self.body {
            write_location(r)?;
        }
        let payload_len = u32::try_from(self.payload_len())
            .map_err(|_| CoreError::invalid_operation("log record payload too large"))?;
        buf.push(self.tx_type().as_byte());
        buf.push(if self.sync { FLAG_SYNC } else { 0 });
        buf.extend_from_slice(&[0, 0]);
        buf.extend_from_slice(&payload_len.to_le_bytes());
        buf.extend_from_slice(&self.txg.as_u64().to_le_bytes());
        buf.extend_from_slice(&self.seq.as_u64().to_le_bytes());

        let put_u64 = |buf: &mut Vec<u8>, v: u64| buf.extend_from_slice(&v.to_le_bytes());
        let put_str = |buf: &mut Vec<u8>, s: &str| -> CoreResult<()> {
            let len = u16::try_from(s.len())
                .map_err(|_| CoreError::invalid_operation("log record name too long"))?;
            buf.extend_from_slice(&len.to_le_bytes());
            buf.extend_from_slice(s.as_bytes());
            Ok(())
        };
        let put_blob = |buf: &mut Vec<u8>, b: &[u8]| -> CoreResult<()> {
            let len = u32::try_from(b.len())
                .map_err(|_| CoreError::invalid_operation("log record blob too large"))?;
            buf.extend_from_slice(&len.to_le_bytes());
            buf.extend_from_slice(b);
            Ok(())
        };

        match &self.body {
            RecordBody::Create(r) => {
                put_u64(buf, r.parent.as_u64());
                put_u64(buf, r.object.as_u64());
                put_u64(buf, r.mode);
                buf.push(match r.kind {
                    CreateKind::File => 0,
                    CreateKind::Directory => 1,
                    CreateKind::XattrDir => 2,
                });
                put_str(buf, &r.name)?;
                match &r.acl {
                    Some(acl) => {
                        buf.push(1);
                        put_blob(buf, acl)?;
                    }
                    None => buf.push(0),
                }
            }
            RecordBody::Remove(r) => {
                put_u64(buf, r.parent.as_u64());
                put_str(buf, &r.name)?;
            }
            RecordBody::Link(r) => {
                put_u64(buf, r.parent.as_u64());
                put_u64(buf, r.object.as_u64());
                put_str(buf, &r.name)?;
            }
            RecordBody::Symlink(r) => {
                put_u64(buf, r.parent.as_u64());
                put_u64(buf, r.object.as_u64());
                put_u64(buf, r.mode);
                put_str(buf, &r.name)?;
                put_str(buf, &r.target)?;
            }
            RecordBody::Rename(r) => {
                put_u64(buf, r.object.as_u64());
                put_u64(buf, r.src_parent.as_u64());
                put_u64(buf, r.dst_parent.as_u64());
                put_str(buf, &r.src_name)?;
                put_str(buf, &r.dst_name)?;
            }
            RecordBody::Write(r) => {
                let (birth, allocated) = write_location(r)?;
                put_u64(buf, r.object.as_u64());
                put_u64(buf, r.offset);
                put_u64(buf, r.length);
                put_u64(buf, birth);
                put_u64(buf, allocated);
                if let Some(data) = &r.data {
                    buf.extend_from_slice(data);
                }
            }
            RecordBody::Truncate(r) => {
                put_u64(buf, r.object.as_u64());
                put_u64(buf, r.offset);
                put_u64(buf, r.length);
            }
            RecordBody::SetAttr(r) => {
                put_u64(buf, r.object.as_u64());
                buf.extend_from_slice(&r.mask.to_le_bytes());
                for v in [r.mode, r.uid, r.gid, r.size, r.atime, r.mtime] {
                    put_u64(buf, v);
                }
            }
            RecordBody::Acl(r) => {
                put_u64(buf, r.object.as_u64());
                put_blob(buf, &r.acl)?;
            }
            RecordBody::Commit(_) => {}
        }
        Ok(())
    }

    /// Decodes one record from the front of `data`, returning it and the
    /// number of bytes consumed.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::LogCorrupted`] if the bytes are not a valid record.
    pub fn decode(data: &[u8]) -> CoreResult<(Self, usize)> {
        if data.len() < RECORD_HEADER_SIZE {
            return Err(CoreError::log_corrupted("truncated record header"));
        }
        let tx_type = TxType::from_byte(data[0])
            .ok_or_else(|| CoreError::log_corrupted(format!("unknown record type {}", data[0])))?;
        let sync = data[1] & FLAG_SYNC != 0;
        let mut header = Reader::new(&data[4..RECORD_HEADER_SIZE]);
        let payload_len = header.u32()? as usize;
        let txg = TxgId::new(header.u64()?);
        let seq = LogSeq::new(header.u64()?);

        let end = RECORD_HEADER_SIZE
            .checked_add(payload_len)
            .filter(|end| *end <= data.len())
            .ok_or_else(|| CoreError::log_corrupted("record payload past end of block"))?;
        let mut r = Reader::new(&data[RECORD_HEADER_SIZE..end]);

        let body = match tx_type {
            TxType::Create | TxType::Mkdir | TxType::MkXattr => {
                let parent = r.object()?;
                let object = r.object()?;
                let mode = r.u64()?;
                let kind = match r.u8()? {
                    0 => CreateKind::File,
                    1 => CreateKind::Directory,
                    2 => CreateKind::XattrDir,
                    other => {
                        return Err(CoreError::log_corrupted(format!("unknown create kind {other}")))
                    }
                };
                let name = r.string()?;
                let acl = match r.u8()? {
                    0 => None,
                    _ => Some(r.blob()?),
                };
                RecordBody::Create(CreateRecord {
                    kind,
                    parent,
                    object,
                    mode,
                    name,
                    acl,
                })
            }
            TxType::Remove | TxType::Rmdir => RecordBody::Remove(RemoveRecord {
                directory: tx_type == TxType::Rmdir,
                parent: r.object()?,
                name: r.string()?,
            }),
            TxType::Link => RecordBody::Link(LinkRecord {
                parent: r.object()?,
                object: r.object()?,
                name: r.string()?,
            }),
            TxType::Symlink => RecordBody::Symlink(SymlinkRecord {
                parent: r.object()?,
                object: r.object()?,
                mode: r.u64()?,
                name: r.string()?,
                target: r.string()?,
            }),
            TxType::Rename => {
                let object = r.object()?;
                let src_parent = r.object()?;
                let dst_parent = r.object()?;
                RecordBody::Rename(RenameRecord {
                    object,
                    src_parent,
                    src_name: r.string()?,
                    dst_parent,
                    dst_name: r.string()?,
                })
            }
            TxType::Write => {
                let object = r.object()?;
                let offset = r.u64()?;
                let length = r.u64()?;
                let birth = r.u64()?;
                let allocated_size = r.u64()?;
                let rest = r.rest();
                if birth == 0 {
                    if rest.len() as u64 != length {
                        return Err(CoreError::log_corrupted(format!(
                            "write record declares {length} bytes but carries {}",
                            rest.len()
                        )));
                    }
                    RecordBody::Write(WriteRecord {
                        object,
                        offset,
                        length,
                        state: WriteState::Copied,
                        data: Some(Bytes::copy_from_slice(rest)),
                        block: None,
                    })
                } else {
                    RecordBody::Write(WriteRecord {
                        object,
                        offset,
                        length,
                        state: WriteState::Indirect,
                        data: None,
                        block: Some(BlockPointer {
                            birth: TxgId::new(birth),
                            allocated_size,
                        }),
                    })
                }
            }
            TxType::Truncate => RecordBody::Truncate(TruncateRecord {
                object: r.object()?,
                offset: r.u64()?,
                length: r.u64()?,
            }),
            TxType::SetAttr => RecordBody::SetAttr(SetAttrRecord {
                object: r.object()?,
                mask: r.u32()?,
                mode: r.u64()?,
                uid: r.u64()?,
                gid: r.u64()?,
                size: r.u64()?,
                atime: r.u64()?,
                mtime: r.u64()?,
            }),
            TxType::Acl => RecordBody::Acl(AclRecord {
                object: r.object()?,
                acl: r.blob()?,
            }),
            TxType::Commit => return Err(CoreError::log_corrupted("commit marker in log block")),
        };
        if !r.is_empty() && tx_type != TxType::Write {
            return Err(CoreError::log_corrupted(format!(
                "trailing bytes in {tx_type:?} record"
            )));
        }

        let record = Self {
            body,
            txg,
            seq,
            sync,
            callback: None,
        };
        Ok((record, end))
    }
}

/// Birth and size stored in an encoded write record; zero birth means the
/// data follows inline.
fn write_location(r: &WriteRecord) -> CoreResult<(u64, u64)> {
    match (r.state, &r.data, r.block) {
        (WriteState::Copied, Some(data), _) if data.len() as u64 == r.length => Ok((0, 0)),
        (WriteState::Indirect, None, Some(bp)) => Ok((bp.birth.as_u64(), bp.allocated_size)),
        _ => Err(CoreError::invalid_operation(
            "write record payload not resolved",
        )),
    }
}

impl Drop for LogRecord {
    fn drop(&mut self) {
        if let RecordBody::Commit(Some(waiter)) = &self.body {
            // The marker's group synced before any writer reached it.
            waiter.complete_synced();
        }
        if let Some(callback) = self.callback.take() {
            callback();
        }
    }
}

impl std::fmt::Debug for LogRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogRecord")
            .field("type", &self.tx_type())
            .field("txg", &self.txg)
            .field("seq", &self.seq)
            .field("sync", &self.sync)
            .field("body", &self.body)
            .finish()
    }
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, n: usize) -> CoreResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| CoreError::log_corrupted("unexpected end of record"))?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> CoreResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> CoreResult<u16> {
        let mut bytes = [0u8; 2];
        bytes.copy_from_slice(self.take(2)?);
        Ok(u16::from_le_bytes(bytes))
    }

    fn u32(&mut self) -> CoreResult<u32> {
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(self.take(4)?);
        Ok(u32::from_le_bytes(bytes))
    }

    fn u64(&mut self) -> CoreResult<u64> {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(self.take(8)?);
        Ok(u64::from_le_bytes(bytes))
    }

    fn object(&mut self) -> CoreResult<ObjectId> {
        self.u64().map(ObjectId::new)
    }

    fn string(&mut self) -> CoreResult<String> {
        let len = self.u16()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| CoreError::log_corrupted("record name is not UTF-8"))
    }

    fn blob(&mut self) -> CoreResult<Vec<u8>> {
        let len = self.u32()? as usize;
        Ok(self.take(len)?.to_vec())
    }

    fn rest(&mut self) -> &'a [u8] {
        let rest = &self.data[self.pos..];
        self.pos = self.data.len();
        rest
    }

    fn is_empty(&self) -> bool {
        self.pos == self.data.len()
    }
}
