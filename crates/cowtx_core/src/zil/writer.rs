//! Log block writer and reader.
//!
//! ## Block Format
//!
//! ```text
//! | magic (4) | version (2) | flags (2) | chain id (16) | block seq (8) |
//! | payload length (4) | record count (4) | max txg (8) | records (N) | crc32c (4) |
//! ```
//!
//! The checksum covers the header and the records. Blocks of one chain carry
//! the same chain id and consecutive block sequence numbers starting at 0.
//! Reading stops at the first block that is torn, belongs to another chain
//! or fails its checksum: that is the end of the chain.

use crate::error::{CoreError, CoreResult};
use crate::types::{LogSeq, TxgId};
use crate::zil::record::{LogRecord, RECORD_HEADER_SIZE};
use cowtx_storage::StorageBackend;
use tracing::{debug, trace};
use uuid::Uuid;

/// Magic bytes identifying a log block.
pub const LOG_MAGIC: [u8; 4] = *b"CTXL";

/// Current log block format version.
pub const LOG_VERSION: u16 = 1;

/// Size of the block header.
pub const BLOCK_HEADER_SIZE: usize = 48;

/// CRC size.
const CRC_SIZE: usize = 4;

/// Bytes of a log block not available to records.
pub const BLOCK_OVERHEAD: usize = BLOCK_HEADER_SIZE + CRC_SIZE;

/// Header of a decoded log block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    /// Chain the block belongs to.
    pub chain_id: Uuid,
    /// Position of the block in its chain.
    pub seq: u64,
    /// Bytes of encoded records.
    pub payload_len: u32,
    /// Number of records.
    pub record_count: u32,
    /// Highest group of any record in the block.
    pub max_txg: TxgId,
}

impl BlockHeader {
    fn encode(&self) -> [u8; BLOCK_HEADER_SIZE] {
        let mut buf = [0u8; BLOCK_HEADER_SIZE];
        buf[0..4].copy_from_slice(&LOG_MAGIC);
        buf[4..6].copy_from_slice(&LOG_VERSION.to_le_bytes());
        buf[8..24].copy_from_slice(self.chain_id.as_bytes());
        buf[24..32].copy_from_slice(&self.seq.to_le_bytes());
        buf[32..36].copy_from_slice(&self.payload_len.to_le_bytes());
        buf[36..40].copy_from_slice(&self.record_count.to_le_bytes());
        buf[40..48].copy_from_slice(&self.max_txg.as_u64().to_le_bytes());
        buf
    }

    fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < BLOCK_HEADER_SIZE || buf[0..4] != LOG_MAGIC {
            return None;
        }
        if u16::from_le_bytes([buf[4], buf[5]]) != LOG_VERSION {
            return None;
        }
        let u32_at = |at: usize| u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]]);
        let u64_at = |at: usize| {
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(&buf[at..at + 8]);
            u64::from_le_bytes(bytes)
        };
        let mut chain = [0u8; 16];
        chain.copy_from_slice(&buf[8..24]);
        Some(Self {
            chain_id: Uuid::from_bytes(chain),
            seq: u64_at(24),
            payload_len: u32_at(32),
            record_count: u32_at(36),
            max_txg: TxgId::new(u64_at(40)),
        })
    }
}

/// A decoded log block.
#[derive(Debug)]
pub struct LogBlock {
    /// The block header.
    pub header: BlockHeader,
    /// Offset of the block on the device.
    pub offset: u64,
    /// Records in write order.
    pub records: Vec<LogRecord>,
}

/// Records being gathered into the next log block.
#[derive(Debug)]
pub(crate) struct BlockBuilder {
    payload: Vec<u8>,
    count: u32,
    max_txg: TxgId,
    capacity: usize,
}

impl BlockBuilder {
    pub(crate) fn new(block_size: usize) -> Self {
        Self {
            payload: Vec::new(),
            count: 0,
            max_txg: TxgId::NONE,
            capacity: block_size.saturating_sub(BLOCK_OVERHEAD),
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Whether `record` fits next to what is already gathered. An empty
    /// block takes any record.
    pub(crate) fn fits(&self, record: &LogRecord) -> bool {
        self.is_empty() || self.payload.len() + record.encoded_len() <= self.capacity
    }

    pub(crate) fn push(&mut self, record: &LogRecord) -> CoreResult<()> {
        record.encode_into(&mut self.payload)?;
        self.count += 1;
        self.max_txg = self.max_txg.max(record.txg());
        Ok(())
    }
}

/// Owns the log device and the position of the chain on it.
pub(crate) struct LogWriter {
    device: Box<dyn StorageBackend>,
    chain_id: Uuid,
    next_block: u64,
    next_seq: LogSeq,
    max_txg: TxgId,
}

impl LogWriter {
    /// Opens the chain on `device`, cutting off anything after its end.
    pub(crate) fn open(mut device: Box<dyn StorageBackend>) -> CoreResult<Self> {
        let blocks = read_chain(device.as_ref())?;
        let end = blocks.last().map_or(0, |b| {
            b.offset + (BLOCK_OVERHEAD + b.header.payload_len as usize) as u64
        });
        if device.size()? > end {
            debug!(target: "cowtx::zil", end, "discarding log tail");
            device.truncate(end)?;
            device.sync()?;
        }

        let chain_id = blocks.first().map_or_else(Uuid::new_v4, |b| b.header.chain_id);
        let next_block = blocks.last().map_or(0, |b| b.header.seq + 1);
        let max_txg = blocks
            .iter()
            .map(|b| b.header.max_txg)
            .max()
            .unwrap_or(TxgId::NONE);
        let next_seq = blocks
            .iter()
            .flat_map(|b| b.records.iter())
            .map(LogRecord::seq)
            .max()
            .map_or(LogSeq::new(1), LogSeq::next);

        Ok(Self {
            device,
            chain_id,
            next_block,
            next_seq,
            max_txg,
        })
    }

    /// Sequence number for the next written record.
    pub(crate) fn take_seq(&mut self) -> LogSeq {
        let seq = self.next_seq;
        self.next_seq = seq.next();
        seq
    }

    /// Highest group of any block on the device.
    pub(crate) fn max_txg(&self) -> TxgId {
        self.max_txg
    }

    pub(crate) fn raise_max_txg(&mut self, txg: TxgId) {
        self.max_txg = self.max_txg.max(txg);
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.next_block == 0
    }

    /// Appends the gathered records as one block. Not durable until
    /// [`LogWriter::flush`].
    pub(crate) fn write_block(&mut self, block: BlockBuilder) -> CoreResult<()> {
        let header = BlockHeader {
            chain_id: self.chain_id,
            seq: self.next_block,
            payload_len: u32::try_from(block.payload.len())
                .map_err(|_| CoreError::invalid_operation("log block too large"))?,
            record_count: block.count,
            max_txg: block.max_txg,
        };
        let mut data = Vec::with_capacity(BLOCK_OVERHEAD + block.payload.len());
        data.extend_from_slice(&header.encode());
        data.extend_from_slice(&block.payload);
        let crc = crc32c::crc32c(&data);
        data.extend_from_slice(&crc.to_le_bytes());

        let offset = self.device.append(&data)?;
        trace!(
            target: "cowtx::zil",
            block = header.seq,
            offset,
            records = header.record_count,
            "log block"
        );
        self.next_block += 1;
        self.max_txg = self.max_txg.max(block.max_txg);
        Ok(())
    }

    pub(crate) fn flush(&mut self) -> CoreResult<()> {
        self.device.flush()?;
        Ok(())
    }

    /// Reads every block of the chain.
    pub(crate) fn read_chain(&self) -> CoreResult<Vec<LogBlock>> {
        read_chain(self.device.as_ref())
    }

    /// Empties the device and starts a new chain.
    pub(crate) fn reclaim(&mut self) -> CoreResult<()> {
        self.device.truncate(0)?;
        self.device.sync()?;
        self.chain_id = Uuid::new_v4();
        self.next_block = 0;
        self.max_txg = TxgId::NONE;
        Ok(())
    }

    pub(crate) fn device_size(&self) -> CoreResult<u64> {
        Ok(self.device.size()?)
    }
}

impl std::fmt::Debug for LogWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogWriter")
            .field("chain_id", &self.chain_id)
            .field("next_block", &self.next_block)
            .field("next_seq", &self.next_seq)
            .field("max_txg", &self.max_txg)
            .finish_non_exhaustive()
    }
}

/// Reads blocks from the start of `device` up to the end of the chain.
fn read_chain(device: &dyn StorageBackend) -> CoreResult<Vec<LogBlock>> {
    let size = device.size()?;
    let mut blocks: Vec<LogBlock> = Vec::new();
    let mut offset = 0u64;

    while offset + BLOCK_HEADER_SIZE as u64 <= size {
        let head = device.read_at(offset, BLOCK_HEADER_SIZE)?;
        let Some(header) = BlockHeader::decode(&head) else {
            break;
        };
        let expected_seq = blocks.last().map_or(0, |b| b.header.seq + 1);
        let same_chain = blocks
            .first()
            .map_or(true, |b| b.header.chain_id == header.chain_id);
        if header.seq != expected_seq || !same_chain {
            break;
        }

        let len = BLOCK_OVERHEAD + header.payload_len as usize;
        if offset + len as u64 > size {
            debug!(target: "cowtx::zil", offset, "torn log block");
            break;
        }
        let data = device.read_at(offset, len)?;
        let (body, crc) = data.split_at(len - CRC_SIZE);
        let expected = u32::from_le_bytes([crc[0], crc[1], crc[2], crc[3]]);
        let actual = crc32c::crc32c(body);
        if expected != actual {
            debug!(
                target: "cowtx::zil",
                offset,
                error = %CoreError::ChecksumMismatch { expected, actual },
                "end of log chain"
            );
            break;
        }

        let Ok(records) = decode_records(&body[BLOCK_HEADER_SIZE..], header.record_count) else {
            break;
        };
        blocks.push(LogBlock {
            header,
            offset,
            records,
        });
        offset += len as u64;
    }
    Ok(blocks)
}

fn decode_records(mut payload: &[u8], count: u32) -> CoreResult<Vec<LogRecord>> {
    let capacity = (count as usize).min(payload.len() / RECORD_HEADER_SIZE);
    let mut records = Vec::with_capacity(capacity);
    for _ in 0..count {
        let (record, used) = LogRecord::decode(payload)?;
        records.push(record);
        payload = &payload[used..];
    }
    if !payload.is_empty() {
        return Err(CoreError::log_corrupted("trailing bytes in log block"));
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ObjectId;
    use crate::zil::record::{RecordBody, TruncateRecord};
    use cowtx_storage::{FileBackend, InMemoryBackend};
    use tempfile::tempdir;

    fn truncate_record(object: u64, txg: u64, seq: LogSeq) -> LogRecord {
        let mut record = LogRecord::new(RecordBody::Truncate(TruncateRecord {
            object: ObjectId::new(object),
            offset: 0,
            length: 10,
        }));
        record.set_txg(TxgId::new(txg));
        record.set_seq(seq);
        record
    }

    fn write_blocks(writer: &mut LogWriter, blocks: u64) {
        for i in 0..blocks {
            let mut block = BlockBuilder::new(4096);
            let seq = writer.take_seq();
            block.push(&truncate_record(i, i + 1, seq)).unwrap();
            writer.write_block(block).unwrap();
        }
        writer.flush().unwrap();
    }

    #[test]
    fn header_roundtrip() {
        let header = BlockHeader {
            chain_id: Uuid::new_v4(),
            seq: 7,
            payload_len: 100,
            record_count: 3,
            max_txg: TxgId::new(9),
        };
        assert_eq!(BlockHeader::decode(&header.encode()), Some(header));
    }

    #[test]
    fn blocks_are_read_back_in_order() {
        let device = InMemoryBackend::new();
        let mut writer = LogWriter::open(Box::new(device.clone())).unwrap();
        assert!(writer.is_empty());
        write_blocks(&mut writer, 3);

        let blocks = writer.read_chain().unwrap();
        assert_eq!(blocks.len(), 3);
        for (i, block) in blocks.iter().enumerate() {
            assert_eq!(block.header.seq, i as u64);
            assert_eq!(block.records[0].seq(), LogSeq::new(i as u64 + 1));
        }
        assert_eq!(writer.max_txg(), TxgId::new(3));
    }

    #[test]
    fn reopen_continues_chain() {
        let device = InMemoryBackend::new();
        let mut writer = LogWriter::open(Box::new(device.clone())).unwrap();
        write_blocks(&mut writer, 2);
        drop(writer);

        let mut writer = LogWriter::open(Box::new(device.clone())).unwrap();
        assert_eq!(writer.take_seq(), LogSeq::new(3));
        assert_eq!(writer.max_txg(), TxgId::new(2));
        write_blocks(&mut writer, 1);
        assert_eq!(writer.read_chain().unwrap().len(), 3);
    }

    #[test]
    fn torn_tail_is_cut_off() {
        let device = InMemoryBackend::new();
        let mut writer = LogWriter::open(Box::new(device.clone())).unwrap();
        write_blocks(&mut writer, 2);
        let full = writer.device_size().unwrap();
        drop(writer);

        let mut raw: Box<dyn StorageBackend> = Box::new(device.clone());
        raw.truncate(full - 3).unwrap();
        let writer = LogWriter::open(Box::new(device)).unwrap();
        assert_eq!(writer.read_chain().unwrap().len(), 1);
        assert!(writer.device_size().unwrap() < full - 3);
    }

    #[test]
    fn checksum_failure_ends_chain() {
        let device = InMemoryBackend::new();
        let mut writer = LogWriter::open(Box::new(device.clone())).unwrap();
        write_blocks(&mut writer, 1);
        let first_len = writer.device_size().unwrap();
        write_blocks(&mut writer, 1);
        drop(writer);

        device.corrupt_byte(first_len as usize + BLOCK_HEADER_SIZE + 2, 0xFF);
        let writer = LogWriter::open(Box::new(device)).unwrap();
        assert_eq!(writer.read_chain().unwrap().len(), 1);
    }

    #[test]
    fn reclaim_starts_fresh_chain() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("log");
        let mut writer = LogWriter::open(Box::new(FileBackend::open(&path).unwrap())).unwrap();
        write_blocks(&mut writer, 2);
        writer.reclaim().unwrap();
        assert!(writer.is_empty());
        assert_eq!(writer.device_size().unwrap(), 0);
        assert_eq!(writer.max_txg(), TxgId::NONE);

        write_blocks(&mut writer, 1);
        drop(writer);
        let writer = LogWriter::open(Box::new(FileBackend::open(&path).unwrap())).unwrap();
        assert_eq!(writer.read_chain().unwrap().len(), 1);
    }
}
