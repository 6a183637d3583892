//! # Resource Handle State
//!
//! State shared by the blocking and async writer/scanner handles. The handles
//! differ only in how a proxy call is issued; buffering, exhaustion, and
//! close-once bookkeeping live here.
//!
//! ```text
//! Open --batch with more=false--> Drained --buffer empty--> Finished
//!   \                               |                          |
//!    +------------- close ----------+------------ close -------+--> Closed
//! ```

use std::collections::VecDeque;

use tkv_common::{KeyValue, Mutation, MutationBatch};

use crate::error::{ClientError, ClientResult};
use crate::proxy::{ResourceId, ScanBatch};

/// Records requested per fetch when the scan options leave it unset.
pub const DEFAULT_BATCH_SIZE: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CursorState {
    /// The server may hold more records.
    Open,
    /// The server has no more records; the buffer may still hold some.
    Drained,
    /// End of scan was reported to the caller.
    Finished,
    Closed,
}

/// What the handle should do next.
pub(crate) enum Step<T> {
    Ready(T),
    Fetch,
    End,
}

/// Forward-only cursor over a server-side scanner.
pub(crate) struct ScanCursor {
    id: ResourceId,
    batch_size: usize,
    buffer: VecDeque<KeyValue>,
    state: CursorState,
}

impl ScanCursor {
    pub(crate) fn new(id: ResourceId, batch_size: Option<usize>) -> Self {
        ScanCursor {
            id,
            batch_size: batch_size.filter(|&size| size > 0).unwrap_or(DEFAULT_BATCH_SIZE),
            buffer: VecDeque::new(),
            state: CursorState::Open,
        }
    }

    pub(crate) fn id(&self) -> &str {
        &self.id
    }

    pub(crate) fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Next single record, or a request to fetch.
    pub(crate) fn step(&mut self) -> ClientResult<Step<KeyValue>> {
        self.ensure_readable()?;
        if let Some(record) = self.buffer.pop_front() {
            return Ok(Step::Ready(record));
        }
        Ok(self.empty_step())
    }

    /// Everything buffered, or a request to fetch.
    pub(crate) fn step_batch(&mut self) -> ClientResult<Step<Vec<KeyValue>>> {
        self.ensure_readable()?;
        if !self.buffer.is_empty() {
            return Ok(Step::Ready(self.buffer.drain(..).collect()));
        }
        Ok(self.empty_step())
    }

    fn ensure_readable(&self) -> ClientResult<()> {
        match self.state {
            CursorState::Finished | CursorState::Closed => Err(ClientError::ScannerClosed),
            CursorState::Open | CursorState::Drained => Ok(()),
        }
    }

    fn empty_step<T>(&mut self) -> Step<T> {
        match self.state {
            CursorState::Open => Step::Fetch,
            _ => {
                self.state = CursorState::Finished;
                Step::End
            }
        }
    }

    /// Buffers a fetched batch.
    pub(crate) fn absorb(&mut self, batch: ScanBatch) {
        if self.state != CursorState::Open {
            return;
        }
        self.buffer.extend(batch.results);
        if !batch.more {
            self.state = CursorState::Drained;
        }
    }

    /// Marks the cursor closed. Returns true the first time only, which is
    /// when the server-side close must be sent.
    pub(crate) fn begin_close(&mut self) -> bool {
        if self.state == CursorState::Closed {
            return false;
        }
        self.state = CursorState::Closed;
        self.buffer.clear();
        true
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.state == CursorState::Closed
    }
}

/// Turns the server's rejected positions into a `Write` error.
pub(crate) fn check_rejections(
    batch: &MutationBatch,
    mutations: &[Mutation],
    positions: &[usize],
) -> ClientResult<()> {
    if positions.is_empty() {
        return Ok(());
    }
    Err(ClientError::Write {
        rejected: batch.rejected(mutations, positions),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn record(row: &'static [u8]) -> KeyValue {
        KeyValue::new(Bytes::from_static(row), Bytes::new(), Bytes::new(), Bytes::new(), 0, Bytes::new())
    }

    fn row_of(step: Step<KeyValue>) -> Vec<u8> {
        match step {
            Step::Ready(record) => record.row().as_bytes().to_vec(),
            Step::Fetch => panic!("unexpected fetch"),
            Step::End => panic!("unexpected end"),
        }
    }

    #[test]
    fn fetches_until_drained_then_ends_once() {
        let mut cursor = ScanCursor::new("s1".to_string(), None);
        assert_eq!(cursor.batch_size(), DEFAULT_BATCH_SIZE);
        assert!(matches!(cursor.step().unwrap(), Step::Fetch));

        cursor.absorb(ScanBatch {
            results: vec![record(b"a")],
            more: true,
        });
        assert_eq!(row_of(cursor.step().unwrap()), b"a");
        assert!(matches!(cursor.step().unwrap(), Step::Fetch));

        cursor.absorb(ScanBatch {
            results: vec![record(b"b")],
            more: false,
        });
        assert_eq!(row_of(cursor.step().unwrap()), b"b");
        assert!(matches!(cursor.step().unwrap(), Step::End));
        assert!(matches!(cursor.step(), Err(ClientError::ScannerClosed)));
    }

    #[test]
    fn batch_step_drains_buffer() {
        let mut cursor = ScanCursor::new("s1".to_string(), Some(2));
        assert_eq!(cursor.batch_size(), 2);
        cursor.absorb(ScanBatch {
            results: vec![record(b"a"), record(b"b")],
            more: false,
        });
        match cursor.step_batch().unwrap() {
            Step::Ready(batch) => assert_eq!(batch.len(), 2),
            _ => panic!("expected records"),
        }
        assert!(matches!(cursor.step_batch().unwrap(), Step::End));
        assert!(matches!(cursor.step_batch(), Err(ClientError::ScannerClosed)));
    }

    #[test]
    fn close_is_reported_once_and_blocks_reads() {
        let mut cursor = ScanCursor::new("s1".to_string(), Some(0));
        assert_eq!(cursor.batch_size(), DEFAULT_BATCH_SIZE);
        cursor.absorb(ScanBatch {
            results: vec![record(b"a")],
            more: true,
        });
        assert!(cursor.begin_close());
        assert!(!cursor.begin_close());
        assert!(cursor.is_closed());
        assert!(matches!(cursor.step(), Err(ClientError::ScannerClosed)));
    }

    #[test]
    fn rejections_become_write_errors() {
        let mutations = vec![Mutation::new("r1", "cf", "a"), Mutation::new("r2", "cf", "b")];
        let batch = MutationBatch::new(&mutations);
        assert!(check_rejections(&batch, &mutations, &[]).is_ok());
        match check_rejections(&batch, &mutations, &[1]) {
            Err(ClientError::Write { rejected }) => assert_eq!(rejected, vec![mutations[1].clone()]),
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
