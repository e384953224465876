//! FIFO queue that keeps a bounded head in memory and spills the tail to a
//! temporary file.
//!
//! Spill records are length-prefixed (u32 LE) JSON documents, so the file
//! format stays readable across element-type changes. The queue is built
//! for a fill-then-drain access pattern: once anything has spilled, offers
//! keep appending to the file until the file is fully drained back into
//! memory, which preserves strict FIFO order under interleaved use.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use tempfile::NamedTempFile;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Backing file with independent read and write cursors.
///
/// Dropping it deletes the file.
struct SpillFile {
    _temp: NamedTempFile,
    writer: BufWriter<File>,
    reader: BufReader<File>,
    elements: usize,
}

impl SpillFile {
    fn create() -> Result<Self, QueueError> {
        let temp = NamedTempFile::new()?;
        let writer = BufWriter::new(temp.reopen()?);
        let reader = BufReader::new(temp.reopen()?);
        Ok(Self {
            _temp: temp,
            writer,
            reader,
            elements: 0,
        })
    }

    fn append<T: Serialize>(&mut self, element: &T) -> Result<(), QueueError> {
        let bytes =
            serde_json::to_vec(element).map_err(|e| QueueError::Serialization(e.to_string()))?;
        let len = u32::try_from(bytes.len())
            .map_err(|_| QueueError::Serialization("record exceeds u32 length".to_string()))?;

        self.writer.write_all(&len.to_le_bytes())?;
        self.writer.write_all(&bytes)?;
        self.elements += 1;
        Ok(())
    }

    fn read_next<T: DeserializeOwned>(&mut self) -> Result<T, QueueError> {
        self.writer.flush()?;

        let mut len_bytes = [0u8; 4];
        self.reader.read_exact(&mut len_bytes)?;
        let len = u32::from_le_bytes(len_bytes) as usize;

        let mut record = vec![0u8; len];
        self.reader.read_exact(&mut record)?;
        self.elements -= 1;

        serde_json::from_slice(&record).map_err(|e| QueueError::Serialization(e.to_string()))
    }
}

/// Disk-backed FIFO queue with at most `memory_cap` resident elements.
pub struct DiskSpillQueue<T> {
    memory: VecDeque<T>,
    memory_cap: usize,
    spill: Option<SpillFile>,
}

impl<T> DiskSpillQueue<T>
where
    T: Serialize + DeserializeOwned,
{
    pub fn new(memory_cap: usize) -> Self {
        Self {
            memory: VecDeque::new(),
            memory_cap: memory_cap.max(1),
            spill: None,
        }
    }

    /// Enqueue an element, spilling to disk when memory is full or the
    /// file already holds elements behind the memory head.
    pub fn offer(&mut self, element: T) -> Result<(), QueueError> {
        let must_spill = self.spilled_len() > 0 || self.memory.len() >= self.memory_cap;

        if must_spill {
            if self.spill.is_none() {
                self.spill = Some(SpillFile::create()?);
            }
            if let Some(spill) = self.spill.as_mut() {
                spill.append(&element)?;
            }
        } else {
            self.memory.push_back(element);
        }

        Ok(())
    }

    /// Dequeue the oldest element, refilling memory from disk as needed.
    pub fn poll(&mut self) -> Result<Option<T>, QueueError> {
        self.refill()?;
        Ok(self.memory.pop_front())
    }

    /// Oldest element without removing it.
    pub fn peek(&mut self) -> Result<Option<&T>, QueueError> {
        self.refill()?;
        Ok(self.memory.front())
    }

    pub fn len(&self) -> usize {
        self.memory.len() + self.spilled_len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Elements currently resident in the spill file.
    pub fn spilled_len(&self) -> usize {
        self.spill.as_ref().map(|s| s.elements).unwrap_or(0)
    }

    /// Drop all elements and delete the backing file.
    pub fn clear(&mut self) {
        self.memory.clear();
        self.spill = None;
    }

    fn refill(&mut self) -> Result<(), QueueError> {
        if !self.memory.is_empty() {
            return Ok(());
        }

        let drained = if let Some(spill) = self.spill.as_mut() {
            while spill.elements > 0 && self.memory.len() < self.memory_cap {
                self.memory.push_back(spill.read_next()?);
            }
            spill.elements == 0
        } else {
            false
        };

        if drained {
            // Fully drained: release the file so a later spill starts fresh.
            self.spill = None;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_in_memory() {
        let mut queue = DiskSpillQueue::new(10);
        for i in 0..5 {
            queue.offer(i).unwrap();
        }

        for i in 0..5 {
            assert_eq!(queue.poll().unwrap(), Some(i));
        }
        assert_eq!(queue.poll().unwrap(), None);
    }

    #[test]
    fn test_fifo_across_spill_boundary() {
        let mut queue = DiskSpillQueue::new(3);
        for i in 0..20 {
            queue.offer(i).unwrap();
        }

        assert_eq!(queue.len(), 20);
        assert!(queue.spilled_len() > 0);

        for i in 0..20 {
            assert_eq!(queue.poll().unwrap(), Some(i), "element {}", i);
        }
        assert!(queue.is_empty());
    }

    #[test]
    fn test_interleaved_offer_poll_keeps_order() {
        let mut queue = DiskSpillQueue::new(2);
        queue.offer(0).unwrap();
        queue.offer(1).unwrap();
        queue.offer(2).unwrap();

        assert_eq!(queue.poll().unwrap(), Some(0));

        // 2 is still on disk, so later offers must not jump ahead of it.
        queue.offer(3).unwrap();
        queue.offer(4).unwrap();

        for expected in 1..5 {
            assert_eq!(queue.poll().unwrap(), Some(expected));
        }
        assert!(queue.is_empty());
    }

    #[test]
    fn test_peek_does_not_consume() {
        let mut queue = DiskSpillQueue::new(1);
        queue.offer("a".to_string()).unwrap();
        queue.offer("b".to_string()).unwrap();

        assert_eq!(queue.peek().unwrap().cloned(), Some("a".to_string()));
        assert_eq!(queue.peek().unwrap().cloned(), Some("a".to_string()));
        assert_eq!(queue.poll().unwrap(), Some("a".to_string()));
        assert_eq!(queue.poll().unwrap(), Some("b".to_string()));
    }

    #[test]
    fn test_clear_resets() {
        let mut queue = DiskSpillQueue::new(2);
        for i in 0..10 {
            queue.offer(i).unwrap();
        }

        queue.clear();
        assert!(queue.is_empty());
        assert_eq!(queue.poll().unwrap(), None);

        // Queue remains usable after clear.
        queue.offer(42).unwrap();
        assert_eq!(queue.poll().unwrap(), Some(42));
    }

    #[test]
    fn test_structured_elements_roundtrip() {
        use crate::datum::{ScoredUrlDatum, UrlDatum};
        use crate::grouping::GroupingKey;

        let mut queue = DiskSpillQueue::new(2);
        let mut expected = Vec::new();

        for i in 0..8 {
            let mut datum = UrlDatum::new(format!("http://test.local/page-{}", i));
            datum
                .metadata
                .insert("index".to_string(), i.to_string());
            let scored = ScoredUrlDatum {
                datum,
                key: GroupingKey::Fetchable {
                    domain: "test.local".to_string(),
                    crawl_delay_ms: 100,
                },
                score: 1.0 - (i as f64) / 10.0,
            };
            queue.offer(scored.clone()).unwrap();
            expected.push(scored);
        }

        for scored in expected {
            assert_eq!(queue.poll().unwrap(), Some(scored));
        }
    }

    #[test]
    fn test_spill_file_removed_on_drain() {
        let mut queue = DiskSpillQueue::new(1);
        for i in 0..5 {
            queue.offer(i).unwrap();
        }
        assert!(queue.spill.is_some());

        while queue.poll().unwrap().is_some() {}
        assert!(queue.spill.is_none());
    }
}
