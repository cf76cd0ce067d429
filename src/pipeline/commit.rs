use anyhow::{bail, Result};

/// When offsets are handed to the committer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitMode {
    /// Commit after every unit reaches a terminal outcome. Strongest
    /// durability boundary, highest commit overhead.
    PerUnit,
    /// Commit once per partition per poll cycle, after every unit of that
    /// partition's slice has resolved.
    Batched,
}

/// Highest offset safe to resume from, for one partition.
///
/// Owned exclusively by the task driving that partition, so the commit path
/// needs no locking. Advancing is only legal in non-decreasing offset order;
/// a regression is a logic error in the caller and is surfaced rather than
/// silently accepted.
#[derive(Debug)]
pub struct CommitCursor {
    partition: u32,
    committed: Option<u64>,
}

impl CommitCursor {
    pub fn new(partition: u32) -> Self {
        Self {
            partition,
            committed: None,
        }
    }

    pub fn partition(&self) -> u32 {
        self.partition
    }

    pub fn last_committed(&self) -> Option<u64> {
        self.committed
    }

    /// Marks `offset` as durably committed.
    pub fn advance(&mut self, offset: u64) -> Result<()> {
        if let Some(committed) = self.committed {
            if offset < committed {
                bail!(
                    "commit regression on partition {}: offset {} is below committed {}",
                    self.partition,
                    offset,
                    committed
                );
            }
        }
        self.committed = Some(offset);
        Ok(())
    }
}
