//! Ownership bookkeeping for the device's mapped capture buffers.
//!
//! Each region is either queued to the device (the driver may write into it at
//! any moment) or dequeued to the process (its bytes are stable until it is
//! queued again). Dequeuing hands out a [`RegionHandle`] that must be consumed
//! by [`RegionLedger::release`], so a region cannot be returned twice.

use crate::error::RegionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Owner {
    Device,
    Process,
}

/// Proof that the process currently owns region `index`.
#[derive(Debug, PartialEq, Eq)]
#[must_use = "a dequeued region must be released back to the device"]
pub struct RegionHandle {
    index: usize,
    bytes_used: usize,
}

impl RegionHandle {
    pub fn index(&self) -> usize {
        self.index
    }

    /// Number of bytes the driver filled in
    pub fn bytes_used(&self) -> usize {
        self.bytes_used
    }
}

#[derive(Debug)]
pub struct RegionLedger {
    owners: Vec<Owner>,
}

impl RegionLedger {
    /// All regions start out process-owned: allocated but not yet queued.
    pub fn new(count: usize) -> Self {
        Self {
            owners: vec![Owner::Process; count],
        }
    }

    pub fn len(&self) -> usize {
        self.owners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }

    pub fn owner(&self, index: usize) -> Option<Owner> {
        self.owners.get(index).copied()
    }

    /// Number of regions currently held by the process
    pub fn held(&self) -> usize {
        self.owners.iter().filter(|o| **o == Owner::Process).count()
    }

    /// Record that region `index` was handed to the device.
    pub fn mark_queued(&mut self, index: usize) -> Result<(), RegionError> {
        let owner = self
            .owners
            .get_mut(index)
            .ok_or(RegionError::OutOfRange(index))?;
        if *owner == Owner::Device {
            return Err(RegionError::AlreadyQueued(index));
        }
        *owner = Owner::Device;
        Ok(())
    }

    /// Record that the device returned region `index` filled with `bytes_used` bytes.
    pub fn acquire(&mut self, index: usize, bytes_used: usize) -> Result<RegionHandle, RegionError> {
        let owner = self
            .owners
            .get_mut(index)
            .ok_or(RegionError::OutOfRange(index))?;
        if *owner == Owner::Process {
            return Err(RegionError::AlreadyDequeued(index));
        }
        *owner = Owner::Process;
        Ok(RegionHandle { index, bytes_used })
    }

    /// Give the region back to the device, consuming its handle.
    pub fn release(&mut self, handle: RegionHandle) -> Result<usize, RegionError> {
        self.mark_queued(handle.index)?;
        Ok(handle.index)
    }

    /// Streaming was switched off: the driver drops every queued region.
    pub fn reclaim_all(&mut self) {
        self.owners.fill(Owner::Process);
    }
}
