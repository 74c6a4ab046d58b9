//! Ephemeral port allocation for NAT.
//!
//! One [`PortAllocator`] exists per transport protocol and is shared by all
//! NAT rules of the router. Each NAT rule allocates through its own
//! [`PortAllocatorGuard`], which enforces the rule's port quota on top of
//! the shared bitmap.

use std::cell::RefCell;
use std::rc::Rc;
use thiserror::Error;
use tracing::debug;

/// First port of the IANA dynamic port range.
pub const FIRST_EPHEMERAL_PORT: u16 = 49152;

/// Number of ports in the IANA dynamic port range.
pub const EPHEMERAL_PORT_COUNT: u16 = 16384;

/// A port allocator shared by reference between NAT rules.
pub type SharedPortAllocator = Rc<RefCell<PortAllocator>>;

/// Error type for port allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PortAllocError {
    #[error("port {0} is already allocated")]
    AllocationConflict(u16),

    #[error("port {0} is outside the allocator range")]
    OutOfRange(u16),

    #[error("no free port left in the allocator range")]
    Exhausted,

    #[error("port quota of {max} exhausted")]
    OutOfIndices { max: u32 },
}

/// A bitmap over `[first, first + count)`.
///
/// A bit is set iff the corresponding port is allocated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortAllocator {
    first: u16,
    count: u16,
    words: Vec<u64>,
    allocated: u16,
}

impl PortAllocator {
    /// Creates an allocator over the dynamic port range.
    pub fn new() -> Self {
        Self::with_range(FIRST_EPHEMERAL_PORT, EPHEMERAL_PORT_COUNT)
    }

    /// Creates an allocator over `[first, first + count)`.
    ///
    /// The range is clamped so that it never extends past port 65535.
    pub fn with_range(first: u16, count: u16) -> Self {
        let max_count = u32::from(u16::MAX) - u32::from(first) + 1;
        let count = u32::from(count).min(max_count) as u16;
        let words = vec![0; usize::from(count).div_ceil(64)];
        Self {
            first,
            count,
            words,
            allocated: 0,
        }
    }

    /// Creates an allocator over the dynamic port range, ready to be shared.
    pub fn shared() -> SharedPortAllocator {
        Rc::new(RefCell::new(Self::new()))
    }

    /// Returns the first port of the range.
    pub const fn first(&self) -> u16 {
        self.first
    }

    /// Returns the number of ports in the range.
    pub const fn count(&self) -> u16 {
        self.count
    }

    /// Returns the number of currently allocated ports.
    pub const fn allocated_count(&self) -> u16 {
        self.allocated
    }

    /// Returns true if `port` lies inside the allocator range.
    pub fn contains(&self, port: u16) -> bool {
        port >= self.first && usize::from(port - self.first) < usize::from(self.count)
    }

    /// Returns true if `port` is currently allocated.
    pub fn is_allocated(&self, port: u16) -> bool {
        match self.index_of(port) {
            Some(index) => self.words[index / 64] & (1 << (index % 64)) != 0,
            None => false,
        }
    }

    /// Allocates the lowest free port.
    pub fn alloc(&mut self) -> Result<u16, PortAllocError> {
        for (word_idx, word) in self.words.iter_mut().enumerate() {
            if *word == u64::MAX {
                continue;
            }
            let bit = (!*word).trailing_zeros() as usize;
            let index = word_idx * 64 + bit;
            if index >= usize::from(self.count) {
                break;
            }
            *word |= 1 << bit;
            self.allocated += 1;
            // index < count <= u16::MAX - first + 1
            return Ok(self.first + index as u16);
        }
        Err(PortAllocError::Exhausted)
    }

    /// Allocates a caller-chosen port.
    pub fn alloc_port(&mut self, port: u16) -> Result<(), PortAllocError> {
        let index = self.index_of(port).ok_or(PortAllocError::OutOfRange(port))?;
        let word = &mut self.words[index / 64];
        let mask = 1 << (index % 64);
        if *word & mask != 0 {
            return Err(PortAllocError::AllocationConflict(port));
        }
        *word |= mask;
        self.allocated += 1;
        Ok(())
    }

    /// Releases a port.
    ///
    /// The caller owns the allocation; freeing a port that is not allocated
    /// leaves the bitmap unchanged.
    pub fn free(&mut self, port: u16) {
        debug_assert!(self.contains(port), "freeing port {port} outside the allocator range");
        let Some(index) = self.index_of(port) else {
            return;
        };
        let word = &mut self.words[index / 64];
        let mask = 1 << (index % 64);
        if *word & mask != 0 {
            *word &= !mask;
            self.allocated -= 1;
        }
    }

    fn index_of(&self, port: u16) -> Option<usize> {
        self.contains(port).then(|| usize::from(port - self.first))
    }
}

impl Default for PortAllocator {
    fn default() -> Self {
        Self::new()
    }
}

/// A quota-limited view of a shared [`PortAllocator`].
///
/// Invariant: `used <= max`. The guard does not own the allocator and never
/// outlives the NAT rule that created it.
#[derive(Debug)]
pub struct PortAllocatorGuard {
    allocator: SharedPortAllocator,
    used: u32,
    max: u32,
}

impl PortAllocatorGuard {
    /// Creates a guard allowing at most `max` ports from `allocator`.
    pub fn new(allocator: SharedPortAllocator, max: u32) -> Self {
        Self {
            allocator,
            used: 0,
            max,
        }
    }

    /// Returns the number of ports held through this guard.
    pub const fn used(&self) -> u32 {
        self.used
    }

    /// Returns the quota.
    pub const fn max(&self) -> u32 {
        self.max
    }

    /// Allocates the lowest free port if the quota allows.
    pub fn alloc(&mut self) -> Result<u16, PortAllocError> {
        self.check_quota()?;
        let port = self.allocator.borrow_mut().alloc()?;
        self.used += 1;
        debug!(port, used = self.used, max = self.max, "allocated port");
        Ok(port)
    }

    /// Allocates a caller-chosen port if the quota allows.
    pub fn alloc_port(&mut self, port: u16) -> Result<(), PortAllocError> {
        self.check_quota()?;
        self.allocator.borrow_mut().alloc_port(port)?;
        self.used += 1;
        Ok(())
    }

    /// Registers a port that is already allocated in the shared allocator
    /// and is being handed over to this guard (e.g. from the guard of a
    /// previous configuration generation).
    pub fn adopt(&mut self, port: u16) -> Result<(), PortAllocError> {
        self.check_quota()?;
        debug_assert!(self.allocator.borrow().is_allocated(port));
        self.used += 1;
        Ok(())
    }

    /// Releases a port obtained through this guard.
    ///
    /// The caller must pass a port it holds through this guard; the shared
    /// bit is cleared unconditionally and a foreign port would be taken
    /// away from its holder.
    pub fn free(&mut self, port: u16) {
        debug_assert!(
            self.allocator.borrow().is_allocated(port),
            "freeing port {port} that is not allocated"
        );
        self.allocator.borrow_mut().free(port);
        self.used = self.used.saturating_sub(1);
    }

    fn check_quota(&self) -> Result<(), PortAllocError> {
        if self.used >= self.max {
            return Err(PortAllocError::OutOfIndices { max: self.max });
        }
        Ok(())
    }
}
