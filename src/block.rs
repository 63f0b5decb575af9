use std::ptr;

/// A contiguous range of bytes handed out by a [`crate::BlockAllocator`].
///
/// ```text
/// address                        address + size
///    |                                 |
///    v                                 v
///    +---------------------------------+
///    |            block bytes          |
///    +---------------------------------+
/// ```
///
/// A block never owns its memory. Whoever got it from `allocate_block` has to
/// give it back, unmodified and exactly once, to the same allocator instance.
///
/// The null block (null address, zero size) is how block allocators signal
/// failure. No other block has a null address or a zero size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MemoryBlock {
    /// First byte of the block.
    pub address: *mut u8,
    /// Size of the block in bytes.
    pub size: usize,
}

// Blocks are plain (address, size) values. Sending one to another thread
// transfers nothing but the right to hand it back to its allocator.
unsafe impl Send for MemoryBlock {}
unsafe impl Sync for MemoryBlock {}

impl MemoryBlock {
    /// The canonical null block.
    pub const NULL: Self = Self {
        address: ptr::null_mut(),
        size: 0,
    };

    #[inline]
    pub fn new(address: *mut u8, size: usize) -> Self {
        debug_assert_eq!(address.is_null(), size == 0, "null block must have zero size");
        Self { address, size }
    }

    #[inline]
    pub const fn null() -> Self {
        Self::NULL
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        self.address.is_null()
    }

    /// One past the last byte of the block.
    #[inline]
    pub fn end(&self) -> *mut u8 {
        self.address.wrapping_add(self.size)
    }

    /// Whether `ptr` points inside this block.
    #[inline]
    pub fn contains(&self, ptr: *const u8) -> bool {
        let addr = ptr as usize;
        let start = self.address as usize;
        !self.is_null() && addr >= start && addr < start + self.size
    }
}

impl Default for MemoryBlock {
    fn default() -> Self {
        Self::NULL
    }
}
