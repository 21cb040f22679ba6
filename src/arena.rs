//! Arena allocation over pooled blocks.
//!
//! An [`Arena`] batches many small allocations that are never freed one by
//! one. Allocations are bump-allocated from the newest block of the arena's
//! chain; when it is full, another block is seized from the [`ArenaPool`].
//! [`ArenaPool::release`] returns the whole chain at once.
//!
//! ```
//! use core::alloc::Layout;
//! use slot_pool::{Arena, ArenaPool, FlatPageStore};
//!
//! let mut ctx = FlatPageStore::new(4).unwrap();
//! let mut pool = ArenaPool::new().unwrap();
//! let mut scratch = Arena::new();
//!
//! let x = pool.alloc(&mut ctx, &mut scratch, 17_u64).unwrap();
//! assert_eq!(unsafe { *x.as_ptr() }, 17);
//!
//! let buf = pool.alloc_bytes(&mut ctx, &mut scratch, Layout::new::<[u8; 100]>());
//! assert!(buf.is_some());
//!
//! assert_eq!(pool.release(&mut ctx, &mut scratch), 1);
//! assert!(scratch.is_empty());
//! ```

use core::{alloc::Layout, mem, ptr::NonNull};

use log::trace;

use crate::{
    list::{Link, SlFifoList},
    pool::PoolRecords,
    record::round_up,
    AllocInitError, FixedPagePool, PageContext, Record, RecordTypeId, SlotPool,
};

/// Usable bytes in one arena block.
pub const BLOCK_BYTES: usize = 1024;

/// The largest alignment an arena allocation may request.
pub const MAX_ALIGN: usize = mem::align_of::<u64>();

/// One block of an arena's chain.
#[derive(Debug)]
pub struct ArenaBlock {
    chain: Link,
    payload: [u64; BLOCK_BYTES / 8],
}

impl Record for ArenaBlock {
    const TYPE_ID: RecordTypeId = RecordTypeId::new(0x7FF_FFFF, 0);
}

/// List role of an arena's block chain.
#[derive(Debug)]
pub enum BlockChain {}

crate::impl_links!(ArenaBlock, BlockChain, chain);

/// The head of one arena: a chain of blocks and the bump offset into the
/// newest one.
#[derive(Debug, Default)]
pub struct Arena {
    blocks: SlFifoList<BlockChain>,
    used: usize,
}

impl Arena {
    /// Returns an arena with no blocks.
    pub fn new() -> Arena {
        Arena::default()
    }

    /// Returns `true` if the arena holds no blocks.
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

/// The pool of blocks shared by arenas.
#[derive(Debug)]
pub struct ArenaPool {
    blocks: FixedPagePool<ArenaBlock>,
}

impl ArenaPool {
    /// Creates an empty block pool.
    ///
    /// # Errors
    ///
    /// Propagates [`FixedPagePool::new`] errors.
    pub fn new() -> Result<ArenaPool, AllocInitError> {
        Ok(ArenaPool {
            blocks: FixedPagePool::new()?,
        })
    }

    /// Returns the number of pages holding arena blocks.
    pub fn pages(&self) -> u32 {
        self.blocks.pages()
    }

    /// Allocates `layout.size()` bytes from `arena`.
    ///
    /// The memory stays valid until the arena is released. Returns `None` if
    /// the layout is larger than a block, is aligned to more than
    /// [`MAX_ALIGN`], or a new block cannot be obtained.
    pub fn alloc_bytes<C: PageContext>(
        &mut self,
        ctx: &mut C,
        arena: &mut Arena,
        layout: Layout,
    ) -> Option<NonNull<u8>> {
        if layout.align() > MAX_ALIGN || layout.size() > BLOCK_BYTES {
            return None;
        }

        let mut offset = round_up(arena.used, layout.align());
        if arena.blocks.is_empty() || offset + layout.size() > BLOCK_BYTES {
            let block = self.blocks.seize(
                ctx,
                ArenaBlock {
                    chain: Link::default(),
                    payload: [0; BLOCK_BYTES / 8],
                },
            )?;

            let mut records = PoolRecords::<ArenaBlock, _, _>::new(&mut self.blocks, &*ctx);
            arena.blocks.push_back(&mut records, block.index());
            arena.used = 0;
            offset = 0;

            trace!("arena grew to block {}", block.index());
        }

        // Safe unwrap: a block was just ensured.
        let last = arena.blocks.last().unwrap();
        let ptr = self.blocks.get_ptr(ctx, last);
        let block = self.blocks.get_mut(ctx, &ptr);

        arena.used = offset + layout.size();

        let base = NonNull::from(&mut block.payload).cast::<u8>();
        // SAFETY: `offset + size` does not exceed the payload.
        Some(unsafe { base.add(offset) })
    }

    /// Moves `value` into `arena` and returns a pointer to it.
    pub fn alloc<T: Copy, C: PageContext>(
        &mut self,
        ctx: &mut C,
        arena: &mut Arena,
        value: T,
    ) -> Option<NonNull<T>> {
        let p = self
            .alloc_bytes(ctx, arena, Layout::new::<T>())?
            .cast::<T>();

        // SAFETY: the allocation is sized and aligned for `T`.
        unsafe { p.as_ptr().write(value) };
        Some(p)
    }

    /// Returns every block of `arena` to the pool and empties it.
    ///
    /// Returns the number of blocks released.
    pub fn release<C: PageContext>(&mut self, ctx: &mut C, arena: &mut Arena) -> usize {
        let mut released = 0;

        loop {
            let mut records = PoolRecords::<ArenaBlock, _, _>::new(&mut self.blocks, &*ctx);
            let next = arena.blocks.pop_front(&mut records);
            let Some(index) = next else {
                break;
            };

            let ptr = self.blocks.get_ptr(ctx, index);
            let _ = self.blocks.release(ctx, ptr);
            released += 1;
        }

        *arena = Arena::new();
        released
    }
}
