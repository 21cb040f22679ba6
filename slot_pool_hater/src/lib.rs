#![deny(unsafe_op_in_unsafe_fn)]

use pool_hater::Subject;
use slot_pool::{
    AllocInitError, FixedPagePool, FlatPageStore, GrowablePool, LayeredPool, Ptr, Record,
    RecordTypeId, SlotPool, StaticPool, WriteOncePool,
};

const CANVAS_WORDS: usize = 31;

/// A record that carries the id of the operation that seized it in every word.
pub struct Canvas {
    paint: [u64; CANVAS_WORDS],
}

impl Record for Canvas {
    const TYPE_ID: RecordTypeId = RecordTypeId::new(0x4841, 0);
}

/// Pool-specific maintenance run by the evaluator.
pub trait Maintain: SlotPool<Canvas> {
    fn tidy(&mut self, ctx: &mut FlatPageStore);

    fn drained(&mut self, ctx: &mut FlatPageStore) -> bool;
}

impl Maintain for FixedPagePool<Canvas> {
    fn tidy(&mut self, _: &mut FlatPageStore) {}

    fn drained(&mut self, ctx: &mut FlatPageStore) -> bool {
        self.pages() <= 1 && ctx.pages_in_use() == self.pages()
    }
}

impl Maintain for WriteOncePool<Canvas> {
    fn tidy(&mut self, _: &mut FlatPageStore) {}

    fn drained(&mut self, ctx: &mut FlatPageStore) -> bool {
        self.pages() <= 1 && ctx.pages_in_use() == self.pages()
    }
}

impl Maintain for StaticPool<Canvas> {
    fn tidy(&mut self, ctx: &mut FlatPageStore) {
        self.startup(&*ctx);
    }

    fn drained(&mut self, _: &mut FlatPageStore) -> bool {
        self.free_count() == self.capacity()
    }
}

impl Maintain for GrowablePool<Canvas> {
    fn tidy(&mut self, ctx: &mut FlatPageStore) {
        self.rearrange_free_list_and_shrink(ctx, 1);
    }

    fn drained(&mut self, ctx: &mut FlatPageStore) -> bool {
        while self.shrink(ctx) {}
        self.pages() == 0 && ctx.pages_in_use() == 0
    }
}

impl Maintain for LayeredPool<Canvas> {
    fn tidy(&mut self, ctx: &mut FlatPageStore) {
        self.startup(&*ctx);
        self.rearrange_free_list_and_shrink(ctx, 1);
    }

    fn drained(&mut self, ctx: &mut FlatPageStore) -> bool {
        while self.shrink(ctx) {}
        self.growable_tier().pages() == 0 && self.static_tier().free_count() == self.capacity()
    }
}

/// A pool together with the page store it draws from.
pub struct PoolSubject<P> {
    ctx: FlatPageStore,
    pool: P,
}

impl<P> PoolSubject<P> {
    fn with_store(
        num_pages: u32,
        make: impl FnOnce(&mut FlatPageStore) -> Result<P, AllocInitError>,
    ) -> Result<Self, AllocInitError> {
        let mut ctx = FlatPageStore::new(num_pages)?;
        let pool = make(&mut ctx)?;
        Ok(PoolSubject { ctx, pool })
    }
}

pub type FixedSubject = PoolSubject<FixedPagePool<Canvas>>;
pub type WriteOnceSubject = PoolSubject<WriteOncePool<Canvas>>;
pub type StaticSubject = PoolSubject<StaticPool<Canvas>>;
pub type GrowableSubject = PoolSubject<GrowablePool<Canvas>>;
pub type LayeredSubject = PoolSubject<LayeredPool<Canvas>>;

impl FixedSubject {
    pub fn new(num_pages: u32) -> Result<Self, AllocInitError> {
        Self::with_store(num_pages, |_| FixedPagePool::new())
    }
}

impl WriteOnceSubject {
    pub fn new(num_pages: u32) -> Result<Self, AllocInitError> {
        Self::with_store(num_pages, |_| WriteOncePool::new())
    }
}

impl StaticSubject {
    pub fn new(num_pages: u32, capacity: u32) -> Result<Self, AllocInitError> {
        Self::with_store(num_pages, |ctx| StaticPool::init(ctx, capacity))
    }
}

impl GrowableSubject {
    pub fn new(num_pages: u32) -> Result<Self, AllocInitError> {
        Self::with_store(num_pages, |_| GrowablePool::new())
    }
}

impl LayeredSubject {
    pub fn new(num_pages: u32, capacity: u32) -> Result<Self, AllocInitError> {
        Self::with_store(num_pages, |ctx| LayeredPool::init(ctx, capacity))
    }
}

impl<P: Maintain> Subject for PoolSubject<P> {
    type Handle = Ptr<Canvas>;

    fn seize(&mut self, id: u64) -> Option<Ptr<Canvas>> {
        self.pool.seize(
            &mut self.ctx,
            Canvas {
                paint: [id; CANVAS_WORDS],
            },
        )
    }

    fn index(&self, handle: &Ptr<Canvas>) -> u32 {
        handle.index()
    }

    fn verify(&self, handle: &Ptr<Canvas>, id: u64) -> bool {
        // The tag and generation are checked before the record is read.
        let canvas = self.pool.get(&self.ctx, handle);
        canvas.paint.iter().all(|&word| word == id)
    }

    fn release(&mut self, handle: Ptr<Canvas>) -> u64 {
        let canvas = self.pool.release(&mut self.ctx, handle);
        canvas.paint[0]
    }

    fn tidy(&mut self) {
        self.pool.tidy(&mut self.ctx);
    }

    fn drained(&mut self) -> bool {
        self.pool.drained(&mut self.ctx)
    }
}

#[cfg(test)]
mod tests {
    use pool_hater::{Evaluator, PoolOp};

    use super::*;

    fn workload() -> Vec<PoolOp> {
        let mut ops = Vec::new();
        for round in 0..40 {
            ops.extend([PoolOp::Seize, PoolOp::Seize, PoolOp::Seize]);
            ops.push(PoolOp::Release(round * 7));
            if round % 5 == 0 {
                ops.push(PoolOp::Tidy);
            }
        }
        ops
    }

    #[test]
    fn every_pool_survives_workload() {
        Evaluator::new(FixedSubject::new(16).unwrap())
            .evaluate(workload())
            .unwrap();
        Evaluator::new(WriteOnceSubject::new(16).unwrap())
            .evaluate(workload())
            .unwrap();
        Evaluator::new(StaticSubject::new(16, 100).unwrap())
            .evaluate(workload())
            .unwrap();
        Evaluator::new(GrowableSubject::new(16).unwrap())
            .evaluate(workload())
            .unwrap();
        Evaluator::new(LayeredSubject::new(16, 25).unwrap())
            .evaluate(workload())
            .unwrap();
    }
}
