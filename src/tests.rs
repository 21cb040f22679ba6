#![cfg(test)]

use core::fmt::Debug;

use quickcheck::{Arbitrary, Gen, QuickCheck};
use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::{
    list::{DlcFifoList, Link},
    AllocInitError, BuddyPageAllocator, FixedPagePool, FlatPageStore, GrowablePageMap,
    GrowablePool, LayeredPool, PageMapError, PageRun, Ptr, Record, RecordTypeId, SlotPool,
    StaticPool, WriteOncePool,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

// Miri is substantially slower to run property tests, so the number of test
// cases is reduced to keep the runtime in check.

#[cfg(not(miri))]
const MAX_TESTS: u64 = 100;

#[cfg(miri)]
const MAX_TESTS: u64 = 20;

/// Pages in the store each pool property runs against.
const STORE_PAGES: u32 = 64;

type OpId = u32;

const PAINT_WORDS: usize = 1023;

/// A record filled with the id of the operation that seized it.
struct Painted {
    op_id: OpId,
    paint: [u32; PAINT_WORDS],
}

impl Record for Painted {
    const TYPE_ID: RecordTypeId = RecordTypeId::new(0x42, 7);
}

impl Painted {
    fn new(op_id: OpId) -> Painted {
        Painted {
            op_id,
            paint: [op_id; PAINT_WORDS],
        }
    }

    fn is_painted(&self, op_id: OpId) -> bool {
        self.op_id == op_id && self.paint.iter().all(|&w| w == op_id)
    }
}

trait QcPool: SlotPool<Painted> + Sized {
    type Params: Arbitrary + Debug;

    fn with_params(ctx: &mut FlatPageStore, params: Self::Params) -> Result<Self, AllocInitError>;

    /// Runs the pool's optional maintenance step.
    fn tidy(&mut self, ctx: &mut FlatPageStore) {
        let _ = ctx;
    }

    /// Checks the pool's accounting against the indices of its live records.
    fn consistent(&self, live: &[u32]) -> bool {
        let _ = live;
        true
    }

    /// Checks the pool once every record has been released.
    fn drained(&mut self, ctx: &mut FlatPageStore) -> bool {
        let _ = ctx;
        true
    }
}

// Recycling ==================================================================

impl QcPool for FixedPagePool<Painted> {
    type Params = ();

    fn with_params(_: &mut FlatPageStore, _: ()) -> Result<Self, AllocInitError> {
        FixedPagePool::new()
    }

    fn drained(&mut self, ctx: &mut FlatPageStore) -> bool {
        // Only the current page outlives its records.
        self.pages() <= 1 && ctx.pages_in_use() == self.pages()
    }
}

// Write-once =================================================================

impl QcPool for WriteOncePool<Painted> {
    type Params = ();

    fn with_params(_: &mut FlatPageStore, _: ()) -> Result<Self, AllocInitError> {
        WriteOncePool::new()
    }

    fn drained(&mut self, ctx: &mut FlatPageStore) -> bool {
        self.pages() <= 1 && ctx.pages_in_use() == self.pages()
    }
}

// Static =====================================================================

#[derive(Clone, Debug)]
struct StaticParams {
    capacity: u32,
}

impl Arbitrary for StaticParams {
    fn arbitrary(g: &mut Gen) -> Self {
        StaticParams {
            capacity: u32::arbitrary(g) % 48 + 1,
        }
    }

    fn shrink(&self) -> Box<dyn Iterator<Item = Self>> {
        Box::new(
            self.capacity
                .shrink()
                .filter(|&capacity| capacity > 0)
                .map(|capacity| StaticParams { capacity }),
        )
    }
}

impl QcPool for StaticPool<Painted> {
    type Params = StaticParams;

    fn with_params(ctx: &mut FlatPageStore, params: StaticParams) -> Result<Self, AllocInitError> {
        StaticPool::init(ctx, params.capacity)
    }

    fn tidy(&mut self, ctx: &mut FlatPageStore) {
        self.startup(&*ctx);
    }

    fn consistent(&self, live: &[u32]) -> bool {
        live.iter().all(|&i| i < self.capacity())
            && self.free_count() as usize + live.len() == self.capacity() as usize
    }

    fn drained(&mut self, _: &mut FlatPageStore) -> bool {
        self.free_count() == self.capacity()
    }
}

// Growable ===================================================================

fn growable_consistent(pool: &GrowablePool<Painted>, live: usize) -> bool {
    let slots = pool.pages() as usize * pool.layout().slots_per_page as usize;
    pool.free_count() as usize + live <= slots
}

fn growable_drained(pool: &mut GrowablePool<Painted>, ctx: &mut FlatPageStore) -> bool {
    while pool.shrink(ctx) {}
    pool.pages() == 0 && pool.free_count() == 0
}

impl QcPool for GrowablePool<Painted> {
    type Params = ();

    fn with_params(_: &mut FlatPageStore, _: ()) -> Result<Self, AllocInitError> {
        GrowablePool::new()
    }

    fn tidy(&mut self, ctx: &mut FlatPageStore) {
        self.rearrange_free_list_and_shrink(ctx, 2);
    }

    fn consistent(&self, live: &[u32]) -> bool {
        growable_consistent(self, live.len())
    }

    fn drained(&mut self, ctx: &mut FlatPageStore) -> bool {
        growable_drained(self, ctx) && ctx.pages_in_use() == 0
    }
}

// Layered ====================================================================

impl QcPool for LayeredPool<Painted> {
    type Params = StaticParams;

    fn with_params(ctx: &mut FlatPageStore, params: StaticParams) -> Result<Self, AllocInitError> {
        LayeredPool::init(ctx, params.capacity)
    }

    fn tidy(&mut self, ctx: &mut FlatPageStore) {
        self.startup(&*ctx);
        self.rearrange_free_list_and_shrink(ctx, 1);
    }

    fn consistent(&self, live: &[u32]) -> bool {
        let capacity = self.capacity();
        let in_static = live.iter().filter(|&&i| i < capacity).count();

        self.static_tier().free_count() as usize + in_static == capacity as usize
            && growable_consistent(self.growable_tier(), live.len() - in_static)
    }

    fn drained(&mut self, ctx: &mut FlatPageStore) -> bool {
        while self.shrink(ctx) {}

        self.static_tier().free_count() == self.capacity()
            && self.growable_tier().pages() == 0
            && self.growable_tier().free_count() == 0
    }
}

// Operation sequences ========================================================

#[derive(Clone, Debug)]
enum PoolOp {
    Seize,
    /// Given `n` live records, the record to release is at `index % n`.
    Release {
        index: usize,
    },
    Tidy,
}

enum PoolOpTag {
    Seize,
    Release,
    Tidy,
}

impl Arbitrary for PoolOp {
    fn arbitrary(g: &mut Gen) -> Self {
        match g
            .choose(&[
                PoolOpTag::Seize,
                PoolOpTag::Seize,
                PoolOpTag::Release,
                PoolOpTag::Tidy,
            ])
            .unwrap()
        {
            PoolOpTag::Seize => PoolOp::Seize,
            PoolOpTag::Release => PoolOp::Release {
                index: usize::arbitrary(g),
            },
            PoolOpTag::Tidy => PoolOp::Tidy,
        }
    }
}

struct PoolChecker<P> {
    ctx: FlatPageStore,
    pool: P,
    live: Vec<(OpId, Ptr<Painted>)>,
    num_ops: u32,
}

impl<P: QcPool> PoolChecker<P> {
    fn new(params: P::Params) -> Result<Self, AllocInitError> {
        let mut ctx = FlatPageStore::new(STORE_PAGES)?;
        let pool = P::with_params(&mut ctx, params)?;

        Ok(PoolChecker {
            ctx,
            pool,
            live: Vec::new(),
            num_ops: 0,
        })
    }

    fn release(&mut self, op_id: OpId, ptr: Ptr<Painted>) -> bool {
        if !self.pool.get(&self.ctx, &ptr).is_painted(op_id) {
            return false;
        }

        let value = self.pool.release(&mut self.ctx, ptr);
        if value.op_id != op_id {
            return false;
        }

        // A released slot no longer carries a live tag.
        self.pool.get_valid_ptr(&self.ctx, ptr.index()).is_none()
    }

    fn do_op(&mut self, op: PoolOp) -> bool {
        let op_id = self.num_ops;
        self.num_ops += 1;

        match op {
            PoolOp::Seize => {
                if let Some(ptr) = self.pool.seize(&mut self.ctx, Painted::new(op_id)) {
                    if self.live.iter().any(|(_, p)| p.index() == ptr.index()) {
                        return false;
                    }

                    match self.pool.get_valid_ptr(&self.ctx, ptr.index()) {
                        Some(found) if found == ptr => (),
                        _ => return false,
                    }

                    self.live.push((op_id, ptr));
                }
            }

            PoolOp::Release { index } => {
                if self.live.is_empty() {
                    return true;
                }

                let (id, ptr) = self.live.swap_remove(index % self.live.len());
                if !self.release(id, ptr) {
                    return false;
                }
            }

            PoolOp::Tidy => self.pool.tidy(&mut self.ctx),
        }

        let indices: Vec<u32> = self.live.iter().map(|(_, p)| p.index()).collect();
        self.pool.consistent(&indices)
    }

    fn run(&mut self, ops: Vec<PoolOp>) -> bool {
        if !ops.into_iter().all(|op| self.do_op(op)) {
            return false;
        }

        let live: Vec<_> = self.live.drain(..).collect();
        for (id, ptr) in live {
            if !self.release(id, ptr) {
                return false;
            }
        }

        self.pool.drained(&mut self.ctx)
    }
}

fn check<P: QcPool>(params: P::Params, ops: Vec<PoolOp>) -> bool {
    init_logging();

    let mut checker = PoolChecker::<P>::new(params).unwrap();
    checker.run(ops)
}

#[test]
fn recycling_records_are_mutually_exclusive() {
    let mut qc = QuickCheck::new().max_tests(MAX_TESTS);
    qc.quickcheck(check::<FixedPagePool<Painted>> as fn(_, _) -> bool);
}

#[test]
fn write_once_records_are_mutually_exclusive() {
    let mut qc = QuickCheck::new().max_tests(MAX_TESTS);
    qc.quickcheck(check::<WriteOncePool<Painted>> as fn(_, _) -> bool);
}

#[test]
fn static_records_are_mutually_exclusive() {
    let mut qc = QuickCheck::new().max_tests(MAX_TESTS);
    qc.quickcheck(check::<StaticPool<Painted>> as fn(_, _) -> bool);
}

#[test]
fn growable_records_are_mutually_exclusive() {
    let mut qc = QuickCheck::new().max_tests(MAX_TESTS);
    qc.quickcheck(check::<GrowablePool<Painted>> as fn(_, _) -> bool);
}

#[test]
fn layered_records_are_mutually_exclusive() {
    let mut qc = QuickCheck::new().max_tests(MAX_TESTS);
    qc.quickcheck(check::<LayeredPool<Painted>> as fn(_, _) -> bool);
}

#[test]
fn static_startup_is_idempotent() {
    init_logging();

    let mut ctx = FlatPageStore::new(STORE_PAGES).unwrap();
    let mut pool = StaticPool::<Painted>::init(&mut ctx, 30).unwrap();

    let a = pool.seize(&mut ctx, Painted::new(1)).unwrap();
    while pool.startup(&ctx) {}
    assert!(!pool.startup(&ctx));
    assert_eq!(pool.free_count(), 29);

    let b = pool.seize(&mut ctx, Painted::new(2)).unwrap();
    assert_ne!(a.index(), b.index());
    assert!(pool.get(&ctx, &a).is_painted(1));

    let mut indices = vec![a.index(), b.index()];
    while let Some(p) = pool.seize(&mut ctx, Painted::new(3)) {
        indices.push(p.index());
    }
    assert!(!pool.startup(&ctx));

    indices.sort_unstable();
    assert_eq!(indices, (0..30).collect::<Vec<_>>());
}

// Buddy ======================================================================

const BUDDY_PAGES: u32 = 256;

#[derive(Clone, Debug)]
enum BuddyOp {
    Alloc { wanted: u32, min: u32 },
    Release { index: usize },
}

impl Arbitrary for BuddyOp {
    fn arbitrary(g: &mut Gen) -> Self {
        if bool::arbitrary(g) {
            let wanted = u32::arbitrary(g) % 64 + 1;
            let min = u32::arbitrary(g) % wanted + 1;
            BuddyOp::Alloc { wanted, min }
        } else {
            BuddyOp::Release {
                index: usize::arbitrary(g),
            }
        }
    }
}

fn overlaps(a: &PageRun, b: &PageRun) -> bool {
    a.start < b.end() && b.start < a.end()
}

fn check_buddy(ops: Vec<BuddyOp>) -> bool {
    init_logging();

    let mut pages = BuddyPageAllocator::try_with_pages(BUDDY_PAGES).unwrap();
    let mut runs: Vec<PageRun> = Vec::new();

    for op in ops {
        match op {
            BuddyOp::Alloc { wanted, min } => {
                if let Some(run) = pages.alloc(wanted, min) {
                    if run.count < min || run.count > wanted || run.end() > BUDDY_PAGES {
                        return false;
                    }

                    if runs.iter().any(|r| overlaps(r, &run)) {
                        return false;
                    }

                    runs.push(run);
                }
            }

            BuddyOp::Release { index } => {
                if runs.is_empty() {
                    continue;
                }

                let run = runs.swap_remove(index % runs.len());
                pages.release(run.start, run.count);
            }
        }

        pages.check_invariants();

        let in_use: u32 = runs.iter().map(|r| r.count).sum();
        if pages.free_pages() + in_use != BUDDY_PAGES {
            return false;
        }
    }

    for run in runs {
        pages.release(run.start, run.count);
    }

    // Everything coalesces back into one run.
    pages.alloc(BUDDY_PAGES, BUDDY_PAGES).is_some()
}

#[test]
fn buddy_runs_are_mutually_exclusive() {
    let mut qc = QuickCheck::new().max_tests(MAX_TESTS);
    qc.quickcheck(check_buddy as fn(_) -> bool);
}

#[test]
fn buddy_random_stress() {
    init_logging();

    let mut rng = StdRng::seed_from_u64(0x5107_9001);
    let mut pages = BuddyPageAllocator::try_with_pages(512).unwrap();
    let mut runs: Vec<PageRun> = Vec::new();

    let rounds = if cfg!(miri) { 200 } else { 10_000 };
    for round in 0..rounds {
        if runs.is_empty() || rng.gen_bool(0.55) {
            let wanted = rng.gen_range(1..=100);
            let min = rng.gen_range(1..=wanted);
            if let Some(run) = pages.alloc(wanted, min) {
                runs.push(run);
            }
        } else {
            let run = runs.swap_remove(rng.gen_range(0..runs.len()));
            pages.release(run.start, run.count);
        }

        if round % 100 == 0 {
            pages.check_invariants();
        }
    }

    for run in runs.drain(..) {
        pages.release(run.start, run.count);
    }

    pages.check_invariants();
    assert_eq!(pages.free_pages(), 512);
    assert_eq!(pages.alloc(512, 512).map(|r| r.count), Some(512));
}

#[test]
fn buddy_release_order_decides_coalescing() {
    init_logging();

    let mut pages = BuddyPageAllocator::try_with_pages(64).unwrap();
    let ten = pages.alloc(10, 10).unwrap();
    let twenty = pages.alloc(20, 20).unwrap();
    let thirty = pages.alloc(30, 30).unwrap();
    assert_eq!(pages.free_pages(), 4);
    assert!(pages.alloc(30, 30).is_none());

    // Only the four trailing pages can satisfy a partial request.
    let tail = pages.alloc(30, 4).unwrap();
    assert_eq!(tail, PageRun { start: 60, count: 4 });
    pages.release(tail.start, tail.count);

    // Freeing the 30-page run merges it with the tail.
    pages.release(thirty.start, thirty.count);
    pages.check_invariants();
    let again = pages.alloc(30, 30).unwrap();
    pages.release(again.start, again.count);

    // Freeing the 10-page run instead leaves no 30-page run.
    let thirty = pages.alloc(30, 30).unwrap();
    pages.release(ten.start, ten.count);
    assert!(pages.alloc(30, 30).is_none());

    pages.release(twenty.start, twenty.count);
    pages.release(thirty.start, thirty.count);
    pages.check_invariants();
    assert_eq!(pages.alloc(64, 64).map(|r| r.count), Some(64));
}

// Page map ===================================================================

#[derive(Clone, Debug)]
enum MapOp {
    Seize,
    ReleaseTop,
    /// Attempts to release the page `back % (len - 1) + 1` below the top.
    ReleaseBelow { back: u32 },
}

impl Arbitrary for MapOp {
    fn arbitrary(g: &mut Gen) -> Self {
        match u8::arbitrary(g) % 3 {
            0 => MapOp::Seize,
            1 => MapOp::ReleaseTop,
            _ => MapOp::ReleaseBelow {
                back: u32::arbitrary(g),
            },
        }
    }
}

fn check_page_map(ops: Vec<MapOp>) -> bool {
    init_logging();

    let mut ctx = FlatPageStore::new(256).unwrap();
    let mut map = GrowablePageMap::new(RecordTypeId::new(0x43, 0));
    let mut physical: Vec<u32> = Vec::new();

    for op in ops {
        match op {
            MapOp::Seize => {
                if let Some(mapped) = map.seize(&mut ctx) {
                    if mapped.logical as usize != physical.len() || physical.contains(&mapped.physical) {
                        return false;
                    }

                    physical.push(mapped.physical);
                }
            }

            MapOp::ReleaseTop => {
                let Some(top) = map.top() else {
                    continue;
                };

                if map.release(&mut ctx, top).is_err() {
                    return false;
                }

                physical.pop();
                if map.top() != top.checked_sub(1) {
                    return false;
                }
            }

            MapOp::ReleaseBelow { back } => {
                let Some(top) = map.top() else {
                    continue;
                };
                if top == 0 {
                    continue;
                }

                let logical = top - (back % top + 1);
                let expected = PageMapError::NotTop {
                    requested: logical,
                    top: Some(top),
                };

                if map.release(&mut ctx, logical) != Err(expected) || map.top() != Some(top) {
                    return false;
                }
            }
        }

        if map.len() as usize != physical.len() {
            return false;
        }

        let mapped = physical
            .iter()
            .enumerate()
            .all(|(logical, &p)| map.physical(&ctx, logical as u32) == Some(p));
        if !mapped {
            return false;
        }
    }

    while let Some(top) = map.top() {
        if map.release(&mut ctx, top).is_err() {
            return false;
        }
    }

    map.index_page_count() == 0 && ctx.pages_in_use() == 0
}

#[test]
fn page_map_release_is_top_only() {
    let mut qc = QuickCheck::new().max_tests(MAX_TESTS);
    qc.quickcheck(check_page_map as fn(_) -> bool);
}

// Lists ======================================================================

const LIST_NODES: u32 = 32;

#[derive(Default)]
struct Node {
    link: Link,
}

enum Queue {}

crate::impl_links!(Node, Queue, link);

#[derive(Clone, Debug)]
enum ListOp {
    PushFront(u32),
    PushBack(u32),
    PopFront,
    PopBack,
    Remove(u32),
    /// Moves the list onto the back of a second list built from `nodes`.
    AppendTo { nodes: Vec<u32> },
}

impl Arbitrary for ListOp {
    fn arbitrary(g: &mut Gen) -> Self {
        match u8::arbitrary(g) % 6 {
            0 => ListOp::PushFront(u32::arbitrary(g)),
            1 => ListOp::PushBack(u32::arbitrary(g)),
            2 => ListOp::PopFront,
            3 => ListOp::PopBack,
            4 => ListOp::Remove(u32::arbitrary(g)),
            _ => ListOp::AppendTo {
                nodes: Vec::arbitrary(g),
            },
        }
    }
}

fn check_counted_list(ops: Vec<ListOp>) -> bool {
    let mut store: Vec<Node> = (0..LIST_NODES).map(|_| Node::default()).collect();
    let mut list = DlcFifoList::<Queue>::new();
    let mut members = vec![false; LIST_NODES as usize];

    for op in ops {
        match op {
            ListOp::PushFront(n) | ListOp::PushBack(n) => {
                let n = n % LIST_NODES;
                if members[n as usize] {
                    continue;
                }

                if matches!(op, ListOp::PushFront(_)) {
                    list.push_front(&mut store, n);
                } else {
                    list.push_back(&mut store, n);
                }
                members[n as usize] = true;
            }

            ListOp::PopFront | ListOp::PopBack => {
                let popped = if matches!(op, ListOp::PopFront) {
                    list.pop_front(&mut store)
                } else {
                    list.pop_back(&mut store)
                };

                if let Some(n) = popped {
                    members[n as usize] = false;
                }
            }

            ListOp::Remove(n) => {
                let n = n % LIST_NODES;
                if members[n as usize] {
                    list.remove(&mut store, n);
                    members[n as usize] = false;
                }
            }

            ListOp::AppendTo { nodes } => {
                let mut front = DlcFifoList::<Queue>::new();
                for n in nodes {
                    let n = n % LIST_NODES;
                    if !members[n as usize] {
                        front.push_back(&mut store, n);
                        members[n as usize] = true;
                    }
                }

                front.append(&mut store, &mut list);
                if !list.is_empty() || list.count() != 0 {
                    return false;
                }
                list = front;
            }
        }

        let walked = list.iter(&store).count();
        let expected = members.iter().filter(|&&m| m).count();
        if list.count() as usize != walked || walked != expected {
            return false;
        }

        let reversed = {
            let mut v = Vec::new();
            let mut cur = list.last();
            while let Some(n) = cur {
                v.push(n);
                cur = store[n as usize].link.prev;
            }
            v
        };
        if reversed.len() != walked {
            return false;
        }
    }

    true
}

#[test]
fn counted_list_count_matches_walk() {
    let mut qc = QuickCheck::new().max_tests(MAX_TESTS);
    qc.quickcheck(check_counted_list as fn(_) -> bool);
}

// Version sync ================================================================
#[test]
fn html_root_url() {
    version_sync::assert_html_root_url_updated!("src/lib.rs");
}

#[test]
fn readme_deps() {
    version_sync::assert_markdown_deps_updated!("README.md");
}
