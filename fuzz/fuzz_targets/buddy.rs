#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use slot_pool::{BuddyPageAllocator, PageRun};

const MAX_PAGES: u32 = 1024;

#[derive(Clone, Debug, Arbitrary)]
enum BuddyOp {
    Alloc { wanted: u16, min: u16 },
    Release(usize),
}

#[derive(Clone, Debug, Arbitrary)]
struct Args {
    num_pages: u16,
    ops: Vec<BuddyOp>,
}

fuzz_target!(|args: Args| {
    let num_pages = u32::from(args.num_pages) % MAX_PAGES + 1;
    let mut pages = match BuddyPageAllocator::try_with_pages(num_pages) {
        Ok(p) => p,
        Err(_) => return,
    };

    let mut outstanding: Vec<PageRun> = Vec::new();

    for op in args.ops {
        match op {
            BuddyOp::Alloc { wanted, min } => {
                let wanted = u32::from(wanted) % num_pages + 1;
                let min = u32::from(min) % wanted + 1;

                if let Some(run) = pages.alloc(wanted, min) {
                    assert!(run.count >= min && run.count <= wanted);
                    assert!(run.end() <= num_pages);
                    assert!(outstanding
                        .iter()
                        .all(|r| run.end() <= r.start || r.end() <= run.start));
                    outstanding.push(run);
                }
            }

            BuddyOp::Release(raw_idx) => {
                if outstanding.is_empty() {
                    continue;
                }

                let run = outstanding.swap_remove(raw_idx % outstanding.len());
                pages.release(run.start, run.count);
            }
        }

        let in_use: u32 = outstanding.iter().map(|r| r.count).sum();
        assert_eq!(pages.free_pages() + in_use, num_pages);
    }

    for run in outstanding {
        pages.release(run.start, run.count);
    }

    assert!(pages.alloc(num_pages, num_pages).is_some());
});
