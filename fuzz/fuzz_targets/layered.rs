#![no_main]
use arbitrary::{Arbitrary, Unstructured};
use libfuzzer_sys::fuzz_target;
use pool_hater::PoolOp;
use slot_pool_hater::LayeredSubject;

const MAX_PAGES: u32 = 256;
const MAX_CAPACITY: u32 = 4096;

#[derive(Clone, Debug)]
struct Args {
    num_pages: u32,
    capacity: u32,
    ops: Vec<PoolOp>,
}

impl Arbitrary<'_> for Args {
    fn arbitrary(un: &mut Unstructured) -> arbitrary::Result<Args> {
        let num_pages = u32::arbitrary(un)? % MAX_PAGES + 1;
        let capacity = u32::arbitrary(un)? % MAX_CAPACITY + 1;
        let ops = Vec::arbitrary(un)?;

        Ok(Args {
            num_pages,
            capacity,
            ops,
        })
    }
}

fuzz_target!(|args: Args| {
    // The static tier may not fit in the store; that is not a failure.
    let subject = match LayeredSubject::new(args.num_pages, args.capacity) {
        Ok(s) => s,
        Err(_) => return,
    };

    let mut eval = pool_hater::Evaluator::new(subject);
    eval.evaluate(args.ops).unwrap();
});
