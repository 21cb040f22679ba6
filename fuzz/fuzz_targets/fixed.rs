#![no_main]
use arbitrary::{Arbitrary, Unstructured};
use libfuzzer_sys::fuzz_target;
use pool_hater::PoolOp;
use slot_pool_hater::FixedSubject;

const MAX_PAGES: u32 = 256;

#[derive(Clone, Debug)]
struct Args {
    num_pages: u32,
    ops: Vec<PoolOp>,
}

impl Arbitrary<'_> for Args {
    fn arbitrary(un: &mut Unstructured) -> arbitrary::Result<Args> {
        let num_pages = u32::arbitrary(un)? % MAX_PAGES + 1;
        let ops = Vec::arbitrary(un)?;

        Ok(Args { num_pages, ops })
    }
}

fuzz_target!(|args: Args| {
    let subject = match FixedSubject::new(args.num_pages) {
        Ok(s) => s,
        Err(_) => return,
    };

    let mut eval = pool_hater::Evaluator::new(subject);
    eval.evaluate(args.ops).unwrap();
});
