//! A small library for ~~hating on~~ evaluating the correctness of slot pools.
#![deny(unsafe_op_in_unsafe_fn)]

use std::collections::HashSet;

use arbitrary::Arbitrary;

#[derive(Arbitrary)]
enum PoolOpTag {
    Seize,
    Release,
    Tidy,
}

/// One step of a pool workload.
#[derive(Clone, Debug)]
pub enum PoolOp {
    /// Seize a record and paint it with the id of this operation.
    Seize,
    /// Release a live record.
    ///
    /// Given `n` live records, the record to release is at index `idx % n`.
    Release(usize),
    /// Run the subject's optional maintenance step.
    Tidy,
}

impl Arbitrary<'_> for PoolOp {
    fn arbitrary(u: &mut arbitrary::Unstructured<'_>) -> arbitrary::Result<Self> {
        let tag = PoolOpTag::arbitrary(u)?;

        let op = match tag {
            PoolOpTag::Seize => PoolOp::Seize,
            PoolOpTag::Release => PoolOp::Release(usize::arbitrary(u)?),
            PoolOpTag::Tidy => PoolOp::Tidy,
        };

        Ok(op)
    }
}

pub trait Subject {
    type Handle: Copy;

    /// Seizes a record and paints it with `id`.
    ///
    /// Returns `None` if the pool cannot supply a record.
    fn seize(&mut self, id: u64) -> Option<Self::Handle>;

    /// Returns the index that identifies the record named by `handle`.
    fn index(&self, handle: &Self::Handle) -> u32;

    /// Verifies that the record named by `handle` still carries the paint of
    /// `id`.
    fn verify(&self, handle: &Self::Handle, id: u64) -> bool;

    /// Releases the record named by `handle`, returning the id it was painted
    /// with.
    fn release(&mut self, handle: Self::Handle) -> u64;

    fn tidy(&mut self) {}

    /// Checks that the subject has returned what it can once every record has
    /// been released.
    fn drained(&mut self) -> bool {
        true
    }
}

/// A live record and the id it was painted with.
struct Live<H> {
    handle: H,
    id: u64,
}

pub struct Evaluator<S: Subject> {
    subject: S,
}

#[derive(Clone, Debug)]
pub struct Failed {
    pub completed: Vec<PoolOp>,
    pub failed_op: Option<PoolOp>,
}

impl<S: Subject> Evaluator<S> {
    pub fn new(subject: S) -> Evaluator<S> {
        Evaluator { subject }
    }

    pub fn into_subject(self) -> S {
        self.subject
    }

    fn release(&mut self, live: Live<S::Handle>) -> bool {
        self.subject.verify(&live.handle, live.id) && self.subject.release(live.handle) == live.id
    }

    pub fn evaluate<I>(&mut self, ops: I) -> Result<(), Failed>
    where
        I: IntoIterator<Item = PoolOp>,
    {
        let mut completed = Vec::new();
        let mut live: Vec<Live<S::Handle>> = Vec::new();
        let mut indices = HashSet::new();

        for (op_id, op) in ops.into_iter().enumerate() {
            let op_id: u64 = op_id.try_into().unwrap();

            let ok = match op {
                PoolOp::Seize => match self.subject.seize(op_id) {
                    // Two live records may never share an index.
                    Some(handle) => {
                        let fresh = indices.insert(self.subject.index(&handle));
                        live.push(Live { handle, id: op_id });
                        fresh
                    }
                    None => true,
                },

                PoolOp::Release(raw_idx) => {
                    if live.is_empty() {
                        true
                    } else {
                        let l = live.swap_remove(raw_idx % live.len());
                        indices.remove(&self.subject.index(&l.handle));
                        self.release(l)
                    }
                }

                PoolOp::Tidy => {
                    self.subject.tidy();
                    true
                }
            };

            if !ok {
                return Err(Failed {
                    completed,
                    failed_op: Some(op),
                });
            }

            completed.push(op);
        }

        for l in live {
            if !self.release(l) {
                return Err(Failed {
                    completed,
                    failed_op: None,
                });
            }
        }

        if !self.subject.drained() {
            return Err(Failed {
                completed,
                failed_op: None,
            });
        }

        Ok(())
    }
}
