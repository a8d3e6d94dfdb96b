use super::Cfg;
use crate::ir::Id;

/// Accumulates the common dominator of a set of blocks.
///
/// Each [`add_block`](Self::add_block) meets the running answer with the new
/// block's chain to the entry. Unreachable blocks are ignored.
#[derive(Debug, Clone)]
pub struct DominatorBuilder<'a> {
    cfg: &'a Cfg,
    dominator: Option<Id>,
}

impl<'a> DominatorBuilder<'a> {
    pub fn new(cfg: &'a Cfg) -> Self {
        DominatorBuilder {
            cfg,
            dominator: None,
        }
    }

    pub fn add_block(&mut self, block: Id) {
        if !self.cfg.is_reachable(block) {
            return;
        }
        self.dominator = Some(match self.dominator {
            None => block,
            Some(current) => self.cfg.find_common_dominator(current, block),
        });
    }

    pub fn get_dominator(&self) -> Option<Id> {
        self.dominator
    }

    /// Move a dominator that sits on a loop latch up to the loop header.
    ///
    /// A block with an outgoing back edge is emitted as part of the loop's
    /// continue construct, which cannot hold declarations visible to the
    /// rest of the iteration. The header dominates the latch, so declaring
    /// there keeps every access in scope.
    pub fn lift_continue_block_dominator(&mut self) {
        let Some(dominator) = self.dominator else {
            return;
        };
        let header = self
            .cfg
            .successors(dominator)
            .iter()
            .copied()
            .filter(|&succ| self.cfg.is_back_edge(dominator, succ))
            .min_by_key(|&succ| self.cfg.dominator_depth(succ));
        if let Some(header) = header {
            self.dominator = Some(header);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::function_ir;
    use super::*;
    use crate::ir::{Merge, Terminator};

    fn looped() -> Cfg {
        let ir = function_ir(&[
            (10, Terminator::Direct(11), Merge::None),
            (
                11,
                Terminator::Select {
                    condition: 40,
                    true_block: 12,
                    false_block: 14,
                },
                Merge::Loop {
                    merge_block: 14,
                    continue_block: 13,
                },
            ),
            (12, Terminator::Direct(13), Merge::None),
            (13, Terminator::Direct(11), Merge::None),
            (14, Terminator::Return(None), Merge::None),
        ]);
        Cfg::new(&ir, 1).unwrap()
    }

    #[test]
    fn singleton_sets_dominate_themselves() {
        let cfg = looped();
        for &block in cfg.post_order() {
            let mut builder = DominatorBuilder::new(&cfg);
            builder.add_block(block);
            assert_eq!(builder.get_dominator(), Some(block));
        }
    }

    #[test]
    fn merging_meets_at_common_dominator() {
        let cfg = looped();
        let mut builder = DominatorBuilder::new(&cfg);
        builder.add_block(12);
        builder.add_block(14);
        assert_eq!(builder.get_dominator(), Some(11));
        builder.add_block(10);
        assert_eq!(builder.get_dominator(), Some(10));
    }

    #[test]
    fn continue_block_dominator_lifts_to_header() {
        let cfg = looped();
        let mut builder = DominatorBuilder::new(&cfg);
        builder.add_block(13);
        builder.lift_continue_block_dominator();
        assert_eq!(builder.get_dominator(), Some(11));

        let mut builder = DominatorBuilder::new(&cfg);
        builder.add_block(12);
        builder.lift_continue_block_dominator();
        assert_eq!(builder.get_dominator(), Some(12));
    }
}
