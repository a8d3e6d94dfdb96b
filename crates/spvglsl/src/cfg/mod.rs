//! Control-flow graph and dominator tree for one function.
//!
//! ```text
//! SpirFunction ──► edges from terminators ──► iterative DFS post-order
//!                                                  │
//!                     immediate dominators ◄───────┘
//!                            │
//!                            └──► back edges ──► loop headers ──► LoopInfo
//! ```
//!
//! Only blocks reachable from the entry block take part. Loop back edges
//! are found from post-order timestamps alone; the `OpLoopMerge` of the
//! header supplies merge and continue targets once the header is known.

mod dominator;

pub use dominator::DominatorBuilder;

use crate::error::{Error, Result};
use crate::ir::{Id, Merge, ParsedIr};
use log::trace;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Structural facts about one loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopInfo {
    pub header: Id,
    pub merge: Id,
    pub continue_block: Id,
    /// Blocks of the loop construct: dominated by the header and not by the
    /// merge block. Includes the header.
    pub body: BTreeSet<Id>,
}

#[derive(Debug, Clone)]
pub struct Cfg {
    function: Id,
    entry: Id,
    succs: HashMap<Id, Vec<Id>>,
    preds: HashMap<Id, Vec<Id>>,
    post_order: Vec<Id>,
    visit_order: HashMap<Id, usize>,
    idom: HashMap<Id, Id>,
    depth: HashMap<Id, usize>,
    loops: BTreeMap<Id, LoopInfo>,
    innermost: HashMap<Id, Id>,
}

impl Cfg {
    /// Build the CFG of `function`.
    pub fn new(ir: &ParsedIr, function: Id) -> Result<Self> {
        let func = ir.ids.get_function(function)?;
        let mut cfg = Cfg {
            function,
            entry: func.entry_block,
            succs: HashMap::new(),
            preds: HashMap::new(),
            post_order: Vec::new(),
            visit_order: HashMap::new(),
            idom: HashMap::new(),
            depth: HashMap::new(),
            loops: BTreeMap::new(),
            innermost: HashMap::new(),
        };

        for &block_id in &func.blocks {
            let block = ir.ids.get_block(block_id)?;
            let mut targets = block.terminator.successors();
            targets.dedup();
            for &target in &targets {
                let preds = cfg.preds.entry(target).or_default();
                if !preds.contains(&block_id) {
                    preds.push(block_id);
                }
            }
            let mut unique = Vec::with_capacity(targets.len());
            for target in targets {
                if !unique.contains(&target) {
                    unique.push(target);
                }
            }
            cfg.succs.insert(block_id, unique);
        }

        cfg.compute_post_order();
        cfg.compute_dominators();
        cfg.compute_loops(ir)?;
        trace!(
            "cfg for %{function}: {} reachable blocks, {} loops",
            cfg.post_order.len(),
            cfg.loops.len()
        );
        Ok(cfg)
    }

    fn compute_post_order(&mut self) {
        // Explicit stack of (block, next successor index).
        let mut stack: Vec<(Id, usize)> = vec![(self.entry, 0)];
        let mut seen: BTreeSet<Id> = BTreeSet::new();
        seen.insert(self.entry);

        while let Some((block, index)) = stack.pop() {
            let next = self
                .succs
                .get(&block)
                .and_then(|succs| succs.get(index))
                .copied();
            match next {
                Some(succ) => {
                    stack.push((block, index + 1));
                    if seen.insert(succ) {
                        stack.push((succ, 0));
                    }
                }
                None => {
                    self.visit_order.insert(block, self.post_order.len());
                    self.post_order.push(block);
                }
            }
        }
    }

    fn compute_dominators(&mut self) {
        self.idom.insert(self.entry, self.entry);
        let reverse: Vec<Id> = self.post_order.iter().rev().copied().collect();

        let mut changed = true;
        while changed {
            changed = false;
            for &block in &reverse {
                if block == self.entry {
                    continue;
                }
                let mut new_idom: Option<Id> = None;
                for &pred in self.predecessors(block) {
                    if !self.idom.contains_key(&pred) {
                        continue;
                    }
                    new_idom = Some(match new_idom {
                        None => pred,
                        Some(current) => self.intersect(current, pred),
                    });
                }
                if let Some(new_idom) = new_idom {
                    if self.idom.get(&block) != Some(&new_idom) {
                        self.idom.insert(block, new_idom);
                        changed = true;
                    }
                }
            }
        }

        for &block in &reverse {
            let depth = if block == self.entry {
                0
            } else {
                self.idom
                    .get(&block)
                    .and_then(|parent| self.depth.get(parent))
                    .map_or(0, |d| d + 1)
            };
            self.depth.insert(block, depth);
        }
    }

    /// Walk both blocks up the dominator tree until they meet.
    fn intersect(&self, mut a: Id, mut b: Id) -> Id {
        let order = |block: Id| self.visit_order.get(&block).copied().unwrap_or(0);
        while a != b {
            while order(a) < order(b) {
                match self.idom.get(&a) {
                    Some(&parent) if parent != a => a = parent,
                    _ => return self.entry,
                }
            }
            while order(b) < order(a) {
                match self.idom.get(&b) {
                    Some(&parent) if parent != b => b = parent,
                    _ => return self.entry,
                }
            }
        }
        a
    }

    fn compute_loops(&mut self, ir: &ParsedIr) -> Result<()> {
        let mut headers = BTreeSet::new();
        for &from in &self.post_order {
            for &to in self.successors(from) {
                if self.is_back_edge(from, to) {
                    headers.insert(to);
                }
            }
        }

        for header in headers {
            let block = ir.ids.get_block(header)?;
            let (merge, continue_block) = match block.merge {
                Merge::Loop {
                    merge_block,
                    continue_block,
                } => (merge_block, continue_block),
                _ => {
                    return Err(Error::unsupported(format!(
                        "block %{header} is the target of a back edge but declares no loop merge"
                    ))
                    .at_id(header))
                }
            };
            let merge_reachable = self.is_reachable(merge);
            let body = self
                .post_order
                .iter()
                .copied()
                .filter(|&b| {
                    self.dominates(header, b) && !(merge_reachable && self.dominates(merge, b))
                })
                .collect();
            self.loops.insert(
                header,
                LoopInfo {
                    header,
                    merge,
                    continue_block,
                    body,
                },
            );
        }

        // Innermost loop: the containing header deepest in the dominator tree.
        for &block in &self.post_order {
            let innermost = self
                .loops
                .values()
                .filter(|info| info.body.contains(&block))
                .max_by_key(|info| self.dominator_depth(info.header))
                .map(|info| info.header);
            if let Some(header) = innermost {
                self.innermost.insert(block, header);
            }
        }
        Ok(())
    }

    pub fn function(&self) -> Id {
        self.function
    }

    pub fn entry(&self) -> Id {
        self.entry
    }

    pub fn successors(&self, block: Id) -> &[Id] {
        self.succs.get(&block).map_or(&[], Vec::as_slice)
    }

    pub fn predecessors(&self, block: Id) -> &[Id] {
        self.preds.get(&block).map_or(&[], Vec::as_slice)
    }

    /// Reachable blocks in post-order.
    pub fn post_order(&self) -> &[Id] {
        &self.post_order
    }

    pub fn is_reachable(&self, block: Id) -> bool {
        self.visit_order.contains_key(&block)
    }

    /// Post-order index of a reachable block.
    pub fn visit_order(&self, block: Id) -> Option<usize> {
        self.visit_order.get(&block).copied()
    }

    pub fn immediate_dominator(&self, block: Id) -> Option<Id> {
        self.idom.get(&block).copied()
    }

    pub fn dominator_depth(&self, block: Id) -> usize {
        self.depth.get(&block).copied().unwrap_or(0)
    }

    /// Whether `a` dominates `b`. Every block dominates itself.
    pub fn dominates(&self, a: Id, b: Id) -> bool {
        if !self.is_reachable(a) || !self.is_reachable(b) {
            return false;
        }
        let mut current = b;
        loop {
            if current == a {
                return true;
            }
            match self.idom.get(&current) {
                Some(&parent) if parent != current => current = parent,
                _ => return false,
            }
        }
    }

    /// The closest block dominating both `a` and `b`.
    pub fn find_common_dominator(&self, a: Id, b: Id) -> Id {
        if !self.is_reachable(a) {
            return b;
        }
        if !self.is_reachable(b) {
            return a;
        }
        self.intersect(a, b)
    }

    /// Whether the edge `from → to` closes a cycle: in a DFS post-order a
    /// back edge targets a block that finished no earlier than its source.
    pub fn is_back_edge(&self, from: Id, to: Id) -> bool {
        match (self.visit_order(from), self.visit_order(to)) {
            (Some(f), Some(t)) => t >= f,
            _ => false,
        }
    }

    pub fn loop_info(&self, header: Id) -> Option<&LoopInfo> {
        self.loops.get(&header)
    }

    pub fn loops(&self) -> impl Iterator<Item = &LoopInfo> {
        self.loops.values()
    }

    pub fn is_loop_header(&self, block: Id) -> bool {
        self.loops.contains_key(&block)
    }

    /// Header of the innermost loop whose construct contains `block`.
    pub fn innermost_loop(&self, block: Id) -> Option<Id> {
        self.innermost.get(&block).copied()
    }

    /// Headers of all loops containing `block`, outermost first.
    pub fn enclosing_loops(&self, block: Id) -> Vec<Id> {
        let mut headers: Vec<Id> = self
            .loops
            .values()
            .filter(|info| info.body.contains(&block))
            .map(|info| info.header)
            .collect();
        headers.sort_by_key(|&h| self.dominator_depth(h));
        headers
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::ir::{Node, SpirBlock, SpirFunction, Terminator};
    use crate::parser::Header;

    pub(crate) fn function_ir(blocks: &[(Id, Terminator, Merge)]) -> ParsedIr {
        let header = Header {
            magic: spirv::MAGIC_NUMBER,
            version: 0x0001_0000,
            generator: 0,
            bound: 64,
            schema: 0,
        };
        let mut ir = ParsedIr::new(header);
        let function = 1;
        ir.ids
            .set(
                function,
                Node::Function(SpirFunction {
                    self_id: function,
                    return_type: 0,
                    function_type: 0,
                    arguments: Vec::new(),
                    local_variables: Vec::new(),
                    entry_block: blocks[0].0,
                    blocks: blocks.iter().map(|b| b.0).collect(),
                }),
            )
            .unwrap();
        for (id, terminator, merge) in blocks {
            let mut block = SpirBlock::new(*id, function);
            block.terminator = terminator.clone();
            block.merge = *merge;
            if let Merge::Loop { continue_block, .. } = merge {
                ir.continue_blocks.insert(*continue_block, *id);
            }
            ir.ids.set(*id, Node::Block(block)).unwrap();
        }
        ir.function_order.push(function);
        ir
    }

    fn select(condition: Id, t: Id, f: Id) -> Terminator {
        Terminator::Select {
            condition,
            true_block: t,
            false_block: f,
        }
    }

    /// entry(10) → header(11) → body(12) → continue(13) → header; 11 → merge(14)
    fn simple_loop() -> ParsedIr {
        function_ir(&[
            (10, Terminator::Direct(11), Merge::None),
            (
                11,
                select(40, 12, 14),
                Merge::Loop {
                    merge_block: 14,
                    continue_block: 13,
                },
            ),
            (12, Terminator::Direct(13), Merge::None),
            (13, Terminator::Direct(11), Merge::None),
            (14, Terminator::Return(None), Merge::None),
        ])
    }

    #[test]
    fn diamond_dominators() {
        let ir = function_ir(&[
            (10, select(40, 11, 12), Merge::Selection { merge_block: 13 }),
            (11, Terminator::Direct(13), Merge::None),
            (12, Terminator::Direct(13), Merge::None),
            (13, Terminator::Return(None), Merge::None),
        ]);
        let cfg = Cfg::new(&ir, 1).unwrap();
        assert_eq!(cfg.immediate_dominator(13), Some(10));
        assert!(cfg.dominates(10, 12));
        assert!(!cfg.dominates(11, 13));
        assert_eq!(cfg.find_common_dominator(11, 12), 10);
        assert_eq!(cfg.predecessors(13).len(), 2);
    }

    #[test]
    fn loop_back_edge_and_body() {
        let ir = simple_loop();
        let cfg = Cfg::new(&ir, 1).unwrap();
        assert!(cfg.is_back_edge(13, 11));
        assert!(!cfg.is_back_edge(11, 12));
        let info = cfg.loop_info(11).expect("loop at 11");
        assert_eq!(info.merge, 14);
        assert_eq!(info.continue_block, 13);
        assert!(info.body.contains(&12) && info.body.contains(&13));
        assert!(!info.body.contains(&14));
        assert_eq!(cfg.innermost_loop(12), Some(11));
        assert_eq!(cfg.innermost_loop(14), None);
    }

    #[test]
    fn back_edge_without_loop_merge_is_unsupported() {
        let ir = function_ir(&[
            (10, Terminator::Direct(11), Merge::None),
            (11, select(40, 11, 12), Merge::None),
            (12, Terminator::Return(None), Merge::None),
        ]);
        assert!(Cfg::new(&ir, 1).unwrap_err().is_unsupported());
    }

    #[test]
    fn unreachable_blocks_are_ignored() {
        let ir = function_ir(&[
            (10, Terminator::Return(None), Merge::None),
            (11, Terminator::Direct(10), Merge::None),
        ]);
        let cfg = Cfg::new(&ir, 1).unwrap();
        assert!(!cfg.is_reachable(11));
        assert!(!cfg.dominates(11, 10));
        assert_eq!(cfg.find_common_dominator(10, 11), 10);
    }

    #[test]
    fn nested_loops_pick_innermost() {
        let ir = function_ir(&[
            (10, Terminator::Direct(11), Merge::None),
            (
                11,
                select(40, 12, 17),
                Merge::Loop {
                    merge_block: 17,
                    continue_block: 16,
                },
            ),
            (
                12,
                select(41, 13, 15),
                Merge::Loop {
                    merge_block: 15,
                    continue_block: 14,
                },
            ),
            (13, Terminator::Direct(14), Merge::None),
            (14, Terminator::Direct(12), Merge::None),
            (15, Terminator::Direct(16), Merge::None),
            (16, Terminator::Direct(11), Merge::None),
            (17, Terminator::Return(None), Merge::None),
        ]);
        let cfg = Cfg::new(&ir, 1).unwrap();
        assert_eq!(cfg.innermost_loop(13), Some(12));
        assert_eq!(cfg.innermost_loop(15), Some(11));
        assert_eq!(cfg.enclosing_loops(13), vec![11, 12]);
    }
}
