//! Dominator and post-dominator trees, and related algorithms.
//! The algorithms implemented here are from the paper
//! "A Simple, Fast Dominance Algorithm" -- Keith D. Cooper, Timothy J. Harvey, and Ken Kennedy.

use crate::{
    block::{Block, BlockAttrs},
    context::Context,
    error::IrError,
    function::Function,
    pass_manager::{AnalysisResult, AnalysisResultT, AnalysisResults, Pass, PassMutability},
};
use flowopt_utils::{FxIndexMap, FxIndexSet};
use rustc_hash::{FxHashMap, FxHashSet};
use std::fmt::Write;

/// Which way the CFG is walked.  Post-dominance is dominance over the reversed graph, rooted at
/// the exit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

impl Direction {
    fn root(self, context: &Context, function: Function) -> Block {
        match self {
            Direction::Forward => function.get_entry_block(context),
            Direction::Backward => function.get_exit_block(context),
        }
    }

    fn succs(self, context: &Context, block: Block) -> Vec<Block> {
        match self {
            Direction::Forward => block.successors(context),
            Direction::Backward => block.preds(context).to_vec(),
        }
    }

    fn preds(self, context: &Context, block: Block) -> Vec<Block> {
        match self {
            Direction::Forward => block.preds(context).to_vec(),
            Direction::Backward => block.successors(context),
        }
    }
}

/// Represents a node in the dominator tree.
pub struct DomTreeNode {
    /// The immediate dominator of self.
    pub parent: Option<Block>,
    /// The blocks that self immediately dominates.
    pub children: Vec<Block>,
    /// Index in a pre-order walk of the tree.
    pub pre_order: usize,
    /// The largest pre-order index within this subtree.
    pub last_descendant: usize,
    /// Post-order number from the CFG walk.
    pub post_order: usize,
}

/// The dominator tree is represented by mapping each reachable Block to its DomTreeNode, in
/// reverse post-order.
pub struct DomTree {
    root: Block,
    nodes: FxIndexMap<Block, DomTreeNode>,
    pre_order: Vec<Block>,
}
impl AnalysisResultT for DomTree {}

/// Dominance frontier sets.
#[derive(Default)]
pub struct DomFronts(FxIndexMap<Block, FxIndexSet<Block>>);
impl AnalysisResultT for DomFronts {}

/// Post ordering of blocks in the CFG.
pub struct PostOrder {
    pub block_to_po: FxHashMap<Block, usize>,
    pub po_to_block: Vec<Block>,
}
impl AnalysisResultT for PostOrder {}

/// The post-dominator tree, plus the blocks it cannot cover because no path leads from them to
/// the exit.
pub struct PostDomTree {
    tree: DomTree,
    non_exiting: Vec<Block>,
}
impl AnalysisResultT for PostDomTree {}

/// Post-dominance frontier sets, i.e. control dependences.
#[derive(Default)]
pub struct PostDomFronts(DomFronts);
impl AnalysisResultT for PostDomFronts {}

pub const POSTORDER_NAME: &str = "postorder";

pub fn create_postorder_pass() -> Pass {
    Pass {
        name: POSTORDER_NAME,
        descr: "Postorder traversal of the control-flow graph",
        deps: vec![],
        runner: PassMutability::Analysis(compute_post_order_pass),
    }
}

pub fn compute_post_order_pass(
    context: &Context,
    _: &AnalysisResults,
    function: Function,
) -> Result<AnalysisResult, IrError> {
    verify_cfg_shape(context, function)?;
    Ok(Box::new(compute_post_order(
        context,
        function,
        Direction::Forward,
    )))
}

/// Compute the post-order traversal of the CFG, or of the reversed CFG from the exit.
/// Beware: Unreachable blocks aren't part of the result.
pub fn compute_post_order(context: &Context, function: Function, direction: Direction) -> PostOrder {
    let mut res = PostOrder {
        block_to_po: FxHashMap::default(),
        po_to_block: Vec::default(),
    };
    let root = direction.root(context, function);

    let mut visited = FxHashSet::<Block>::default();
    visited.insert(root);
    let mut stack = vec![(root, direction.succs(context, root), 0)];
    while let Some(top) = stack.last_mut() {
        if top.2 < top.1.len() {
            let next = top.1[top.2];
            top.2 += 1;
            if visited.insert(next) {
                stack.push((next, direction.succs(context, next), 0));
            }
        } else if let Some((block, _, _)) = stack.pop() {
            res.block_to_po.insert(block, res.po_to_block.len());
            res.po_to_block.push(block);
        }
    }

    res
}

/// Check the shape every dominance computation relies on.  A non-exit block without successors
/// or a block other than the entry and exit without predecessors is an error.  The exit has no
/// predecessors in a function which never returns; every other block then shows up in
/// [`PostDomTree::non_exiting`].  Cycles unreachable from the entry are allowed and simply left
/// out of the trees.
pub fn verify_cfg_shape(context: &Context, function: Function) -> Result<(), IrError> {
    let entry = function.get_entry_block(context);
    let exit = function.get_exit_block(context);
    for block in function.block_iter(context) {
        if block != exit && block.num_successors(context) == 0 {
            return Err(IrError::BlockWithoutSuccessors(block.get_label(context)));
        }
        if block != entry && block != exit && block.num_predecessors(context) == 0 {
            return Err(IrError::OrphanBlock(block.get_label(context)));
        }
    }
    Ok(())
}

pub const DOMINATORS_NAME: &str = "dominators";

pub fn create_dominators_pass() -> Pass {
    Pass {
        name: DOMINATORS_NAME,
        descr: "Dominator tree computation",
        deps: vec![POSTORDER_NAME],
        runner: PassMutability::Analysis(compute_dom_tree_pass),
    }
}

fn compute_dom_tree_pass(
    context: &Context,
    analyses: &AnalysisResults,
    function: Function,
) -> Result<AnalysisResult, IrError> {
    let po: &PostOrder = analyses.get_analysis_result(function);
    Ok(Box::new(compute_dom_tree(context, po, Direction::Forward)?))
}

/// Compute the dominator tree over `po`, which must have been computed for the same direction.
pub fn compute_dom_tree(
    context: &Context,
    po: &PostOrder,
    direction: Direction,
) -> Result<DomTree, IrError> {
    // The root is always last in post-order.
    let Some(&root) = po.po_to_block.last() else {
        return Err(IrError::DominatorFailure("<empty>".to_owned()));
    };

    let mut idoms = FxHashMap::<Block, Block>::default();
    idoms.insert(root, root);

    let mut changed = true;
    while changed {
        changed = false;
        // For all nodes, b, in reverse postorder (except start node)
        for b in po.po_to_block.iter().rev().skip(1) {
            // Only (reachable) predecessors whose idom is already known take part.  The DFS
            // parent of b precedes it in reverse postorder, so there is always one.
            let preds: Vec<Block> = direction
                .preds(context, *b)
                .into_iter()
                .filter(|p| idoms.contains_key(p))
                .collect();
            let Some((first, rest)) = preds.split_first() else {
                return Err(IrError::DominatorFailure(b.get_label(context)));
            };
            let mut new_idom = *first;
            for p in rest {
                new_idom = intersect(po, &idoms, *p, new_idom);
            }
            if idoms.get(b) != Some(&new_idom) {
                idoms.insert(*b, new_idom);
                changed = true;
            }
        }
    }

    // Find the nearest common dominator of two blocks,
    // using the partially computed dominator tree.
    fn intersect(
        po: &PostOrder,
        idoms: &FxHashMap<Block, Block>,
        mut finger1: Block,
        mut finger2: Block,
    ) -> Block {
        while finger1 != finger2 {
            while po.block_to_po[&finger1] < po.block_to_po[&finger2] {
                finger1 = idoms[&finger1];
            }
            while po.block_to_po[&finger2] < po.block_to_po[&finger1] {
                finger2 = idoms[&finger2];
            }
        }
        finger1
    }

    let mut nodes = FxIndexMap::<Block, DomTreeNode>::default();
    for b in po.po_to_block.iter().rev() {
        nodes.insert(
            *b,
            DomTreeNode {
                parent: (*b != root).then(|| idoms[b]),
                children: Vec::new(),
                pre_order: 0,
                last_descendant: 0,
                post_order: po.block_to_po[b],
            },
        );
    }
    // Build the children.
    for b in po.po_to_block.iter().rev().skip(1) {
        if let Some(parent) = nodes.get_mut(&idoms[b]) {
            parent.children.push(*b);
        }
    }

    // Number the tree so dominance queries are an interval check.
    let mut pre_order = Vec::with_capacity(nodes.len());
    let mut stack = vec![root];
    while let Some(b) = stack.pop() {
        let children = match nodes.get_mut(&b) {
            Some(node) => {
                node.pre_order = pre_order.len();
                node.children.clone()
            }
            None => Vec::new(),
        };
        pre_order.push(b);
        stack.extend(children.into_iter().rev());
    }
    for b in pre_order.iter().rev() {
        let node = &nodes[b];
        let last = node
            .children
            .iter()
            .map(|child| nodes[child].last_descendant)
            .max()
            .unwrap_or(node.pre_order);
        if let Some(node) = nodes.get_mut(b) {
            node.last_descendant = last;
        }
    }

    Ok(DomTree {
        root,
        nodes,
        pre_order,
    })
}

impl DomTree {
    pub fn root(&self) -> Block {
        self.root
    }

    /// Is `block` reachable, i.e. part of the tree?
    pub fn contains(&self, block: Block) -> bool {
        self.nodes.contains_key(&block)
    }

    pub fn node(&self, block: Block) -> Option<&DomTreeNode> {
        self.nodes.get(&block)
    }

    /// Does `dominator` dominate `dominatee`?  Every block dominates itself.  Blocks outside the
    /// tree dominate and are dominated by nothing else.
    pub fn dominates(&self, dominator: Block, dominatee: Block) -> bool {
        if dominator == dominatee {
            return true;
        }
        match (self.nodes.get(&dominator), self.nodes.get(&dominatee)) {
            (Some(a), Some(b)) => a.pre_order <= b.pre_order && b.pre_order <= a.last_descendant,
            _ => false,
        }
    }

    pub fn strictly_dominates(&self, dominator: Block, dominatee: Block) -> bool {
        dominator != dominatee && self.dominates(dominator, dominatee)
    }

    pub fn immediate_dominator(&self, block: Block) -> Option<Block> {
        self.nodes.get(&block).and_then(|node| node.parent)
    }

    /// Get an iterator over the children nodes
    pub fn children(&self, node: Block) -> impl Iterator<Item = Block> + '_ {
        self.nodes
            .get(&node)
            .into_iter()
            .flat_map(|node| node.children.iter().copied())
    }

    /// The blocks of the tree in reverse post-order.
    pub fn iter(&self) -> impl Iterator<Item = Block> + '_ {
        self.nodes.keys().copied()
    }

    /// The blocks of the tree in pre-order.
    pub fn pre_order(&self) -> &[Block] {
        &self.pre_order
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

pub const DOM_FRONTS_NAME: &str = "dominance-frontiers";

pub fn create_dom_fronts_pass() -> Pass {
    Pass {
        name: DOM_FRONTS_NAME,
        descr: "Dominance frontiers computation",
        deps: vec![DOMINATORS_NAME],
        runner: PassMutability::Analysis(compute_dom_fronts_pass),
    }
}

fn compute_dom_fronts_pass(
    context: &Context,
    analyses: &AnalysisResults,
    function: Function,
) -> Result<AnalysisResult, IrError> {
    let dom_tree: &DomTree = analyses.get_analysis_result(function);
    Ok(Box::new(compute_dom_fronts(
        context,
        dom_tree,
        Direction::Forward,
    )))
}

/// Compute dominance frontiers set for each block.
pub fn compute_dom_fronts(context: &Context, dom_tree: &DomTree, direction: Direction) -> DomFronts {
    let mut res = DomFronts::default();
    for b in dom_tree.iter() {
        res.0.insert(b, FxIndexSet::default());
    }

    // for all nodes, b
    for b in dom_tree.iter() {
        // for all (reachable) predecessors, p, of b
        let preds: Vec<Block> = direction
            .preds(context, b)
            .into_iter()
            .filter(|p| dom_tree.contains(*p))
            .collect();
        // if the number of predecessors of b >= 2
        if preds.len() < 2 {
            continue;
        }
        let Some(b_idom) = dom_tree.immediate_dominator(b) else {
            continue;
        };
        for p in preds {
            let mut runner = p;
            while runner != b_idom {
                // add b to runner’s dominance frontier set
                res.0.entry(runner).or_default().insert(b);
                match dom_tree.immediate_dominator(runner) {
                    Some(parent) => runner = parent,
                    None => break,
                }
            }
        }
    }
    res
}

impl DomFronts {
    pub fn get(&self, block: Block) -> Option<&FxIndexSet<Block>> {
        self.0.get(&block)
    }

    /// The frontier of `block`, empty if it has none or isn't reachable.
    pub fn frontier(&self, block: Block) -> impl Iterator<Item = Block> + '_ {
        self.0
            .get(&block)
            .into_iter()
            .flat_map(|set| set.iter().copied())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Block, &FxIndexSet<Block>)> {
        self.0.iter()
    }

    /// The iterated dominance frontier of `blocks`: the closure of taking frontiers until
    /// nothing new appears.
    pub fn iterated(&self, blocks: impl IntoIterator<Item = Block>) -> FxIndexSet<Block> {
        let mut result = FxIndexSet::default();
        let mut worklist: Vec<Block> = blocks.into_iter().collect();
        let mut seen: FxHashSet<Block> = worklist.iter().copied().collect();
        while let Some(block) = worklist.pop() {
            for front in self.frontier(block) {
                result.insert(front);
                if seen.insert(front) {
                    worklist.push(front);
                }
            }
        }
        result
    }
}

pub const POST_DOMINATORS_NAME: &str = "post-dominators";

pub fn create_post_dominators_pass() -> Pass {
    Pass {
        name: POST_DOMINATORS_NAME,
        descr: "Post-dominator tree computation",
        deps: vec![],
        runner: PassMutability::Analysis(compute_post_dom_tree_pass),
    }
}

fn compute_post_dom_tree_pass(
    context: &Context,
    _: &AnalysisResults,
    function: Function,
) -> Result<AnalysisResult, IrError> {
    verify_cfg_shape(context, function)?;
    Ok(Box::new(compute_post_dom_tree(context, function)?))
}

pub fn compute_post_dom_tree(context: &Context, function: Function) -> Result<PostDomTree, IrError> {
    let po = compute_post_order(context, function, Direction::Backward);
    let tree = compute_dom_tree(context, &po, Direction::Backward)?;
    let non_exiting: Vec<Block> = function
        .block_iter(context)
        .filter(|block| !tree.contains(*block))
        .collect();
    for block in &non_exiting {
        tracing::debug!(
            "{}: {} cannot reach the exit",
            function.get_name(context),
            block.get_label(context)
        );
    }
    Ok(PostDomTree { tree, non_exiting })
}

impl PostDomTree {
    pub fn tree(&self) -> &DomTree {
        &self.tree
    }

    /// Does `a` post-dominate `b`?
    pub fn post_dominates(&self, a: Block, b: Block) -> bool {
        self.tree.dominates(a, b)
    }

    pub fn immediate_post_dominator(&self, block: Block) -> Option<Block> {
        self.tree.immediate_dominator(block)
    }

    /// Blocks from which no path leads to the exit.
    pub fn non_exiting(&self) -> &[Block] {
        &self.non_exiting
    }

    pub fn is_non_exiting(&self, block: Block) -> bool {
        self.non_exiting.contains(&block)
    }
}

pub const POST_DOM_FRONTS_NAME: &str = "post-dominance-frontiers";

pub fn create_post_dom_fronts_pass() -> Pass {
    Pass {
        name: POST_DOM_FRONTS_NAME,
        descr: "Post-dominance frontiers computation",
        deps: vec![POST_DOMINATORS_NAME],
        runner: PassMutability::Analysis(compute_post_dom_fronts_pass),
    }
}

fn compute_post_dom_fronts_pass(
    context: &Context,
    analyses: &AnalysisResults,
    function: Function,
) -> Result<AnalysisResult, IrError> {
    let post_dom: &PostDomTree = analyses.get_analysis_result(function);
    Ok(Box::new(PostDomFronts(compute_dom_fronts(
        context,
        post_dom.tree(),
        Direction::Backward,
    ))))
}

impl PostDomFronts {
    pub fn fronts(&self) -> &DomFronts {
        &self.0
    }

    /// The blocks `block` is control dependent on.
    pub fn frontier(&self, block: Block) -> impl Iterator<Item = Block> + '_ {
        self.0.frontier(block)
    }
}

/// Set [`BlockAttrs::LOOP_HEADER`] on every block which is the target of a back edge, i.e. which
/// dominates one of its predecessors.  Returns how many blocks were marked.
pub fn mark_loop_headers(context: &mut Context, dom_tree: &DomTree) -> usize {
    let headers: Vec<Block> = dom_tree
        .iter()
        .filter(|block| {
            block
                .preds(context)
                .iter()
                .any(|pred| dom_tree.dominates(*block, *pred))
        })
        .collect();
    for header in &headers {
        header.add_attrs(context, BlockAttrs::LOOP_HEADER);
    }
    headers.len()
}

/// Print dominator tree in the graphviz dot format.
pub fn print_dot(context: &Context, func_name: &str, dom_tree: &DomTree) -> String {
    let mut res = format!("digraph {func_name} {{\n");
    for (b, node) in dom_tree.nodes.iter() {
        if let Some(idom) = node.parent {
            let _ = writeln!(
                res,
                "\t{} -> {}",
                idom.get_label(context),
                b.get_label(context)
            );
        }
    }
    res += "}\n";
    res
}

/// Print dominator frontiers information.
pub fn print_dom_fronts(context: &Context, func_name: &str, dom_fronts: &DomFronts) -> String {
    let mut res = format!("Dominance frontiers set for {func_name}:\n");
    for (b, dfs) in dom_fronts.iter() {
        res += &("\t".to_string() + &b.get_label(context) + ": ");
        for f in dfs {
            res += &(f.get_label(context) + " ");
        }
        res += "\n";
    }
    res
}
