//! The per-method control-flow graph.
//!
//! A [`Cfg`] is an arena of [`BasicBlock`]s addressed by [`BlockId`]; edges
//! are ids, never references, so the arena can grow while blocks point at
//! each other. Block 0 is the distinguished *dead block* terminating every
//! no-exit path; block 1 is the *entry block*. Neither is ever eliminated.
//!
//! Simplification does not remove blocks from the arena. A block detached
//! from the graph keeps its slot and is flagged [`BlockFlags::DETACHED`];
//! every traversal goes through [`Cfg::live_blocks`] or the maintained
//! `forwards_topo_sort`, which contains exactly the surviving blocks in
//! their original post-order-derived relative order. After simplification
//! the sort is *not* recomputed, so it is no longer a perfect post-order;
//! consumers may only rely on the relative order of survivors.

pub mod builder;
pub mod finalize;
pub mod liveness;
mod uintset;

pub use builder::build;
pub use liveness::ReadsAndWrites;
pub use uintset::UIntSet;

use core_loc::LocOffsets;
use core_names::{LocalVariable, NameRef, NameTable, SymbolRef};
use core_tree::Value;
use smallvec::SmallVec;

/// Index into [`Cfg::locals`]. Ids 0..3 are sentinels shared by every CFG.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct LocalRef(u32);

impl LocalRef {
    /// "No variable"; also the default.
    pub const NONE: LocalRef = LocalRef(0);
    /// Exit-condition sentinel for unconditional jumps.
    pub const UNCONDITIONAL: LocalRef = LocalRef(1);
    /// Exit-condition sentinel marking a block-call split, which
    /// simplification must not treat as a plain conditional.
    pub const BLOCK_CALL: LocalRef = LocalRef(2);

    const FIRST_REAL: u32 = 3;

    pub fn from_raw(id: u32) -> Self {
        LocalRef(id)
    }

    pub fn id(self) -> u32 {
        self.0
    }

    pub fn exists(self) -> bool {
        self.0 != 0
    }

    pub fn is_sentinel(self) -> bool {
        self.0 < Self::FIRST_REAL
    }

    /// A compiler-introduced temporary, eligible for dealiasing.
    pub fn is_synthetic_temporary(self, cfg: &Cfg, names: &NameTable) -> bool {
        !self.is_sentinel() && cfg.local(self).is_synthetic(names)
    }

    /// A local standing in for a global (field or constant); such locals are
    /// never dead-store eliminated.
    pub fn is_alias_for_global(self, cfg: &Cfg) -> bool {
        cfg.alias_targets.contains_key(&self)
    }
}

/// Index into the CFG's block arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(u32);

impl BlockId {
    pub const DEAD: BlockId = BlockId(0);
    pub const ENTRY: BlockId = BlockId(1);

    pub fn id(self) -> u32 {
        self.0
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A three-address-style statement: `bind := value`.
#[derive(Debug, Clone, PartialEq)]
pub struct Binding {
    pub bind: LocalRef,
    pub value: Instruction,
    pub loc: LocOffsets,
}

impl Binding {
    pub fn new(bind: LocalRef, value: Instruction, loc: LocOffsets) -> Self {
        Binding { bind, value, loc }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntrinsicOp {
    MakeArray,
    MakeHash,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    /// Read another local.
    Ident(LocalRef),
    /// Bind a local standing in for a global symbol (field/constant). An
    /// unresolved global carries `SymbolRef::default()`.
    Alias(SymbolRef),
    Literal(Value),
    Send {
        recv: LocalRef,
        fun: NameRef,
        args: SmallVec<[LocalRef; 2]>,
        has_block: bool,
        rewriter_synthesized: bool,
    },
    /// Load the method argument with this index.
    LoadArg(u16),
    LoadSelf,
    /// The parameters yielded into a block body.
    LoadYieldParams,
    Return(LocalRef),
    /// Asserts the value's type is uninhabited; inference errors otherwise.
    TAbsurd(LocalRef),
    /// The exception live in a rescue handler.
    GetCurrentException,
    Intrinsic {
        op: IntrinsicOp,
        args: SmallVec<[LocalRef; 4]>,
    },
}

impl Instruction {
    /// Instructions inserted by the lowering itself for implementation
    /// reasons. Dealiasing must not rewrite into these: doing so would fool
    /// dead-code analysis.
    pub fn is_synthetic(&self) -> bool {
        matches!(
            self,
            Instruction::LoadArg(_)
                | Instruction::LoadSelf
                | Instruction::LoadYieldParams
                | Instruction::GetCurrentException
                | Instruction::Alias(_)
        )
    }

    /// Safe to drop when the bound local is never read.
    pub fn is_side_effect_free(&self) -> bool {
        matches!(
            self,
            Instruction::Ident(_)
                | Instruction::Literal(_)
                | Instruction::LoadSelf
                | Instruction::LoadArg(_)
                | Instruction::LoadYieldParams
        )
    }

    /// Visit every local this instruction reads.
    pub fn for_each_read(&self, mut f: impl FnMut(LocalRef)) {
        match self {
            Instruction::Ident(source) => f(*source),
            Instruction::Send { recv, args, .. } => {
                f(*recv);
                for arg in args {
                    f(*arg);
                }
            }
            Instruction::Return(value) | Instruction::TAbsurd(value) => f(*value),
            Instruction::Intrinsic { args, .. } => {
                for arg in args {
                    f(*arg);
                }
            }
            Instruction::Alias(_)
            | Instruction::Literal(_)
            | Instruction::LoadArg(_)
            | Instruction::LoadSelf
            | Instruction::LoadYieldParams
            | Instruction::GetCurrentException => {}
        }
    }
}

/// The single terminator of a basic block. An unconditional jump has the
/// [`LocalRef::UNCONDITIONAL`] sentinel as its condition and both targets
/// equal; a block-call split carries [`LocalRef::BLOCK_CALL`].
#[derive(Debug, Clone, PartialEq)]
pub struct BlockExit {
    pub cond: LocalRef,
    pub then_block: BlockId,
    pub else_block: BlockId,
    pub loc: LocOffsets,
}

impl BlockExit {
    pub fn is_unconditional(&self) -> bool {
        self.cond == LocalRef::UNCONDITIONAL
    }
}

bitflags::bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct BlockFlags: u8 {
        /// Some jump targets this block; set during construction and
        /// consulted by the debug-only consistency check.
        const WAS_JUMP_DESTINATION = 1 << 0;
        /// Entered from a block with a strictly smaller loop depth.
        const IS_LOOP_HEADER       = 1 << 1;
        /// Removed from the graph by simplification; the arena slot remains.
        const DETACHED             = 1 << 2;
    }
}

#[derive(Debug)]
pub struct BasicBlock {
    pub id: BlockId,
    pub bindings: Vec<Binding>,
    pub back_edges: SmallVec<[BlockId; 2]>,
    pub exit: BlockExit,
    /// Number of loops enclosing this block.
    pub outer_loops: u32,
    pub flags: BlockFlags,
    /// Locals that must be passed in from every predecessor, sorted by
    /// local id. Filled by block-argument synthesis.
    pub args: Vec<LocalRef>,
}

impl BasicBlock {
    fn new(id: BlockId, outer_loops: u32) -> Self {
        BasicBlock {
            id,
            bindings: Vec::new(),
            back_edges: SmallVec::new(),
            exit: BlockExit {
                cond: LocalRef::UNCONDITIONAL,
                then_block: BlockId::DEAD,
                else_block: BlockId::DEAD,
                loc: LocOffsets::none(),
            },
            outer_loops,
            flags: BlockFlags::empty(),
            args: Vec::new(),
        }
    }

    pub fn is_detached(&self) -> bool {
        self.flags.contains(BlockFlags::DETACHED)
    }

    pub fn is_loop_header(&self) -> bool {
        self.flags.contains(BlockFlags::IS_LOOP_HEADER)
    }
}

pub struct Cfg {
    /// The method this CFG was built for.
    pub method: SymbolRef,
    pub file: core_loc::FileRef,
    blocks: Vec<BasicBlock>,
    /// Post-order of a DFS from entry; iterate in reverse for forward
    /// topological order. Simplification filters this in place.
    pub forwards_topo_sort: Vec<BlockId>,
    locals: Vec<LocalVariable>,
    local_index: ahash::AHashMap<LocalVariable, LocalRef>,
    /// Locals bound by `Alias` instructions, mapped to their global symbol.
    pub alias_targets: ahash::AHashMap<LocalRef, SymbolRef>,
    /// Per local id: minimum loop depth over all blocks reading or writing
    /// the local. `u32::MAX` for locals never touched.
    pub min_loops: Vec<u32>,
    /// Per local id: maximum loop depth over all blocks writing the local.
    pub max_loop_write: Vec<u32>,
}

impl Cfg {
    pub fn new(method: SymbolRef, file: core_loc::FileRef) -> Self {
        let mut cfg = Cfg {
            method,
            file,
            blocks: Vec::with_capacity(4),
            forwards_topo_sort: Vec::new(),
            locals: Vec::new(),
            local_index: ahash::AHashMap::new(),
            alias_targets: ahash::AHashMap::new(),
            min_loops: Vec::new(),
            max_loop_write: Vec::new(),
        };
        // Sentinel locals, one per reserved LocalRef.
        for unique in 0..LocalRef::FIRST_REAL {
            cfg.locals.push(LocalVariable::new(NameRef::default(), unique));
        }
        let dead = cfg.fresh_block(0);
        debug_assert_eq!(dead, BlockId::DEAD);
        let entry = cfg.fresh_block(0);
        debug_assert_eq!(entry, BlockId::ENTRY);
        cfg
    }

    pub fn fresh_block(&mut self, outer_loops: u32) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(BasicBlock::new(id, outer_loops));
        id
    }

    pub fn block(&self, id: BlockId) -> &BasicBlock {
        &self.blocks[id.index()]
    }

    pub fn block_mut(&mut self, id: BlockId) -> &mut BasicBlock {
        &mut self.blocks[id.index()]
    }

    /// Arena size: one past the largest block id ever allocated, including
    /// detached blocks. Use for sizing per-block side tables.
    pub fn max_block_id(&self) -> usize {
        self.blocks.len()
    }

    /// Blocks still part of the graph, in arena order.
    pub fn live_blocks(&self) -> impl Iterator<Item = &BasicBlock> {
        self.blocks.iter().filter(|b| !b.is_detached())
    }

    pub fn block_ids(&self) -> impl Iterator<Item = BlockId> + use<> {
        (0..self.blocks.len() as u32).map(BlockId)
    }

    pub fn enter_local(&mut self, variable: LocalVariable) -> LocalRef {
        if let Some(&existing) = self.local_index.get(&variable) {
            return existing;
        }
        let local = LocalRef(self.locals.len() as u32);
        self.locals.push(variable);
        self.local_index.insert(variable, local);
        local
    }

    pub fn local(&self, local: LocalRef) -> LocalVariable {
        self.locals[local.0 as usize]
    }

    pub fn num_locals(&self) -> u32 {
        self.locals.len() as u32
    }

    /// Render for tests and debugging: one line per live block with its
    /// bindings and exit.
    pub fn show(&self, names: &NameTable) -> String {
        let mut out = String::new();
        for block in self.live_blocks() {
            out.push_str(&format!("bb{}({})", block.id.id(), block.outer_loops));
            if block.id == BlockId::DEAD {
                out.push_str(" [dead]");
            }
            out.push('\n');
            for binding in &block.bindings {
                out.push_str(&format!(
                    "  {} = {:?}\n",
                    self.local(binding.bind).show(names),
                    binding.value
                ));
            }
            out.push_str(&format!(
                "  -> then bb{} else bb{} (cond {})\n",
                block.exit.then_block.id(),
                block.exit.else_block.id(),
                block.exit.cond.id()
            ));
        }
        out
    }
}

impl std::fmt::Debug for Cfg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cfg")
            .field("method", &self.method)
            .field("blocks", &self.blocks.len())
            .field("locals", &self.locals.len())
            .finish()
    }
}
