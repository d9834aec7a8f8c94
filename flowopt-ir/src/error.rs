/// These errors are for internal IR failures.  They are aimed at users of the `flowopt-ir` crate,
/// i.e., compiler developers, rather than at the authors of the programs being optimized.
///
/// Every error carries a [`Severity`].  Fatal errors mean the IR is malformed and the optimizer
/// stops.  Unsupported errors mean a pass met a shape it does not handle yet; the pass manager may
/// skip the rest of the pipeline for that one function and carry on.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IrError {
    #[error("Block {0} has no predecessors but is not the entry block.")]
    OrphanBlock(String),
    #[error("Block {0} has no successors but is not the exit block.")]
    BlockWithoutSuccessors(String),
    #[error("Block {0} ends without a terminator matching its kind {1}.")]
    MissingTerminator(String, String),
    #[error("Block {0} has a terminator which is not its last statement.")]
    MisplacedTerminator(String),
    #[error("Terminator of block {block} does not agree with its successors: {reason}.")]
    TerminatorMismatch { block: String, reason: String },
    #[error("Edge {from} -> {to} is missing its reverse entry.")]
    InconsistentEdge { from: String, to: String },
    #[error("Block {block} has no predecessor {pred}.")]
    MissingPredecessor { block: String, pred: String },
    #[error("Phi for {var} in block {block} has {operands} operands but {preds} predecessors.")]
    PhiArityMismatch {
        var: String,
        block: String,
        operands: usize,
        preds: usize,
    },
    #[error("Removing missing block {0}.")]
    RemoveMissingBlock(String),
    #[error("Version {version} lists a use at {site} which does not read it.")]
    DanglingUse { version: String, site: String },
    #[error("Version {version} is read at {site} but the use is not recorded.")]
    UnrecordedUse { version: String, site: String },
    #[error("Version {version} names a definition which does not define it.")]
    InconsistentDefinition { version: String },
    #[error("Use of {version} in block {block} is not dominated by its definition.")]
    UseNotDominated { version: String, block: String },
    #[error("Deleted {kind} is still linked into block {block}.")]
    DeletedEntityLinked { kind: &'static str, block: String },
    #[error("Try in block {0} has more than one finally handler.")]
    MultipleFinallyHandlers(String),
    #[error("Dominator computation failed at block {0}.")]
    DominatorFailure(String),
    #[error("Pass '{0}' is not registered.")]
    UnregisteredPass(String),
    #[error("Invalid optimizer configuration: {0}")]
    InvalidConfig(String),
    #[error("{pass}: unsupported in function {function}: {reason}")]
    Unsupported {
        pass: &'static str,
        function: String,
        reason: String,
    },
}

/// How bad an [`IrError`] is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// The IR is corrupt; nothing further can be trusted.
    Fatal,
    /// A pass cannot handle this function yet.
    Unsupported,
}

impl IrError {
    pub fn severity(&self) -> Severity {
        match self {
            IrError::Unsupported { .. } => Severity::Unsupported,
            _ => Severity::Fatal,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }
}

/// A soft diagnostic produced by a pass.  Warnings never stop the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassWarning {
    pub pass: &'static str,
    pub function: String,
    pub kind: WarningKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WarningKind {
    /// A null check was materialized in `block` for the given base expression because the
    /// dereference which implied it was deleted.
    NullCheckInserted { block: String, base: String },
    /// The pass manager stopped optimizing a function after an unsupported error.
    FunctionSkipped { reason: String },
}

impl std::fmt::Display for PassWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            WarningKind::NullCheckInserted { block, base } => write!(
                f,
                "{}: inserted null check for `{base}` in {}:{block}",
                self.pass, self.function
            ),
            WarningKind::FunctionSkipped { reason } => write!(
                f,
                "{}: skipped remaining passes for {}: {reason}",
                self.pass, self.function
            ),
        }
    }
}
