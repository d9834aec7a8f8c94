//! The main handle to an IR instance.
//!
//! [`Context`] contains several [slotmap](https://github.com/orlp/slotmap) collections to maintain
//! the IR ECS.  Blocks, statements, phis, variables and versions are all referred to by small
//! copyable handles which index into these maps.
//!
//! It is passed around as a mutable reference to many of the flowopt-IR APIs.

use slotmap::{DefaultKey, SlotMap};

use crate::{
    block::BlockContent,
    function::{Function, FunctionContent},
    phi::PhiContent,
    stmt::StmtContent,
    variable::{VariableContent, VersionContent},
};

/// The main IR context handle.
///
/// Every function, block, statement, phi, variable and version is stored here.
#[derive(Default)]
pub struct Context {
    pub(crate) functions: SlotMap<DefaultKey, FunctionContent>,
    pub(crate) blocks: SlotMap<DefaultKey, BlockContent>,
    pub(crate) stmts: SlotMap<DefaultKey, StmtContent>,
    pub(crate) phis: SlotMap<DefaultKey, PhiContent>,
    pub(crate) variables: SlotMap<DefaultKey, VariableContent>,
    pub(crate) versions: SlotMap<DefaultKey, VersionContent>,

    function_order: Vec<Function>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return an iterator over every function in this context, in creation order.
    pub fn function_iter(&self) -> impl Iterator<Item = Function> + '_ {
        self.function_order.iter().copied()
    }

    /// Find a function by name.
    pub fn get_function(&self, name: &str) -> Option<Function> {
        self.function_iter()
            .find(|func| self.functions[func.0].name == name)
    }

    pub(crate) fn add_function(&mut self, function: Function) {
        self.function_order.push(function);
    }
}

use std::fmt::{Display, Error, Formatter};

impl Display for Context {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), Error> {
        write!(f, "{}", crate::printer::to_string(self))
    }
}

impl From<Context> for String {
    fn from(context: Context) -> Self {
        crate::printer::to_string(&context)
    }
}
