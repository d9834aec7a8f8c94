//! Source variables and their SSA versions.
//!
//! A [`Variable`] is a named storage location of a [`Function`].  Each variable owns a list of
//! [`Version`]s: version 0 is the value the variable holds on entry to the function and every
//! definition created by the SSA builder gets the next number.  Before SSA is built every operand
//! refers to the zero version.
//!
//! Versions track their single definition site and an exact list of their use sites, updated
//! eagerly whenever a statement or phi is edited.

use slotmap::{DefaultKey, Key};

use crate::{context::Context, function::Function, phi::Phi, stmt::Stmt};

/// A wrapper around an [ECS](https://github.com/orlp/slotmap) handle into the [`Context`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct Variable(pub DefaultKey);

/// Where a variable lives, which decides how the SSA builder treats it.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum VariableKind {
    /// A local whose address is never taken.
    Local,
    /// A local whose address escapes through `AddrOf`.
    AddrTaken,
    Global,
}

impl VariableKind {
    /// Variables which may be reached through pointers, calls or loads.
    pub fn is_memory(&self) -> bool {
        matches!(self, VariableKind::AddrTaken | VariableKind::Global)
    }
}

#[doc(hidden)]
pub struct VariableContent {
    pub name: String,
    pub function: Function,
    pub kind: VariableKind,
    pub volatile: bool,
    pub(crate) zero_version: Version,
    pub(crate) versions: Vec<Version>,
    pub(crate) next_version: u32,
    pub(crate) renamed: bool,
}

impl Variable {
    /// Create a new variable in `function`.  Prefer [`Function::new_variable`].
    pub(crate) fn new(
        context: &mut Context,
        function: Function,
        name: String,
        kind: VariableKind,
        volatile: bool,
    ) -> Variable {
        let var = Variable(context.variables.insert(VariableContent {
            name,
            function,
            kind,
            volatile,
            zero_version: Version(DefaultKey::null()),
            versions: Vec::new(),
            next_version: 0,
            renamed: false,
        }));
        let zero = Version::new(context, var);
        context.variables[var.0].zero_version = zero;
        var
    }

    pub fn get_name<'a>(&self, context: &'a Context) -> &'a str {
        &context.variables[self.0].name
    }

    pub fn get_function(&self, context: &Context) -> Function {
        context.variables[self.0].function
    }

    pub fn get_kind(&self, context: &Context) -> VariableKind {
        context.variables[self.0].kind
    }

    pub fn is_volatile(&self, context: &Context) -> bool {
        context.variables[self.0].volatile
    }

    pub fn is_memory(&self, context: &Context) -> bool {
        self.get_kind(context).is_memory()
    }

    /// The value this variable holds on entry to its function.
    pub fn zero_version(&self, context: &Context) -> Version {
        context.variables[self.0].zero_version
    }

    /// Whether the SSA builder renamed this variable.
    pub fn is_renamed(&self, context: &Context) -> bool {
        context.variables[self.0].renamed
    }

    pub(crate) fn set_renamed(&self, context: &mut Context, renamed: bool) {
        context.variables[self.0].renamed = renamed;
    }

    /// Every version of this variable, zero version first.
    pub fn versions<'a>(&self, context: &'a Context) -> &'a [Version] {
        &context.variables[self.0].versions
    }
}

/// A wrapper around an [ECS](https://github.com/orlp/slotmap) handle into the [`Context`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct Version(pub DefaultKey);

/// The unique definition of a [`Version`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum VersionDef {
    /// The incoming value, or a version whose definition was deleted.
    None,
    Stmt(Stmt),
    Phi(Phi),
    /// A may-def attached to a statement.
    MayDef(Stmt),
}

/// One occurrence of a [`Version`] being read.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum UseSite {
    /// An operand of the statement, including may-def operands.
    Stmt(Stmt),
    Phi(Phi),
    /// A may-use attached to the statement.
    MayUse(Stmt),
}

#[doc(hidden)]
pub struct VersionContent {
    pub variable: Variable,
    pub number: u32,
    pub(crate) def: VersionDef,
    pub(crate) uses: Vec<UseSite>,
}

impl Version {
    /// Create the next version of `variable`, with no definition yet.
    pub fn new(context: &mut Context, variable: Variable) -> Version {
        let number = context.variables[variable.0].next_version;
        context.variables[variable.0].next_version += 1;
        let version = Version(context.versions.insert(VersionContent {
            variable,
            number,
            def: VersionDef::None,
            uses: Vec::new(),
        }));
        context.variables[variable.0].versions.push(version);
        version
    }

    pub fn get_variable(&self, context: &Context) -> Variable {
        context.versions[self.0].variable
    }

    pub fn get_number(&self, context: &Context) -> u32 {
        context.versions[self.0].number
    }

    pub fn is_zero(&self, context: &Context) -> bool {
        self.get_number(context) == 0
    }

    pub fn get_def(&self, context: &Context) -> VersionDef {
        context.versions[self.0].def
    }

    pub(crate) fn set_def(&self, context: &mut Context, def: VersionDef) {
        context.versions[self.0].def = def;
    }

    /// Forget the definition if it is `def`.
    pub(crate) fn clear_def_if(&self, context: &mut Context, def: VersionDef) {
        if context.versions[self.0].def == def {
            context.versions[self.0].def = VersionDef::None;
        }
    }

    pub fn uses<'a>(&self, context: &'a Context) -> &'a [UseSite] {
        &context.versions[self.0].uses
    }

    pub fn num_uses(&self, context: &Context) -> usize {
        context.versions[self.0].uses.len()
    }

    pub(crate) fn add_use(&self, context: &mut Context, site: UseSite) {
        context.versions[self.0].uses.push(site);
    }

    /// Remove one occurrence of `site`.  Returns false if it wasn't recorded.
    pub(crate) fn remove_use(&self, context: &mut Context, site: UseSite) -> bool {
        let uses = &mut context.versions[self.0].uses;
        match uses.iter().position(|use_site| *use_site == site) {
            Some(idx) => {
                uses.remove(idx);
                true
            }
            None => false,
        }
    }

    /// A printable name such as `x_3`.
    pub fn get_name(&self, context: &Context) -> String {
        let content = &context.versions[self.0];
        format!(
            "{}_{}",
            context.variables[content.variable.0].name, content.number
        )
    }
}
