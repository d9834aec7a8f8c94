use crate::{
    analysis::{
        create_dom_fronts_pass, create_dominators_pass, create_post_dom_fronts_pass,
        create_post_dominators_pass, create_postorder_pass, print_dom_fronts, print_dot, DomFronts,
        DomTree, PostDomTree, DOMINATORS_NAME, DOM_FRONTS_NAME, POST_DOMINATORS_NAME,
    },
    config::OptimizerConfig,
    context::Context,
    error::{IrError, PassWarning, Severity, WarningKind},
    function::Function,
    optimize::{
        create_hdse_pass, create_ssa_pass, create_try_cleanup_pass, create_unreachable_pass,
        HDSE_NAME, SSA_NAME, TRY_CLEANUP_NAME,
    },
    printer,
};
use downcast_rs::{impl_downcast, Downcast};
use flowopt_utils::FxIndexMap;
use rustc_hash::{FxHashMap, FxHashSet};
use std::any::{type_name, TypeId};

/// Result of an analysis. Specific result must be downcasted to.
pub trait AnalysisResultT: Downcast {}
impl_downcast!(AnalysisResultT);
pub type AnalysisResult = Box<dyn AnalysisResultT>;

/// What a transform may touch besides the IR: the configuration and the warning sink.
pub struct PassEnv<'a> {
    pub config: &'a OptimizerConfig,
    pub diagnostics: &'a mut Diagnostics,
}

/// Is a pass an Analysis or a Transformation over the IR?
#[derive(Clone, Copy)]
pub enum PassMutability {
    /// An analysis pass, producing an analysis result.
    Analysis(fn(&Context, analyses: &AnalysisResults, Function) -> Result<AnalysisResult, IrError>),
    /// A pass over the IR that can possibly modify it.
    Transform(
        fn(
            &mut Context,
            analyses: &AnalysisResults,
            Function,
            env: &mut PassEnv,
        ) -> Result<bool, IrError>,
    ),
}

pub struct Pass {
    pub name: &'static str,
    pub descr: &'static str,
    /// Analyses which must be available before this pass runs.
    pub deps: Vec<&'static str>,
    pub runner: PassMutability,
}

impl Pass {
    pub fn is_analysis(&self) -> bool {
        matches!(self.runner, PassMutability::Analysis(_))
    }

    pub fn is_transform(&self) -> bool {
        !self.is_analysis()
    }
}

#[derive(Default)]
pub struct AnalysisResults {
    // Hash from (AnalysisResultT, Function) to an actual result.
    results: FxHashMap<(TypeId, Function), AnalysisResult>,
    // Which analysis passes currently hold a valid result for a function.
    available: FxHashSet<(&'static str, Function)>,
}

impl AnalysisResults {
    /// Get the results of an analysis.
    /// Example analyses.get_analysis_result::<DomTree>(foo).
    pub fn get_analysis_result<T: AnalysisResultT>(&self, function: Function) -> &T {
        self.results
            .get(&(TypeId::of::<T>(), function))
            .and_then(|result| result.downcast_ref())
            .unwrap_or_else(|| {
                panic!(
                    "Internal error. Analysis result {} unavailable for function {:?}",
                    type_name::<T>(),
                    function
                )
            })
    }

    pub fn try_get_analysis_result<T: AnalysisResultT>(&self, function: Function) -> Option<&T> {
        self.results
            .get(&(TypeId::of::<T>(), function))
            .and_then(|result| result.downcast_ref())
    }

    /// Add a new result.
    pub fn add_result(&mut self, function: Function, pass: &'static str, result: AnalysisResult) {
        self.results
            .insert(((*result).type_id(), function), result);
        self.available.insert((pass, function));
    }

    pub fn is_analysis_result_available(&self, pass: &str, function: Function) -> bool {
        self.available
            .iter()
            .any(|(name, func)| *name == pass && *func == function)
    }

    /// Drop every result computed for `function`.
    pub fn invalidate(&mut self, function: Function) {
        self.results.retain(|(_, func), _| *func != function);
        self.available.retain(|(_, func)| *func != function);
    }
}

/// Soft warnings collected while running passes.
#[derive(Debug, Default)]
pub struct Diagnostics {
    warnings: Vec<PassWarning>,
}

impl Diagnostics {
    /// Record a warning and emit it through `tracing`.
    pub fn warn(&mut self, warning: PassWarning) {
        tracing::warn!("{warning}");
        self.warnings.push(warning);
    }

    pub fn warnings(&self) -> &[PassWarning] {
        &self.warnings
    }

    pub fn is_empty(&self) -> bool {
        self.warnings.is_empty()
    }

    pub fn take(&mut self) -> Vec<PassWarning> {
        std::mem::take(&mut self.warnings)
    }
}

#[derive(Default)]
pub struct PassManager {
    passes: FxIndexMap<&'static str, Pass>,
    analyses: AnalysisResults,
    diagnostics: Diagnostics,
}

impl PassManager {
    /// Register a pass. Should be called only once for each pass.
    pub fn register(&mut self, pass: Pass) -> &'static str {
        let pass_name = pass.name;
        if self.passes.insert(pass.name, pass).is_some() {
            panic!("Trying to register an already registered pass");
        }
        pass_name
    }

    /// Run the passes specified in `config` over every function, in order.
    ///
    /// A function on which a pass reports an unsupported shape keeps whatever the earlier passes
    /// did and is skipped for the remaining passes, provided `opt_config.allow_partial` is set.
    pub fn run(
        &mut self,
        ir: &mut Context,
        config: &PassManagerConfig,
        opt_config: &OptimizerConfig,
    ) -> Result<bool, IrError> {
        for pass in &config.to_run {
            if !self.is_registered(pass) {
                return Err(IrError::UnregisteredPass(pass.clone()));
            }
        }

        let mut modified = false;
        let functions: Vec<Function> = ir.function_iter().collect();
        for function in functions {
            for pass in &config.to_run {
                match self.run_pass(ir, pass, function, opt_config) {
                    Ok(changed) => modified |= changed,
                    Err(err)
                        if err.severity() == Severity::Unsupported && opt_config.allow_partial =>
                    {
                        self.analyses.invalidate(function);
                        let pass_name = self.passes.get(pass.as_str()).map_or("", |p| p.name);
                        self.diagnostics.warn(PassWarning {
                            pass: pass_name,
                            function: function.get_name(ir).to_owned(),
                            kind: WarningKind::FunctionSkipped {
                                reason: err.to_string(),
                            },
                        });
                        break;
                    }
                    Err(err) => return Err(err),
                }
            }
        }
        Ok(modified)
    }

    /// Run a single pass on `function`, computing any missing dependencies first.
    pub fn run_pass(
        &mut self,
        ir: &mut Context,
        pass: &str,
        function: Function,
        opt_config: &OptimizerConfig,
    ) -> Result<bool, IrError> {
        let (name, deps, runner) = match self.passes.get(pass) {
            Some(pass_t) => (pass_t.name, pass_t.deps.clone(), pass_t.runner),
            None => return Err(IrError::UnregisteredPass(pass.to_owned())),
        };

        for dep in deps {
            if !self.analyses.is_analysis_result_available(dep, function) {
                self.run_pass(ir, dep, function, opt_config)?;
            }
        }

        match runner {
            PassMutability::Analysis(analysis) => {
                let result = analysis(ir, &self.analyses, function)?;
                if opt_config.print.dominators {
                    print_analysis(ir, function, name, result.as_ref());
                }
                self.analyses.add_result(function, name, result);
                Ok(false)
            }
            PassMutability::Transform(transform) => {
                let mut env = PassEnv {
                    config: opt_config,
                    diagnostics: &mut self.diagnostics,
                };
                let modified = transform(ir, &self.analyses, function, &mut env)?;
                if modified {
                    self.analyses.invalidate(function);
                }
                if opt_config.print.after(name) {
                    tracing::info!(
                        "// IR after {name}:\n{}",
                        printer::function_to_string(ir, function)
                    );
                    if opt_config.print.dot {
                        tracing::info!("{}", printer::cfg_to_dot(ir, function));
                    }
                }
                Ok(modified)
            }
        }
    }

    /// Is `name` a registered pass?
    pub fn is_registered(&self, name: &str) -> bool {
        self.passes.contains_key(name)
    }

    pub fn analyses(&self) -> &AnalysisResults {
        &self.analyses
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    pub fn take_diagnostics(&mut self) -> Vec<PassWarning> {
        self.diagnostics.take()
    }

    pub fn help_text(&self) -> String {
        let summary = self
            .passes
            .iter()
            .map(|(name, pass)| format!("  {name:24} - {}", pass.descr))
            .collect::<Vec<_>>()
            .join("\n");

        format!("Valid pass names are:\n\n{summary}",)
    }
}

fn print_analysis(context: &Context, function: Function, name: &str, result: &dyn AnalysisResultT) {
    let func_name = function.get_name(context);
    if name == DOMINATORS_NAME {
        if let Some(dom_tree) = result.downcast_ref::<DomTree>() {
            tracing::info!("{}", print_dot(context, func_name, dom_tree));
        }
    } else if name == DOM_FRONTS_NAME {
        if let Some(fronts) = result.downcast_ref::<DomFronts>() {
            tracing::info!("{}", print_dom_fronts(context, func_name, fronts));
        }
    } else if name == POST_DOMINATORS_NAME {
        if let Some(post_dom) = result.downcast_ref::<PostDomTree>() {
            tracing::info!("{}", print_dot(context, func_name, post_dom.tree()));
        }
    }
}

/// Configuration for the pass manager to run passes.
pub struct PassManagerConfig {
    pub to_run: Vec<String>,
}

/// Register every pass this crate provides.
pub fn register_known_passes(pm: &mut PassManager) {
    // Analyses.
    pm.register(create_postorder_pass());
    pm.register(create_dominators_pass());
    pm.register(create_dom_fronts_pass());
    pm.register(create_post_dominators_pass());
    pm.register(create_post_dom_fronts_pass());
    // Transforms.
    pm.register(create_ssa_pass());
    pm.register(create_hdse_pass());
    pm.register(create_unreachable_pass());
    pm.register(create_try_cleanup_pass());
}

/// The standard pipeline: build SSA, remove dead code, then collapse empty try regions.
pub fn create_default_pipeline() -> PassManagerConfig {
    PassManagerConfig {
        to_run: [SSA_NAME, HDSE_NAME, TRY_CLEANUP_NAME]
            .iter()
            .map(|name| name.to_string())
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::SsaLevel, stmt::Expr, variable::VariableKind};
    use tracing_test::traced_test;

    fn load_then_return(context: &mut Context) -> Function {
        let func = Function::new(context, "f");
        let entry = func.get_entry_block(context);
        let a = func.create_block(context);
        let p = func.new_variable(context, "p", VariableKind::Local, false);
        let x = func.new_variable(context, "x", VariableKind::Local, false);
        let (p0, x0) = (p.zero_version(context), x.zero_version(context));
        entry.set_fallthrough(context, a);
        a.append(context).assign(x0, Expr::load(Expr::Var(p0)));
        a.append(context).ret(None);
        func
    }

    #[test]
    #[traced_test]
    fn warnings_are_logged_and_kept() {
        let mut context = Context::new();
        load_then_return(&mut context);
        let mut pm = PassManager::default();
        register_known_passes(&mut pm);
        let config = OptimizerConfig {
            ssa_level: SsaLevel::TopLevel,
            insert_null_checks: true,
            ..OptimizerConfig::default()
        };

        assert!(pm.run(&mut context, &create_default_pipeline(), &config).unwrap());
        assert!(logs_contain("inserted null check for `p_0`"));
        assert_eq!(pm.take_diagnostics().len(), 1);
        assert!(pm.diagnostics().is_empty());
    }

    #[test]
    fn analyses_are_dropped_after_a_change() {
        let mut context = Context::new();
        let func = load_then_return(&mut context);
        let mut pm = PassManager::default();
        register_known_passes(&mut pm);
        let config = OptimizerConfig::default();

        pm.run_pass(&mut context, DOMINATORS_NAME, func, &config)
            .unwrap();
        assert!(pm
            .analyses()
            .is_analysis_result_available(DOMINATORS_NAME, func));
        assert!(pm
            .analyses()
            .try_get_analysis_result::<DomTree>(func)
            .is_some());

        assert!(pm.run_pass(&mut context, SSA_NAME, func, &config).unwrap());
        assert!(!pm
            .analyses()
            .is_analysis_result_available(DOMINATORS_NAME, func));
    }

    #[test]
    fn help_lists_every_pass() {
        let mut pm = PassManager::default();
        register_known_passes(&mut pm);
        let help = pm.help_text();
        for name in [SSA_NAME, HDSE_NAME, TRY_CLEANUP_NAME, DOMINATORS_NAME] {
            assert!(help.contains(name));
        }
    }
}
