//! Top-level compression, applied when `toplevel` is set.
//!
//! A `const` declared at the top level with a literal initializer, bound
//! exactly once in the whole program and never written to, is propagated
//! into its use sites; declarations left without uses are dropped. The pass
//! iterates to a fixpoint, so chains (`const a = 1; const b = a;`) fold
//! completely.

use std::collections::{HashMap, HashSet};

use swc_ecma_ast::{
    AssignExpr, AssignTarget, BindingIdent, ClassDecl, Decl, ExportNamedSpecifier, Expr, FnDecl,
    ImportSpecifier, Lit, ModuleExportName, ModuleItem, Pat, Program, Prop, SimpleAssignTarget,
    Stmt, VarDeclKind, VarDeclarator,
};
use swc_ecma_visit::{Visit, VisitMut, VisitMutWith, VisitWith};

pub fn compress_toplevel(program: &mut Program) {
    loop {
        let consts = inlinable_consts(program);
        if consts.is_empty() {
            return;
        }

        let mut inliner = Inliner {
            consts: &consts,
            replaced: 0,
        };
        program.visit_mut_with(&mut inliner);

        let mut usage = UsageCounter {
            names: consts.keys().cloned().collect(),
            used: HashSet::new(),
        };
        program.visit_with(&mut usage);
        let removed = remove_unused(program, &consts, &usage.used);

        if inliner.replaced == 0 && removed == 0 {
            return;
        }
    }
}

/// Top-level literal `const`s that are safe to propagate: the name is bound
/// exactly once in the program and never the target of an assignment.
fn inlinable_consts(program: &Program) -> HashMap<String, Lit> {
    let mut consts = HashMap::new();
    for stmt in toplevel_stmts(program) {
        let Stmt::Decl(Decl::Var(var)) = stmt else {
            continue;
        };
        if var.kind != VarDeclKind::Const {
            continue;
        }
        for decl in &var.decls {
            let Pat::Ident(name) = &decl.name else {
                continue;
            };
            let Some(init) = &decl.init else {
                continue;
            };
            if let Expr::Lit(lit) = &**init {
                // Regex literals evaluate to a fresh object per occurrence.
                if matches!(
                    lit,
                    Lit::Num(_) | Lit::Str(_) | Lit::Bool(_) | Lit::Null(_) | Lit::BigInt(_)
                ) {
                    consts.insert(name.id.sym.to_string(), lit.clone());
                }
            }
        }
    }
    if consts.is_empty() {
        return consts;
    }

    let mut bindings = BindingCounter {
        names: consts.keys().cloned().collect(),
        bound: HashMap::new(),
        written: HashSet::new(),
    };
    program.visit_with(&mut bindings);
    consts.retain(|name, _| {
        bindings.bound.get(name).copied().unwrap_or(0) <= 1 && !bindings.written.contains(name)
    });
    consts
}

fn toplevel_stmts(program: &Program) -> Vec<&Stmt> {
    match program {
        Program::Module(module) => module
            .body
            .iter()
            .filter_map(|item| match item {
                ModuleItem::Stmt(stmt) => Some(stmt),
                ModuleItem::ModuleDecl(_) => None,
            })
            .collect(),
        Program::Script(script) => script.body.iter().collect(),
    }
}

/// Counts how often each candidate name is (re)bound, and which are written.
struct BindingCounter {
    names: HashSet<String>,
    bound: HashMap<String, usize>,
    written: HashSet<String>,
}

impl BindingCounter {
    fn bind(&mut self, sym: &str) {
        if self.names.contains(sym) {
            *self.bound.entry(sym.to_string()).or_insert(0) += 1;
        }
    }
}

impl Visit for BindingCounter {
    fn visit_binding_ident(&mut self, node: &BindingIdent) {
        node.visit_children_with(self);
        self.bind(&node.id.sym);
    }

    fn visit_fn_decl(&mut self, node: &FnDecl) {
        node.visit_children_with(self);
        self.bind(&node.ident.sym);
    }

    fn visit_class_decl(&mut self, node: &ClassDecl) {
        node.visit_children_with(self);
        self.bind(&node.ident.sym);
    }

    fn visit_import_specifier(&mut self, node: &ImportSpecifier) {
        let local = match node {
            ImportSpecifier::Named(s) => &s.local,
            ImportSpecifier::Default(s) => &s.local,
            ImportSpecifier::Namespace(s) => &s.local,
        };
        self.bind(&local.sym);
    }

    fn visit_assign_expr(&mut self, node: &AssignExpr) {
        node.visit_children_with(self);
        if let AssignTarget::Simple(SimpleAssignTarget::Ident(ident)) = &node.left {
            if self.names.contains(&*ident.id.sym) {
                self.written.insert(ident.id.sym.to_string());
            }
        }
    }
}

struct Inliner<'a> {
    consts: &'a HashMap<String, Lit>,
    replaced: usize,
}

impl VisitMut for Inliner<'_> {
    fn visit_mut_expr(&mut self, expr: &mut Expr) {
        expr.visit_mut_children_with(self);
        if let Expr::Ident(ident) = expr {
            if let Some(lit) = self.consts.get(&*ident.sym) {
                *expr = Expr::Lit(lit.clone());
                self.replaced += 1;
            }
        }
    }
}

/// Remaining references after inlining; a name that still appears (shorthand
/// props and export specifiers included) keeps its declaration.
struct UsageCounter {
    names: HashSet<String>,
    used: HashSet<String>,
}

impl UsageCounter {
    fn mark(&mut self, sym: &str) {
        if self.names.contains(sym) {
            self.used.insert(sym.to_string());
        }
    }
}

impl Visit for UsageCounter {
    fn visit_expr(&mut self, expr: &Expr) {
        expr.visit_children_with(self);
        if let Expr::Ident(ident) = expr {
            self.mark(&ident.sym);
        }
    }

    fn visit_prop(&mut self, prop: &Prop) {
        prop.visit_children_with(self);
        if let Prop::Shorthand(ident) = prop {
            self.mark(&ident.sym);
        }
    }

    fn visit_export_named_specifier(&mut self, node: &ExportNamedSpecifier) {
        node.visit_children_with(self);
        if let ModuleExportName::Ident(ident) = &node.orig {
            self.mark(&ident.sym);
        }
    }
}

fn remove_unused(
    program: &mut Program,
    consts: &HashMap<String, Lit>,
    used: &HashSet<String>,
) -> usize {
    fn removable(
        decl: &VarDeclarator,
        consts: &HashMap<String, Lit>,
        used: &HashSet<String>,
    ) -> bool {
        let Pat::Ident(name) = &decl.name else {
            return false;
        };
        consts.contains_key(&*name.id.sym) && !used.contains(&*name.id.sym)
    }

    fn prune(
        stmt: &mut Stmt,
        consts: &HashMap<String, Lit>,
        used: &HashSet<String>,
        removed: &mut usize,
    ) -> bool {
        let Stmt::Decl(Decl::Var(var)) = stmt else {
            return true;
        };
        if var.kind != VarDeclKind::Const {
            return true;
        }
        let before = var.decls.len();
        var.decls.retain(|decl| !removable(decl, consts, used));
        *removed += before - var.decls.len();
        !var.decls.is_empty()
    }

    let mut removed = 0;
    match program {
        Program::Module(module) => module.body.retain_mut(|item| match item {
            ModuleItem::Stmt(stmt) => prune(stmt, consts, used, &mut removed),
            ModuleItem::ModuleDecl(_) => true,
        }),
        Program::Script(script) => script
            .body
            .retain_mut(|stmt| prune(stmt, consts, used, &mut removed)),
    }
    removed
}
