//! Name resolution.
//!
//! Environments are nested name-to-object scopes. A chain of local frames
//! bottoms out at a module, whose own symbol tables are built lazily from
//! its imports. Environments are read-only after construction: the
//! analyzer and evaluator extend them by pushing child frames, never by
//! mutating parent entries.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use crate::ast::{Expr, ExprKind, ExprPtr};
use crate::error::{CompileError, Result};
use crate::objects::{
    object_equals, Identifier, IdentifierPtr, ImportKind, ModulePtr, Object, SymbolEntry,
    Visibility,
};
use crate::state::CompilerState;

pub type EnvPtr = Rc<Env>;

#[derive(Debug, Clone)]
pub enum EnvParent {
    Env(EnvPtr),
    Module(ModulePtr),
}

#[derive(Debug)]
pub struct Env {
    pub parent: Option<EnvParent>,
    entries: RefCell<HashMap<String, Object>>,
    /// Set on the body environment of a call-by-name expansion: the call
    /// expression being expanded, for location-reflection forms.
    pub call_by_name_expr_head: RefCell<Option<ExprPtr>>,
}

impl Env {
    pub fn root() -> EnvPtr {
        Rc::new(Self {
            parent: None,
            entries: RefCell::new(HashMap::new()),
            call_by_name_expr_head: RefCell::new(None),
        })
    }

    pub fn new(parent: &EnvPtr) -> EnvPtr {
        Rc::new(Self {
            parent: Some(EnvParent::Env(parent.clone())),
            entries: RefCell::new(HashMap::new()),
            call_by_name_expr_head: RefCell::new(None),
        })
    }

    pub fn for_module(module: &ModulePtr) -> EnvPtr {
        Rc::new(Self {
            parent: Some(EnvParent::Module(module.clone())),
            entries: RefCell::new(HashMap::new()),
            call_by_name_expr_head: RefCell::new(None),
        })
    }

    fn get_local(&self, name: &str) -> Option<Object> {
        self.entries.borrow().get(name).cloned()
    }
}

/// Add a binding to the innermost frame. Shadowing within one frame is a
/// "duplicate name" error; shadowing an outer frame is fine.
pub fn add_local(
    cst: &CompilerState,
    env: &EnvPtr,
    name: &IdentifierPtr,
    obj: Object,
) -> Result<()> {
    let mut entries = env.entries.borrow_mut();
    if entries.contains_key(&name.name) {
        return Err(cst.diag_at(name.span, CompileError::DuplicateName(name.name.clone())));
    }
    entries.insert(name.name.clone(), obj);
    Ok(())
}

pub fn lookup_env(cst: &CompilerState, env: &EnvPtr, name: &str) -> Result<Option<Object>> {
    if let Some(obj) = env.get_local(name) {
        return Ok(Some(obj));
    }
    match &env.parent {
        Some(EnvParent::Env(parent)) => lookup_env(cst, parent, name),
        Some(EnvParent::Module(module)) => lookup_private(cst, module, name),
        None => Ok(None),
    }
}

pub fn safe_lookup_env(cst: &CompilerState, env: &EnvPtr, name: &IdentifierPtr) -> Result<Object> {
    match lookup_env(cst, env, &name.name)? {
        Some(obj) => Ok(obj),
        None => Err(undefined_name_error(cst, name)),
    }
}

/// The module a scope chain bottoms out at.
pub fn env_module(env: &EnvPtr) -> Option<ModulePtr> {
    match &env.parent {
        Some(EnvParent::Env(parent)) => env_module(parent),
        Some(EnvParent::Module(module)) => Some(module.clone()),
        None => None,
    }
}

/// Lookup that additionally classifies the binding relative to
/// `non_local_env`: whether it was found outside that frame, and whether
/// it came from module scope. The lambda converter uses this to decide
/// which names a closure must capture.
pub fn lookup_env_ex(
    cst: &CompilerState,
    env: &EnvPtr,
    name: &IdentifierPtr,
    non_local_env: Option<&EnvPtr>,
) -> Result<(Object, bool, bool)> {
    let non_local_env = match non_local_env {
        Some(nl) if Rc::ptr_eq(nl, env) => None,
        other => other.cloned(),
    };

    if let Some(obj) = env.get_local(&name.name) {
        let is_non_local = non_local_env.is_none();
        return Ok((obj, is_non_local, false));
    }

    match &env.parent {
        Some(EnvParent::Env(parent)) => {
            lookup_env_ex(cst, parent, name, non_local_env.as_ref())
        }
        Some(EnvParent::Module(module)) => match lookup_private(cst, module, &name.name)? {
            Some(obj) => Ok((obj, true, true)),
            None => Err(undefined_name_error(cst, name)),
        },
        None => Err(undefined_name_error(cst, name)),
    }
}

//
// module globals
//

pub fn add_global(
    cst: &CompilerState,
    module: &ModulePtr,
    name: &IdentifierPtr,
    visibility: Visibility,
    obj: Object,
) -> Result<()> {
    if module.globals.borrow().contains_key(&name.name) {
        return Err(cst.diag_at(name.span, CompileError::NameRedefined(name.name.clone())));
    }
    let module_name = module.name.borrow().clone();
    module
        .globals
        .borrow_mut()
        .insert(name.name.clone(), obj.clone());
    insert_symbol(
        &mut module.all_symbols.borrow_mut(),
        &name.name,
        obj.clone(),
        &module_name,
    );
    if visibility == Visibility::Public {
        module
            .public_globals
            .borrow_mut()
            .insert(name.name.clone(), obj.clone());
        insert_symbol(
            &mut module.public_symbols.borrow_mut(),
            &name.name,
            obj,
            &module_name,
        );
    }
    Ok(())
}

fn insert_symbol(
    table: &mut HashMap<String, Vec<SymbolEntry>>,
    name: &str,
    obj: Object,
    source_module: &str,
) {
    let entries = table.entry(name.to_string()).or_default();
    if !entries.iter().any(|e| object_equals(&e.obj, &obj)) {
        entries.push(SymbolEntry {
            obj,
            source_module: source_module.to_string(),
        });
    }
}

//
// import resolution
//

fn get_public_symbols(cst: &CompilerState, module: &ModulePtr) -> Result<()> {
    if module.public_symbols_loaded.get() || module.public_symbols_loading.get() >= 1 {
        return Ok(());
    }
    module
        .public_symbols_loading
        .set(module.public_symbols_loading.get() + 1);
    let result = add_imported_symbols(cst, module, true);
    module
        .public_symbols_loading
        .set(module.public_symbols_loading.get() - 1);
    result
}

fn get_all_symbols(cst: &CompilerState, module: &ModulePtr) -> Result<()> {
    if module.all_symbols_loaded.get() || module.all_symbols_loading.get() >= 1 {
        return Ok(());
    }
    module
        .all_symbols_loading
        .set(module.all_symbols_loading.get() + 1);
    let result = add_imported_symbols(cst, module, false);
    module
        .all_symbols_loading
        .set(module.all_symbols_loading.get() - 1);
    result
}

fn insert_imported(
    cst: &CompilerState,
    module: &ModulePtr,
    public_only: bool,
    name: &IdentifierPtr,
    obj: Object,
    source_module: &str,
    specific_imported: &mut HashSet<String>,
    is_specific_import: bool,
) -> Result<()> {
    if specific_imported.contains(&name.name) {
        if is_specific_import {
            return Err(cst.diag_at(
                name.span,
                CompileError::NameImportedAlready(name.name.clone()),
            ));
        }
        return Ok(());
    }

    // A module's own globals always win over imported names.
    if module.globals.borrow().contains_key(&name.name) {
        return Ok(());
    }

    let table = if public_only {
        &module.public_symbols
    } else {
        &module.all_symbols
    };
    let mut table = table.borrow_mut();
    if is_specific_import {
        table.insert(name.name.clone(), Vec::new());
        specific_imported.insert(name.name.clone());
    }
    insert_symbol(&mut table, &name.name, obj, source_module);
    Ok(())
}

fn add_imported_symbols(cst: &CompilerState, module: &ModulePtr, public_only: bool) -> Result<()> {
    let mut specific_imported: HashSet<String> = HashSet::new();
    let imports = module.imports.borrow().clone();

    for import in imports {
        if public_only && import.visibility != Visibility::Public {
            continue;
        }
        let target = match import.module.borrow().clone() {
            Some(m) => m,
            None => {
                return Err(cst.diag(CompileError::InvalidOperation(format!(
                    "imported module not loaded: {}",
                    import.module_name
                ))))
            }
        };
        match &import.kind {
            ImportKind::Module { alias } => {
                // The module-name binding itself is installed by module
                // initialization; here it only claims the name so other
                // imports conflict with it.
                let bound = alias.clone().unwrap_or_else(|| import.module_name.clone());
                if specific_imported.contains(&bound) {
                    return Err(cst.diag_at(
                        import.span,
                        CompileError::NameImportedAlready(bound),
                    ));
                }
                specific_imported.insert(bound);
            }
            ImportKind::Star => {
                get_public_symbols(cst, &target)?;
                let snapshot: Vec<(String, Vec<SymbolEntry>)> = target
                    .public_symbols
                    .borrow()
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                let target_name = target.name.borrow().clone();
                for (name, entries) in snapshot {
                    let ident = Identifier::with_span(&name, import.span);
                    for entry in entries {
                        insert_imported(
                            cst,
                            module,
                            public_only,
                            &ident,
                            entry.obj,
                            &target_name,
                            &mut specific_imported,
                            false,
                        )?;
                    }
                }
            }
            ImportKind::Members(members) => {
                get_public_symbols(cst, &target)?;
                get_all_symbols(cst, &target)?;
                let target_name = target.name.borrow().clone();
                for member in members {
                    let source = if member.visibility == Visibility::Private {
                        &target.all_symbols
                    } else {
                        &target.public_symbols
                    };
                    let entries = source.borrow().get(&member.name).cloned();
                    // Globals are in the symbol tables from the start, but
                    // check them too in case the tables are mid-load.
                    let entries = match entries {
                        Some(e) if !e.is_empty() => e,
                        _ => match target.globals.borrow().get(&member.name) {
                            Some(obj) => vec![SymbolEntry {
                                obj: obj.clone(),
                                source_module: target_name.clone(),
                            }],
                            None => {
                                return Err(cst.diag_at(
                                    import.span,
                                    CompileError::ImportedNameNotFound(member.name.clone()),
                                ))
                            }
                        },
                    };
                    let bound = member.alias.as_deref().unwrap_or(&member.name);
                    let ident = Identifier::with_span(bound, import.span);
                    for entry in entries {
                        insert_imported(
                            cst,
                            module,
                            public_only,
                            &ident,
                            entry.obj,
                            &entry.source_module,
                            &mut specific_imported,
                            true,
                        )?;
                    }
                }
            }
        }
    }
    Ok(())
}

//
// module lookups
//

fn ambiguous_import_error(
    cst: &CompilerState,
    name: &str,
    entries: &[SymbolEntry],
) -> crate::error::Diagnostic {
    let mut modules: Vec<String> = entries.iter().map(|e| e.source_module.clone()).collect();
    modules.sort();
    modules.dedup();
    let suggestions = modules
        .into_iter()
        .map(|m| format!("import {}.({});", m, name))
        .collect();
    cst.diag(CompileError::AmbiguousImport {
        name: name.to_string(),
        suggestions,
    })
}

fn undefined_name_error(cst: &CompilerState, name: &IdentifierPtr) -> crate::error::Diagnostic {
    let mut suggestions = Vec::new();
    for (module_name, module) in cst.modules.borrow().iter() {
        if let Ok(Some(_)) = lookup_public(cst, module, &name.name) {
            suggestions.push(format!("import {}.({});", module_name, name.name));
        }
    }
    suggestions.sort();
    cst.diag_at(
        name.span,
        CompileError::UndefinedName {
            name: name.name.clone(),
            suggestions,
        },
    )
}

/// Public view of a module: its public globals and public imports. No
/// prelude fallback.
pub fn lookup_public(cst: &CompilerState, module: &ModulePtr, name: &str) -> Result<Option<Object>> {
    loop {
        let entries = module.public_symbols.borrow().get(name).cloned();
        match entries {
            Some(entries) if !entries.is_empty() => {
                if entries.len() > 1 {
                    return Err(ambiguous_import_error(cst, name, &entries));
                }
                return Ok(Some(entries[0].obj.clone()));
            }
            _ => {
                if !module.public_symbols_loaded.get() {
                    get_public_symbols(cst, module)?;
                    module.public_symbols_loaded.set(true);
                    continue;
                }
                return Ok(None);
            }
        }
    }
}

pub fn safe_lookup_public(
    cst: &CompilerState,
    module: &ModulePtr,
    name: &IdentifierPtr,
) -> Result<Object> {
    match lookup_public(cst, module, &name.name)? {
        Some(obj) => Ok(obj),
        None => Err(undefined_name_error(cst, name)),
    }
}

/// Private view of a module: everything visible inside it. Falls back to
/// the prelude's public names, except within the prelude itself.
pub fn lookup_private(
    cst: &CompilerState,
    module: &ModulePtr,
    name: &str,
) -> Result<Option<Object>> {
    loop {
        let entries = module.all_symbols.borrow().get(name).cloned();
        match entries {
            Some(entries) if !entries.is_empty() => {
                if entries.len() > 1 {
                    return Err(ambiguous_import_error(cst, name, &entries));
                }
                return Ok(Some(entries[0].obj.clone()));
            }
            _ => {
                if !module.all_symbols_loaded.get() {
                    get_all_symbols(cst, module)?;
                    module.all_symbols_loaded.set(true);
                    continue;
                }
                match cst.prelude_module() {
                    Some(prelude) if !Rc::ptr_eq(&prelude, module) => {
                        return lookup_public(cst, &prelude, name)
                    }
                    _ => return Ok(None),
                }
            }
        }
    }
}

//
// foreign expressions
//

/// Wrap an expression with the environment it should resolve in, so AST
/// fragments can flow between scopes without re-resolution. Distributes
/// over unpack so argument splicing still sees the unpack form.
pub fn foreign_expr(env: &EnvPtr, expr: &ExprPtr) -> ExprPtr {
    if let ExprKind::Unpack(inner) = &expr.kind {
        let wrapped = foreign_expr(env, inner);
        return Expr::new(ExprKind::Unpack(wrapped), expr.span);
    }
    Expr::new(
        ExprKind::Foreign {
            env: env.clone(),
            expr: expr.clone(),
        },
        expr.span,
    )
}

pub fn lookup_call_by_name_expr_head(env: &EnvPtr) -> Option<ExprPtr> {
    if let Some(head) = env.call_by_name_expr_head.borrow().clone() {
        return Some(head);
    }
    match &env.parent {
        Some(EnvParent::Env(parent)) => lookup_call_by_name_expr_head(parent),
        _ => None,
    }
}
