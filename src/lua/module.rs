//! `package`/`require` module loader. Modules are
//! cached in `package.loaded`, resolved through an ordered list of
//! searchers in `package.searchers` (preload table first, then the
//! filesystem via `package.path`), and run in their own fresh `Vm` sharing
//! only the calling VM's globals.

use crate::value::{table::LuaTable, NativeOutcome, TableRef, Value};
use crate::vm::{EngineError, EngineResult, Vm};
use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;

struct ModuleState {
    loaded: TableRef,
    preload: TableRef,
    searchers: TableRef,
    package: TableRef,
    base_dir: PathBuf,
}

/// Installs `package`, `require`, `dofile` and `loadfile` as globals on
/// `vm`. `base_dir` anchors relative module paths.
pub fn install(vm: &mut Vm, base_dir: PathBuf) {
    let loaded = Rc::new(RefCell::new(LuaTable::default()));
    let preload = Rc::new(RefCell::new(LuaTable::default()));
    let searchers = Rc::new(RefCell::new(LuaTable::default()));
    let _ = searchers.borrow_mut().set(Value::Int(1), Value::NativeFn(preload_searcher(Rc::clone(&preload))));

    let package = Rc::new(RefCell::new(LuaTable::default()));
    {
        let mut p = package.borrow_mut();
        let _ = p.set(Value::str("loaded"), Value::Table(Rc::clone(&loaded)));
        let _ = p.set(Value::str("preload"), Value::Table(Rc::clone(&preload)));
        let _ = p.set(Value::str("searchers"), Value::Table(Rc::clone(&searchers)));
        let _ = p.set(Value::str("path"), Value::str("./?.lua;./?/init.lua"));
    }

    let state = Rc::new(ModuleState {
        loaded: Rc::clone(&loaded),
        preload: Rc::clone(&preload),
        searchers: Rc::clone(&searchers),
        package: Rc::clone(&package),
        base_dir,
    });
    let _ = state.searchers.borrow_mut().set(Value::Int(2), Value::NativeFn(file_searcher(Rc::clone(&state))));

    vm.register("package", Value::Table(package));
    vm.register("require", Value::NativeFn(require_builtin(Rc::clone(&state))));
    vm.register("dofile", Value::NativeFn(dofile_builtin(Rc::clone(&state))));
    vm.register("loadfile", Value::NativeFn(loadfile_builtin(state)));
}

fn arg_str(args: &[Value], idx: usize, who: &str) -> EngineResult<String> {
    match args.get(idx) {
        Some(v) => Ok(v.lua_tostring()),
        None => Err(EngineError::structural(format!("{who} expects a string argument"))),
    }
}

/// `package.searchers[1]`: look the module up in `package.preload`.
fn preload_searcher(preload: TableRef) -> crate::value::NativeFn {
    Rc::new(move |args, _vm| {
        let name = arg_str(args, 0, "searcher.preload")?;
        let loader = preload.borrow().get(&Value::str(name.clone()));
        if matches!(loader, Value::Nil) {
            Ok(NativeOutcome::Multi(vec![Value::Nil, Value::str(format!("no field package.preload['{name}']"))]))
        } else {
            Ok(NativeOutcome::Multi(vec![loader, Value::str(format!("preload:{name}"))]))
        }
    })
}

/// `package.searchers[2]`: resolve `name` against `package.path` patterns
/// rooted at `base_dir`, read the file, and wrap compile+run as a loader.
fn file_searcher(state: Rc<ModuleState>) -> crate::value::NativeFn {
    Rc::new(move |args, _vm| {
        let name = arg_str(args, 0, "searcher.lua")?;
        let module_path = name.replace('.', "/");
        let path_value = state.package.borrow().get(&Value::str("path"));
        let path_pattern = if matches!(path_value, Value::Nil) {
            "./?.lua;./?/init.lua".to_string()
        } else {
            path_value.lua_tostring().to_string()
        };
        for pattern in path_pattern.split(';') {
            let pattern = pattern.trim();
            if pattern.is_empty() {
                continue;
            }
            let candidate = pattern.replace('?', &module_path);
            let resolved = state.base_dir.join(&candidate);
            if resolved.is_file() {
                let resolved_display = resolved.display().to_string();
                let state = Rc::clone(&state);
                let loader = move |_args: &[Value], vm: &mut Vm| -> EngineResult<NativeOutcome> {
                    run_module_file(&state, &resolved, vm)
                };
                return Ok(NativeOutcome::Multi(vec![Value::NativeFn(Rc::new(loader)), Value::str(resolved_display)]));
            }
        }
        Ok(NativeOutcome::Multi(vec![Value::Nil, Value::str(format!("no file '{module_path}'"))]))
    })
}

fn run_module_file(state: &Rc<ModuleState>, path: &std::path::Path, vm: &mut Vm) -> EngineResult<NativeOutcome> {
    let source = std::fs::read_to_string(path)
        .map_err(|e| EngineError::structural(format!("cannot open '{}': {e}", path.display())))?;
    let instructions = super::compile_source(&source, &path.display().to_string())?;
    let mut module_vm = Vm::new(instructions)?;
    vm.sync_globals_into(&mut module_vm);
    install_nested(state, &mut module_vm);
    module_vm.run(false).map_err(|fault| EngineError::runtime(fault.message))?;
    let results = module_vm.last_return.clone();
    module_vm.sync_globals_into(vm);
    Ok(NativeOutcome::Multi(results))
}

/// A module's own VM gets the same `package`/`require` globals as its
/// loader, so nested `require` calls share one cache.
fn install_nested(state: &Rc<ModuleState>, vm: &mut Vm) {
    vm.register("package", Value::Table(Rc::clone(&state.package)));
    vm.register("require", Value::NativeFn(require_builtin(Rc::clone(state))));
    vm.register("dofile", Value::NativeFn(dofile_builtin(Rc::clone(state))));
    vm.register("loadfile", Value::NativeFn(loadfile_builtin(Rc::clone(state))));
}

/// `require(name)`: memoized in `package.loaded`, resolved through
/// `package.searchers` in order.
fn require_builtin(state: Rc<ModuleState>) -> crate::value::NativeFn {
    Rc::new(move |args, vm| {
        let name = arg_str(args, 0, "require")?;
        let cached = state.loaded.borrow().get(&Value::str(name.clone()));
        if !matches!(cached, Value::Nil) {
            return Ok(NativeOutcome::Single(cached));
        }

        let searcher_count = state.searchers.borrow().lua_len();
        let mut errors = Vec::new();
        for i in 1..=searcher_count {
            let searcher = state.searchers.borrow().get(&Value::Int(i as i64));
            if matches!(searcher, Value::Nil) {
                continue;
            }
            let result = vm.call_callable(&searcher, vec![Value::str(name.clone())])?;
            let loader = result.first().cloned().unwrap_or(Value::Nil);
            let extra = result.get(1).cloned();
            if !matches!(loader, Value::Nil) {
                let _ = state.loaded.borrow_mut().set(Value::str(name.clone()), Value::Bool(true));
                let values = match vm.call_callable(&loader, vec![Value::str(name.clone())]) {
                    Ok(v) => v,
                    Err(e) => {
                        let _ = state.loaded.borrow_mut().set(Value::str(name.clone()), Value::Nil);
                        return Err(e);
                    }
                };
                let module_value = values.into_iter().next().unwrap_or(Value::Nil);
                let module_value = if matches!(module_value, Value::Nil) { Value::Bool(true) } else { module_value };
                let _ = state.loaded.borrow_mut().set(Value::str(name.clone()), module_value.clone());
                return Ok(NativeOutcome::Single(module_value));
            }
            if let Some(extra) = extra {
                if !matches!(extra, Value::Nil) {
                    errors.push(extra.lua_tostring().to_string());
                }
            }
        }

        let mut message = format!("module '{name}' not found");
        if !errors.is_empty() {
            message.push_str(": ");
            message.push_str(&errors.join("; "));
        }
        Err(EngineError::structural(message))
    })
}

/// `dofile(filename)`: compiles, runs, and returns the chunk's results
/// without caching it in `package.loaded`.
fn dofile_builtin(state: Rc<ModuleState>) -> crate::value::NativeFn {
    Rc::new(move |args, vm| {
        let filename = arg_str(args, 0, "dofile")?;
        let path = resolve_path(&state.base_dir, &filename);
        run_module_file(&state, &path, vm)
    })
}

/// `loadfile(filename)`: compiles without running, returning `(chunk)` on
/// success or `(nil, message)` on failure.
fn loadfile_builtin(state: Rc<ModuleState>) -> crate::value::NativeFn {
    Rc::new(move |args, _vm| {
        let filename = arg_str(args, 0, "loadfile")?;
        let path = resolve_path(&state.base_dir, &filename);
        let source = match std::fs::read_to_string(&path) {
            Ok(s) => s,
            Err(e) => return Ok(NativeOutcome::Multi(vec![Value::Nil, Value::str(e.to_string())])),
        };
        let instructions = match super::compile_source(&source, &path.display().to_string()) {
            Ok(i) => i,
            Err(e) => return Ok(NativeOutcome::Multi(vec![Value::Nil, Value::str(e.message)])),
        };
        let state = Rc::clone(&state);
        let chunk = move |_args: &[Value], vm: &mut Vm| -> EngineResult<NativeOutcome> {
            let mut module_vm = Vm::new(instructions.clone())?;
            vm.sync_globals_into(&mut module_vm);
            install_nested(&state, &mut module_vm);
            module_vm.run(false).map_err(|fault| EngineError::runtime(fault.message))?;
            let results = module_vm.last_return.clone();
            module_vm.sync_globals_into(vm);
            Ok(NativeOutcome::Multi(results))
        };
        Ok(NativeOutcome::Multi(vec![Value::NativeFn(Rc::new(chunk))]))
    })
}

fn resolve_path(base_dir: &std::path::Path, filename: &str) -> PathBuf {
    let path = PathBuf::from(filename);
    if path.is_absolute() {
        path
    } else {
        base_dir.join(path)
    }
}
