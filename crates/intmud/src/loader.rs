//! Source-tree loading: the `.int` project file, source parsing, bytecode
//! compilation, and atomic installation into the world.
//!
//! Parse errors are fatal for their file only; compile errors exclude the
//! affected class or function. Everything else loads, which is also the
//! reload contract: a reload builds a whole new registry and installs it
//! in one step (clearing the indexed-object registry).

use std::{fs, path::Path};

use log::{info, warn};

use crate::{
    bytecode::compile_program,
    config::{Config, IntFile},
    error::{Diagnostics, LoadError},
    parse::{ast::ClassDecl, parse_source},
    registry::Registry,
    vm::{self, Invocation},
    world::World,
};

/// Name of the project configuration file.
pub const PROJECT_FILE: &str = "intmud.int";

/// Extension of source files.
pub const SOURCE_EXT: &str = "im";

/// Builds a world from a source directory: reads the project file, loads
/// every configured source, compiles, installs, creates the `main` object,
/// and invokes its `inicializar`.
pub fn load(config: Config) -> Result<(World, Diagnostics), LoadError> {
    load_with_sink(config, Box::new(crate::sink::StdSink::default()))
}

/// Like [`load`], with output routed into the given sink from the first
/// instruction on (including `inicializar`).
pub fn load_with_sink(
    mut config: Config,
    sink: Box<dyn crate::sink::TextSink>,
) -> Result<(World, Diagnostics), LoadError> {
    let project_path = config.source_dir.join(PROJECT_FILE);
    if let Ok(text) = fs::read_to_string(&project_path) {
        config.int = IntFile::parse(&text);
    }

    let files = source_files(&config)?;
    if files.is_empty() {
        return Err(LoadError::Empty(config.source_dir.display().to_string()));
    }

    let mut diags = Diagnostics::default();
    let mut classes: Vec<ClassDecl> = Vec::new();
    for file in &files {
        let path = config.source_dir.join(file);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(source) => {
                return Err(LoadError::Io {
                    path: path.display().to_string(),
                    source,
                });
            }
        };
        match parse_source(file, &text) {
            Ok(parsed) => classes.extend(parsed),
            // fatal for the containing file; other files continue to load
            Err(err) => {
                warn!("{err}");
                diags.parse_errors.push(err);
            }
        }
    }

    let mut world = World::new(config);
    world.sink = sink;
    let (units, compile_diags) = compile_program(&classes, &mut world.interns);
    diags.extend(compile_diags);
    info!(
        "loaded {} classes from {} files ({} parse errors, {} compile errors)",
        units.len(),
        files.len(),
        diags.parse_errors.len(),
        diags.compile_errors.len()
    );
    world.install(Registry::new(units));
    world.reset_budget();

    boot_main(&mut world);
    Ok((world, diags))
}

/// Reloads sources into an existing world: replaces the registry
/// atomically, clears the indexed-object registry, and keeps live objects
/// (their classes resolve against the new units by name).
pub fn reload(world: &mut World) -> Result<Diagnostics, LoadError> {
    let config = world.config.clone();
    let files = source_files(&config)?;
    let mut diags = Diagnostics::default();
    let mut classes: Vec<ClassDecl> = Vec::new();
    for file in &files {
        let path = config.source_dir.join(file);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(source) => {
                return Err(LoadError::Io {
                    path: path.display().to_string(),
                    source,
                });
            }
        };
        match parse_source(file, &text) {
            Ok(parsed) => classes.extend(parsed),
            Err(err) => diags.parse_errors.push(err),
        }
    }
    let (units, compile_diags) = compile_program(&classes, &mut world.interns);
    diags.extend(compile_diags);
    world.install(Registry::new(units));
    Ok(diags)
}

/// Resolves the list of source files to load, relative to the source dir.
fn source_files(config: &Config) -> Result<Vec<String>, LoadError> {
    let dir = &config.source_dir;
    let mut files = Vec::new();

    if !config.int.incluir.is_empty() {
        for entry in &config.int.incluir {
            // an entry is a file, a directory, or a prefix
            let as_file = dir.join(entry);
            if as_file.is_file() {
                files.push(entry.clone());
                continue;
            }
            let with_ext = format!("{entry}.{SOURCE_EXT}");
            if dir.join(&with_ext).is_file() {
                files.push(with_ext);
                continue;
            }
            if as_file.is_dir() {
                files.extend(sources_under(&as_file, Some(entry))?);
                continue;
            }
            // prefix match over the directory
            let mut matched = sources_under(dir, None)?;
            matched.retain(|f| f.starts_with(entry.as_str()));
            if matched.is_empty() {
                warn!("incluir entry `{entry}` matched nothing");
            }
            files.extend(matched);
        }
    } else if let Some(main) = &config.main_file {
        files.push(main.clone());
    } else {
        files = sources_under(dir, None)?;
    }

    files.dedup();
    Ok(files)
}

fn sources_under(dir: &Path, prefix: Option<&str>) -> Result<Vec<String>, LoadError> {
    let read = fs::read_dir(dir).map_err(|source| LoadError::Io {
        path: dir.display().to_string(),
        source,
    })?;
    let mut out = Vec::new();
    for entry in read.flatten() {
        let path = entry.path();
        if path.extension().is_some_and(|e| e == SOURCE_EXT) {
            let name = entry.file_name().to_string_lossy().into_owned();
            out.push(match prefix {
                Some(prefix) => format!("{prefix}/{name}"),
                None => name,
            });
        }
    }
    out.sort();
    Ok(out)
}

/// Creates the main object and runs its `inicializar`, when a `main`
/// class exists.
fn boot_main(world: &mut World) {
    let Some(main_class) = world.interns.get_name("main") else {
        return;
    };
    if world.registry.get(main_class).is_none() {
        return;
    }
    let Some(id) = world.create_object(main_class) else {
        return;
    };
    world.main_obj = Some(id);
    if let Some(inicializar) = world.interns.get_name("inicializar") {
        world.reset_budget();
        match vm::invoke(world, id, inicializar, &[]) {
            // budget-suspended init finishes on the first ticks
            Some(Invocation::Suspended(_)) => {
                warn!("inicializar exceeded its instruction budget at startup");
            }
            Some(Invocation::Done(_) | Invocation::Terminated) | None => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn project(files: &[(&str, &str)]) -> TempDir {
        let dir = TempDir::new().expect("tempdir");
        for (name, content) in files {
            let path = dir.path().join(name);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).unwrap();
            }
            std::fs::write(path, content).unwrap();
        }
        dir
    }

    #[test]
    fn loads_and_boots_main() {
        let dir = project(&[
            ("intmud.int", "incluir = mundo\n"),
            ("mundo.im", "classe main\nint32 pronto\nfunc inicializar\n  pronto = 1\n"),
        ]);
        let config = Config {
            source_dir: dir.path().to_path_buf(),
            ..Config::default()
        };
        let (world, diags) = load(config).expect("load");
        assert!(diags.is_clean(), "{diags:?}");
        let main = world.main_obj.expect("main object");
        let pronto = world.interns.get_name("pronto").unwrap();
        assert_eq!(world.heap.get(main).unwrap().fields[&pronto].to_i64(), 1);
    }

    #[test]
    fn parse_error_is_fatal_only_for_its_file() {
        let dir = project(&[
            ("intmud.int", "incluir = bom\nincluir = ruim\n"),
            ("bom.im", "classe main\n"),
            ("ruim.im", "classe ?!\n"),
        ]);
        let config = Config {
            source_dir: dir.path().to_path_buf(),
            ..Config::default()
        };
        let (world, diags) = load(config).expect("load");
        assert_eq!(diags.parse_errors.len(), 1);
        assert!(world.main_obj.is_some());
    }

    #[test]
    fn project_file_budget_is_applied() {
        let dir = project(&[
            ("intmud.int", "exec = 1234\n"),
            ("a.im", "classe main\n"),
        ]);
        let config = Config {
            source_dir: dir.path().to_path_buf(),
            ..Config::default()
        };
        let (world, _) = load(config).expect("load");
        assert_eq!(world.config.int.exec_budget, 1234);
    }

    #[test]
    fn missing_sources_is_an_error() {
        let dir = TempDir::new().unwrap();
        let config = Config {
            source_dir: dir.path().to_path_buf(),
            ..Config::default()
        };
        assert!(matches!(load(config), Err(LoadError::Empty(_))));
    }
}
