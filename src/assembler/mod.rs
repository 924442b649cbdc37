//! The `Assembler`: ties the tokenizer, statement parser, macro
//! plug-in seam, locator and resolver together into a two-pass
//! pipeline, and builds the import/namespace graph along the way.

pub mod locate;
pub mod macros;
pub mod parse;
pub mod resolve;

use std::collections::HashMap;
use std::path::PathBuf;
use std::rc::Rc;

use crate::anchor::SourceAnchor;
use crate::config::{AssemblerConfig, OpenedSource, PathExpander, SourceProvider};
use crate::error::{AssemblyError, AssemblyResult};
use crate::namespace::{Namespace, NamespaceRef, ObjectCode};

use macros::{MacroEvaluator, MacroRegistry};
use parse::Statement;
use token::macro_delimiter;

pub mod token;

/// Everything an `Assembler::run` needs from its embedding host:
/// how to open source files, how to expand search-path roots, and
/// (optionally) how to evaluate macro blocks. A GUI shell and the
/// `cli` binary each provide their own small implementations of these.
pub struct AssemblerHost<'a> {
    pub source_provider: &'a dyn SourceProvider,
    pub path_expander: &'a dyn PathExpander,
    pub macro_evaluator: Option<&'a dyn MacroEvaluator>,
}

/// The outcome of assembling a program: the object code if assembly
/// succeeded well enough to produce one, plus every accumulated
/// diagnostic.
pub struct AssemblyReport {
    pub object: Option<ObjectCode>,
    pub errors: Vec<AssemblyError>,
}

impl AssemblyReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

pub struct Assembler<'a> {
    config: AssemblerConfig,
    host: AssemblerHost<'a>,
    errors: Vec<AssemblyError>,
    macro_registry: MacroRegistry,
    /// Canonical path -> already-scanned namespace, so the same file
    /// imported from two places is only ever scanned once.
    scanned: HashMap<PathBuf, NamespaceRef>,
}

impl<'a> Assembler<'a> {
    pub fn new(config: AssemblerConfig, host: AssemblerHost<'a>) -> Self {
        Assembler {
            config,
            host,
            errors: Vec::new(),
            macro_registry: MacroRegistry::new(),
            scanned: HashMap::new(),
        }
    }

    /// Assemble starting from `entry_path`, the top-level source file.
    /// Returns object code as long as assembly did not hit a fatal
    /// error or the configured error threshold; parse/semantic errors
    /// below threshold are accumulated and returned alongside whatever
    /// object code could still be produced.
    pub fn run(mut self, entry_path: &std::path::Path) -> AssemblyReport {
        let root = match self.scan_file(entry_path, None) {
            Ok(ns) => ns,
            Err(err) => {
                return AssemblyReport {
                    object: None,
                    errors: vec![err],
                }
            }
        };
        if !self.errors.is_empty() {
            return AssemblyReport {
                object: None,
                errors: self.errors,
            };
        }

        let located = match locate::Locator::new().run(&root) {
            Ok(l) => l,
            Err(err) => {
                self.errors.push(err);
                return AssemblyReport {
                    object: None,
                    errors: self.errors,
                };
            }
        };
        match resolve::resolve(located) {
            Ok(object) => AssemblyReport {
                object: Some(object),
                errors: self.errors,
            },
            Err(err) => {
                self.errors.push(err);
                AssemblyReport {
                    object: None,
                    errors: self.errors,
                }
            }
        }
    }

    /// Scan one file into a fresh `Namespace`, recursing into its
    /// `import` statements. `alias` is `Some` when this file is being
    /// scanned because of an `import ... as name`, used only for the
    /// anchor stamped on the namespace.
    fn scan_file(&mut self, path: &std::path::Path, import_anchor: Option<SourceAnchor>) -> AssemblyResult<NamespaceRef> {
        let canonical = path.to_path_buf();
        if let Some(existing) = self.scanned.get(&canonical) {
            return Ok(Rc::clone(existing));
        }

        let opened = self.open_source(path)?;
        let file_rc = Rc::new(opened.canonical_path.clone());
        let is_root = import_anchor.is_none();
        let first_anchor = import_anchor.unwrap_or_else(|| SourceAnchor::new(Rc::clone(&file_rc), &opened.buffer, 0));

        let ns = if is_root {
            Namespace::new_root(opened.canonical_path.clone(), first_anchor)
        } else {
            Namespace::new(opened.canonical_path.clone(), first_anchor)
        };
        // Register before recursing so a self-import or cycle resolves
        // to the in-progress namespace instead of re-scanning.
        self.scanned.insert(canonical.clone(), Rc::clone(&ns));

        let mut in_macro: Option<(String, SourceAnchor, Vec<String>)> = None;
        for (line_index, raw_line) in opened.text.lines().enumerate() {
            let anchor = SourceAnchor::new(Rc::clone(&file_rc), &opened.buffer, line_index);

            if let Some(delim) = macro_delimiter(raw_line) {
                match delim {
                    token::MacroDelimiter::Open(dialect) => {
                        if in_macro.is_some() {
                            self.push_error(AssemblyError::MalformedExpression {
                                anchor,
                                message: "nested macro block".into(),
                            })?;
                            continue;
                        }
                        self.macro_registry.register(format!("<macro:{}>", line_index), anchor.clone());
                        in_macro = Some((dialect, anchor, Vec::new()));
                    }
                    token::MacroDelimiter::Close => {
                        if let Some((dialect, open_anchor, body)) = in_macro.take() {
                            self.run_macro_block(&ns, &dialect, &body.join("\n"), open_anchor)?;
                        }
                    }
                }
                continue;
            }

            if let Some((_, _, body)) = &mut in_macro {
                body.push(raw_line.to_string());
                continue;
            }

            match parse::parse_line(raw_line, &anchor, self.host.macro_evaluator) {
                Ok(Statement::Empty) => {}
                Ok(Statement::Label(name)) => {
                    let mut ns_mut = ns.borrow_mut();
                    if let Err(previous) = ns_mut.add_label(name.clone(), anchor.clone()) {
                        let previous_anchor = previous.anchor.clone();
                        drop(ns_mut);
                        self.push_error(AssemblyError::DuplicateLabel {
                            anchor,
                            previous: previous_anchor,
                            name,
                        })?;
                    }
                }
                Ok(Statement::Instructions(insns)) => {
                    let mut ns_mut = ns.borrow_mut();
                    for insn in insns {
                        ns_mut.push_instruction(insn);
                    }
                }
                Ok(Statement::Import { path: raw, alias }) => {
                    self.handle_import(&ns, &raw, alias, anchor)?;
                }
                Err(err) => self.push_error(err)?,
            }
        }

        Ok(ns)
    }

    fn handle_import(
        &mut self,
        ns: &NamespaceRef,
        raw_path: &str,
        alias: Option<String>,
        anchor: SourceAnchor,
    ) -> AssemblyResult<()> {
        let candidates = self.config.candidates(raw_path, self.host.path_expander);
        let mut found = None;
        let mut searched = Vec::new();
        for candidate in &candidates {
            searched.push(candidate.display().to_string());
            if candidate.exists() {
                found = Some(candidate.clone());
                break;
            }
        }
        let Some(target) = found else {
            return self.push_error(AssemblyError::ImportNotFound {
                anchor,
                path: raw_path.to_string(),
                searched,
            });
        };

        let imported = self.scan_file(&target, Some(anchor.clone()))?;
        match alias {
            Some(name) => {
                let mut ns_mut = ns.borrow_mut();
                if let Some(existing) = ns_mut.namespace(&name) {
                    if !Rc::ptr_eq(&existing, &imported) {
                        let existing_path = existing.borrow().filename.display().to_string();
                        return self.push_error(AssemblyError::AliasConflict {
                            anchor,
                            existing: existing_path,
                            name,
                        });
                    }
                } else {
                    ns_mut.add_namespace_alias(name, imported);
                }
            }
            None => {
                let imported_ref = imported.borrow();
                let mut ns_mut = ns.borrow_mut();
                ns_mut.merge_from(&imported_ref);
            }
        }
        Ok(())
    }

    fn run_macro_block(
        &mut self,
        ns: &NamespaceRef,
        dialect: &str,
        body: &str,
        open_anchor: SourceAnchor,
    ) -> AssemblyResult<()> {
        let Some(evaluator) = self.host.macro_evaluator else {
            return self.push_error(AssemblyError::MacroException {
                anchor: open_anchor,
                message: format!("no macro evaluator configured for dialect '{dialect}'"),
            });
        };
        let mut sink = NamespaceMacroSink {
            ns: Rc::clone(ns),
            anchor: open_anchor.clone(),
            auto_labels: macros::AutoLabelGenerator::new(),
        };
        if let Err(exception) = evaluator.evaluate(dialect, body, &mut sink) {
            for frame in &exception.frames {
                let anchor = self
                    .macro_registry
                    .translate(frame)
                    .unwrap_or_else(|| open_anchor.clone());
                self.push_error(AssemblyError::MacroException {
                    anchor,
                    message: exception.message.clone(),
                })?;
            }
            if exception.frames.is_empty() {
                self.push_error(AssemblyError::MacroException {
                    anchor: open_anchor,
                    message: exception.message,
                })?;
            }
        }
        Ok(())
    }

    fn open_source(&self, path: &std::path::Path) -> AssemblyResult<OpenedSource> {
        self.host.source_provider.open_by_path(path).map_err(|e| AssemblyError::UnreadableImport {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }

    /// Accumulate a non-fatal error, turning it into
    /// `ThresholdExceeded` once the configured limit is hit.
    fn push_error(&mut self, error: AssemblyError) -> AssemblyResult<()> {
        if error.is_fatal() {
            return Err(error);
        }
        self.errors.push(error);
        if self.errors.len() >= self.config.error_threshold {
            return Err(AssemblyError::ThresholdExceeded {
                threshold: self.config.error_threshold,
            });
        }
        Ok(())
    }
}

/// `MacroSink` implementation that emits straight into a namespace's
/// current block, matching the evaluator's `emit`/`label` contract.
struct NamespaceMacroSink {
    ns: NamespaceRef,
    anchor: SourceAnchor,
    auto_labels: macros::AutoLabelGenerator,
}

impl macros::MacroSink for NamespaceMacroSink {
    fn emit(&mut self, instruction: crate::instructions::Instruction) {
        self.ns.borrow_mut().push_instruction(instruction);
    }

    fn label(&mut self, name: Option<&str>, anchor: SourceAnchor) -> String {
        let name = name
            .map(str::to_string)
            .unwrap_or_else(|| self.auto_labels.next_name());
        let _ = self.ns.borrow_mut().add_label(name.clone(), anchor);
        name
    }
}
