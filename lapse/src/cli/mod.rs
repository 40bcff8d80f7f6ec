//! Command-line interface for lapse
//!
//! The commands run the same rule model and rewriter the agent uses, so
//! `inspect` and `transform` show exactly what happens at class-load time.

pub mod args;

pub use args::{Args, Command};

use crate::classfile::{method_modifiers, opcodes, ClassFile};
use crate::config::Config;
use crate::rewrite::{ClassDumper, MethodAction, MethodPlan, Transformer};
use anyhow::{bail, Context, Result};
use log::warn;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

/// Run one parsed command, writing its report to `out`
///
/// # Errors
///
/// Returns an error if an input cannot be read or parsed, an output cannot
/// be written, or (for `transform`) any class failed.
pub fn run(args: Args, out: &mut impl Write) -> Result<()> {
    match args.command {
        Command::Check { config } => check(&config, out),
        Command::Inspect { class, config, disassemble } => inspect(&class, config.as_deref(), disassemble, out),
        Command::Transform { config, out: out_dir, classes } => transform(&config, &out_dir, &classes, out),
    }
}

fn load_config(path: &Path) -> Result<Config> {
    Config::from_path(path).with_context(|| format!("Failed to load rule file {}", path.display()))
}

fn check(config_path: &Path, out: &mut impl Write) -> Result<()> {
    let config = load_config(config_path)?;
    let entry_points = config.entry_points();
    let classes = config.instrumented_classes();
    writeln!(out, "{}: ok", config_path.display())?;
    writeln!(
        out,
        "entry points: {} filter(s), {} handler(s)",
        entry_points.filter_count(),
        entry_points.handler_count()
    )?;
    writeln!(out, "instrumented classes: {}", classes.len())?;
    for (class, methods) in classes {
        writeln!(out, "  {class}")?;
        for method in methods {
            writeln!(out, "    {method}")?;
        }
    }
    Ok(())
}

fn inspect(class_path: &Path, config_path: Option<&Path>, disassemble: bool, out: &mut impl Write) -> Result<()> {
    let config = match config_path {
        Some(path) => load_config(path)?,
        None => Config::default(),
    };
    let bytes = std::fs::read(class_path).with_context(|| format!("Failed to read {}", class_path.display()))?;
    let transformer = Transformer::new(Arc::new(config), None);
    let report = transformer.inspect(&bytes)?;
    let class = ClassFile::parse(&bytes)?;

    writeln!(out, "{} (class file version {})", report.class_name, report.major_version)?;
    for method in &report.methods {
        let flags = class.methods[method.index].access_flags;
        let action = match method.action {
            MethodAction::Untouched => "-".to_string(),
            MethodAction::Skip(reason) => format!("skip: {reason}"),
            MethodAction::Wrap { pass_through, measuring } => format!("wrap: {}", roles(pass_through, measuring)),
            MethodAction::Inline { pass_through, measuring } => {
                format!("in place: {}", roles(pass_through, measuring))
            }
        };
        let modifiers = method_modifiers(flags);
        let signature = format!("{}{}", method.name, method.descriptor);
        let declared = if modifiers.is_empty() { signature } else { format!("{modifiers} {signature}") };
        writeln!(out, "  {declared}")?;
        writeln!(out, "      {}  [{action}]", method.identity)?;
    }

    if disassemble {
        let internal_name = class.this_class_name()?.to_string();
        let Some(rewritten) = transformer.transform(&internal_name, &bytes)? else {
            writeln!(out, "nothing to rewrite")?;
            return Ok(());
        };
        let rewritten = ClassFile::parse(&rewritten)?;
        let instrumented = |m: &&MethodPlan| matches!(m.action, MethodAction::Wrap { .. } | MethodAction::Inline { .. });
        for method in report.methods.iter().filter(instrumented) {
            let member = rewritten
                .methods
                .iter()
                .find(|m| {
                    rewritten.member_name(m).ok() == Some(method.name.as_str())
                        && rewritten.member_descriptor(m).ok() == Some(method.descriptor.as_str())
                })
                .with_context(|| format!("{} missing from rewritten class", method.name))?;
            let Some(code) = rewritten.code_of(member)? else { continue };
            writeln!(out, "\n{}{}  (max_stack {}, max_locals {})", method.name, method.descriptor, code.max_stack, code.max_locals)?;
            for (offset, instruction) in opcodes::disassemble(&code.code) {
                writeln!(out, "  {offset:>4}: {instruction}")?;
            }
        }
    }
    Ok(())
}

fn roles(pass_through: bool, measuring: bool) -> &'static str {
    match (pass_through, measuring) {
        (true, true) => "entry point, measured",
        (true, false) => "entry point",
        _ => "measured",
    }
}

fn transform(config_path: &Path, out_dir: &Path, classes: &[std::path::PathBuf], out: &mut impl Write) -> Result<()> {
    let config = load_config(config_path)?;
    let transformer = Transformer::new(Arc::new(config), None);
    let layout = ClassDumper::new(out_dir);
    let mut failed = 0usize;

    for path in classes {
        match transform_one(&transformer, &layout, path) {
            Ok(Some(target)) => writeln!(out, "rewrote   {} -> {}", path.display(), target.display())?,
            Ok(None) => writeln!(out, "unchanged {}", path.display())?,
            Err(e) => {
                warn!("{}: {e:#}", path.display());
                writeln!(out, "failed    {}: {e:#}", path.display())?;
                failed += 1;
            }
        }
    }
    if failed > 0 {
        bail!("{failed} of {} class file(s) could not be transformed", classes.len());
    }
    Ok(())
}

fn transform_one(transformer: &Transformer, layout: &ClassDumper, path: &Path) -> Result<Option<std::path::PathBuf>> {
    let bytes = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let internal_name = ClassFile::parse(&bytes)?.this_class_name()?.to_string();
    let Some(rewritten) = transformer.transform(&internal_name, &bytes)? else {
        return Ok(None);
    };
    let target = layout.path_for(&internal_name);
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent).with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    std::fs::write(&target, rewritten).with_context(|| format!("Failed to write {}", target.display()))?;
    Ok(Some(target))
}
