//! `strato apply` - resolve, diff, confirm, and execute

use super::prepare;
use crate::cli::ApplyArgs;
use crate::ui::{ExecutionRenderer, PlanRenderer};
use crate::Context;
use anyhow::Result;
use dialoguer::Confirm;
use std::rc::Rc;
use strato_core::{Diff, ExecuteContext};

pub fn run(ctx: &Context, args: &ApplyArgs) -> Result<()> {
    let mut run = prepare(&args.dir, args.refresh)?;

    let current: Vec<_> = run.state.resources().cloned().collect();
    let pending = run.resolution.entities();
    let diff = Diff::between(&current, &pending);

    let renderer = PlanRenderer {
        verbose: ctx.verbose > 0,
        root: Some(run.resolution.root.clone()),
    };
    let summary = renderer.render(&diff);

    if !summary.has_changes() {
        if !ctx.quiet {
            println!("No changes. Resources match the configuration.");
        }
        return Ok(());
    }

    println!("\nPlan: {}", summary.line());

    if !args.auto_approve
        && !Confirm::new()
            .with_prompt("Apply these changes?")
            .default(false)
            .interact()?
    {
        println!("Apply cancelled.");
        return Ok(());
    }

    // Every pending file gets a state partition, so files whose resources
    // were all deleted still round-trip as empty.
    for file in &run.resolution.files {
        run.state.ensure_file(file);
    }

    let mut listener = ExecutionRenderer;
    let mut cx = ExecuteContext {
        registry: &run.registry,
        state: &mut run.state,
        backend: &run.backend,
        listener: &mut listener,
        root: Some(Rc::clone(&run.resolution.root)),
    };

    println!();
    diff.execute(&mut cx)?;

    println!("\nApplied: {}", summary.line());
    Ok(())
}
