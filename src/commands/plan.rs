//! `strato plan` - resolve and diff without executing

use super::prepare;
use crate::cli::PlanArgs;
use crate::ui::PlanRenderer;
use crate::Context;
use anyhow::Result;
use strato_core::Diff;

pub fn run(ctx: &Context, args: &PlanArgs) -> Result<()> {
    let run = prepare(&args.dir, args.refresh)?;

    let current: Vec<_> = run.state.resources().cloned().collect();
    let pending = run.resolution.entities();
    let diff = Diff::between(&current, &pending);

    let renderer = PlanRenderer {
        verbose: ctx.verbose > 0,
        root: Some(run.resolution.root.clone()),
    };
    let summary = renderer.render(&diff);

    if summary.has_changes() {
        println!("\nPlan: {}", summary.line());
    } else if !ctx.quiet {
        println!("No changes. Resources match the configuration.");
    }

    Ok(())
}
