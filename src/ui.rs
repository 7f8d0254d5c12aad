//! Plan and execution rendering

use colored::Colorize;
use strato_core::{find_workflow, Action, Change, Diff, ExecutionListener, FieldValue, ScopeRef};
use strato_lang::Value;

/// Counts per change kind, for the summary line
#[derive(Debug, Default, Clone, Copy)]
pub struct PlanSummary {
    pub create: usize,
    pub update: usize,
    pub replace: usize,
    pub replace_skipped: usize,
    pub delete: usize,
}

impl PlanSummary {
    pub fn has_changes(&self) -> bool {
        self.create + self.update + self.replace + self.delete > 0
    }

    pub fn line(&self) -> String {
        let mut parts = Vec::new();

        if self.create > 0 {
            parts.push(format!("{} to create", self.create));
        }
        if self.update > 0 {
            parts.push(format!("{} to update", self.update));
        }
        if self.replace > 0 {
            let skipped = if self.replace_skipped > 0 {
                format!(" ({} without a workflow)", self.replace_skipped)
            } else {
                String::new()
            };
            parts.push(format!("{} to replace{skipped}", self.replace));
        }
        if self.delete > 0 {
            parts.push(format!("{} to delete", self.delete));
        }

        parts.join(", ")
    }
}

/// Renders a diff tree as a plan
pub struct PlanRenderer {
    pub verbose: bool,
    pub root: Option<ScopeRef>,
}

impl PlanRenderer {
    pub fn render(&self, diff: &Diff) -> PlanSummary {
        let mut summary = PlanSummary::default();
        self.render_level(diff, 0, &mut summary);
        summary
    }

    fn render_level(&self, diff: &Diff, indent: usize, summary: &mut PlanSummary) {
        let pad = "    ".repeat(indent);

        for change in &diff.changes {
            match change.action {
                Action::Keep => {
                    // A keep may still contain nested changes.
                    if change.sub_diffs.iter().any(|d| d.diff.has_changes()) {
                        println!("{pad}{}", format!("· {}", change.entity().label()).dimmed());
                    } else {
                        continue;
                    }
                }
                Action::Create => {
                    summary.create += 1;
                    println!(
                        "{pad}{}",
                        format!("+ Create {}", change.entity().label()).green()
                    );

                    if self.verbose {
                        self.write_configured(change.entity(), &pad);
                    }
                }
                Action::Update => {
                    summary.update += 1;
                    println!(
                        "{pad}{} {}",
                        format!("* Update {}", change.entity().label()).yellow(),
                        format!("({})", change.changed_fields.join(", ")).dimmed()
                    );

                    if self.verbose {
                        self.write_differences(change, &pad);
                    }
                }
                Action::Replace => {
                    summary.replace += 1;

                    let entity = change.entity();
                    let scope = entity.scope().cloned().or_else(|| self.root.clone());
                    let forced: Vec<&str> = change
                        .changed_fields
                        .iter()
                        .filter(|f| {
                            entity
                                .schema()
                                .field(f)
                                .is_none_or(|s| !s.is_updatable())
                        })
                        .map(String::as_str)
                        .collect();

                    let how = match find_workflow(scope.as_ref(), entity.type_name()) {
                        Some(workflow) => format!("using {}", workflow.name()),
                        None => {
                            summary.replace_skipped += 1;
                            "skipping without a workflow".to_string()
                        }
                    };

                    println!(
                        "{pad}{} {}",
                        format!("⇅ Replace {}", entity.label()).cyan(),
                        format!("(because of {}, {how})", forced.join(", ")).dimmed()
                    );

                    if self.verbose {
                        self.write_differences(change, &pad);
                    }
                }
                Action::Delete => {
                    summary.delete += 1;
                    println!(
                        "{pad}{}",
                        format!("- Delete {}", change.entity().label()).red()
                    );
                }
            }

            for child in &change.sub_diffs {
                self.render_level(&child.diff, indent + 1, summary);
            }
        }
    }

    fn write_configured(&self, entity: &strato_core::Entity, pad: &str) {
        for (name, value) in entity.fields() {
            if let FieldValue::Scalar(value) = value {
                if entity.is_configured(name) {
                    println!("{pad}    · {name}: {}", stringify(value).dimmed());
                }
            }
        }
    }

    fn write_differences(&self, change: &Change, pad: &str) {
        let (Some(current), Some(pending)) = (&change.current, &change.pending) else {
            return;
        };

        for field in &change.changed_fields {
            let old = current.scalar(field).map(stringify);
            let new = pending.scalar(field).map(stringify);

            println!(
                "{pad}    · {field}: {}",
                format!(
                    "{} ⟳ {}",
                    old.as_deref().unwrap_or("(unset)"),
                    new.as_deref().unwrap_or("(unset)")
                )
                .dimmed()
            );
        }
    }
}

/// Streams execution progress as side effects run
pub struct ExecutionRenderer;

impl ExecutionListener for ExecutionRenderer {
    fn on_execute(&mut self, change: &Change) {
        let label = change.entity().label();

        match change.action {
            Action::Create => println!("{}", format!("+ Creating {label}").green()),
            Action::Update => println!("{}", format!("* Updating {label}").yellow()),
            Action::Replace => println!("{}", format!("⇅ Replacing {label}").cyan()),
            Action::Delete => println!("{}", format!("- Deleting {label}").red()),
            Action::Keep => {}
        }
    }

    fn on_replace_skipped(&mut self, change: &Change) {
        println!(
            "{}",
            format!(
                "⇅ Skipping replace of {} (no workflow registered)",
                change.entity().label()
            )
            .yellow()
        );
    }
}

/// Render a value the way plans quote them.
fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => format!("'{s}'"),
        Value::List(items) => {
            let inner: Vec<String> = items.iter().map(stringify).collect();
            format!("[ {} ]", inner.join(", "))
        }
        Value::Map(entries) => {
            let inner: Vec<String> = entries
                .iter()
                .map(|(k, v)| format!("{k}: {}", stringify(v)))
                .collect();
            format!("{{ {} }}", inner.join(", "))
        }
        other => other.to_string(),
    }
}
