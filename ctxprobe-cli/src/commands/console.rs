//! Terminal rendering of sweep progress.

use colored::{ColoredString, Colorize};
use shared::probe::{
    ModelDescriptor, ModelRun, ProbePhase, ProbeStep, ProgressObserver, RunOutcome, StepStatus,
};
use std::io::{self, Write};

/// Prints one status line per step, rewritten in place while the step runs.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleObserver;

fn flush() {
    io::stdout().flush().ok();
}

fn paint_status(status: &StepStatus) -> ColoredString {
    let label = status.to_string();
    match status {
        StepStatus::Ok => label.green().bold(),
        StepStatus::Truncated(_) => label.yellow().bold(),
        _ => label.red().bold(),
    }
}

/// Progress line shown while a step is in flight.
pub fn phase_line(context: u32, phase: ProbePhase) -> Option<String> {
    match phase {
        ProbePhase::Preloading | ProbePhase::Measuring => {
            Some(format!("  > Ctx {context:<6} ... ({})", title_case(&phase.to_string())))
        }
        _ => None,
    }
}

fn title_case(word: &str) -> String {
    let mut chars = word.chars();
    chars.next().map_or_else(String::new, |first| {
        first.to_uppercase().chain(chars).collect()
    })
}

/// Summary line for a recorded step, without the status tag.
pub fn step_line(step: &ProbeStep) -> String {
    let context = step.target_context;
    let telemetry = &step.telemetry;
    match step.status {
        StepStatus::FailHttp(code) => format!(
            "  > Ctx {context:<6} -> HTTP {code} | Mem: {:>4.1}GiB |",
            telemetry.vram_gib
        ),
        StepStatus::Failed => format!("  > Ctx {context:<6} -> no response |"),
        _ => {
            let metrics = &step.metrics;
            format!(
                "  > Ctx {context:<6} -> TPS: {:>5.1} | Gen: {} | Time: {:>4.1}s | Mem: {:>4.1}GiB |",
                metrics.eval_tps,
                metrics.generated_tokens,
                metrics.total_duration_secs,
                telemetry.vram_gib
            )
        }
    }
}

/// Closing line for a model, naming the best passing context.
pub fn optimal_line(run: &ModelRun) -> String {
    match run.optimal_context() {
        Some(context) => format!("    -> Optimal Context ca.: {context}"),
        None => "    -> Optimal Context ca.: none (first step failed)".to_string(),
    }
}

impl ProgressObserver for ConsoleObserver {
    fn model_started(&self, model: &ModelDescriptor) {
        println!(
            "{}",
            format!("--- Testing Model: {} ({}) ---", model.name, model.digest)
                .cyan()
                .bold()
        );
    }

    fn phase_changed(&self, _model: &str, context: u32, phase: ProbePhase) {
        if let Some(line) = phase_line(context, phase) {
            print!("\r{line}");
            flush();
        }
    }

    fn step_recorded(&self, _model: &str, step: &ProbeStep) {
        println!("\r{} {}      ", step_line(step), paint_status(&step.status));
        if step.is_terminal() {
            println!("    -> STOP: {}", step.stop_reason.red());
        }
    }

    fn model_finished(&self, run: &ModelRun) {
        if run.outcome == RunOutcome::CeilingReached {
            println!("{}", "    -> Max context reached without a failure".green());
        }
        println!("{}\n", optimal_line(run).bold());
    }
}
