//! Interactive setup session that builds the [`RunConfiguration`].

use anyhow::{Result, anyhow, bail};
use colored::Colorize;
use shared::config::{LogSource, RunConfiguration, StopThresholds, SweepParams};
use shared::probe::ModelDescriptor;
use std::{
    io::{self, BufRead, StdinLock, Stdout, Write},
    path::PathBuf,
    str::FromStr,
};
use url::Url;

const LOG_CHOICES: [&str; 3] = [
    "Docker Container",
    "Native Installation (Logfile)",
    "No Logs",
];

/// Facts gathered before the questions start.
#[derive(Debug, Clone)]
pub struct SetupContext<'a> {
    pub server_url: Url,
    pub models: &'a [ModelDescriptor],
    pub integrated_gpu: bool,
    pub output_dir: PathBuf,
}

/// Line-oriented question and answer over any reader and writer.
pub struct Prompter<R, W> {
    input: R,
    output: W,
}

impl Prompter<StdinLock<'static>, Stdout> {
    pub fn stdio() -> Self {
        Self::new(io::stdin().lock(), io::stdout())
    }
}

impl<R: BufRead, W: Write> Prompter<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    pub fn say(&mut self, message: &str) -> Result<()> {
        writeln!(self.output, "{message}")?;
        Ok(())
    }

    fn read_answer(&mut self, message: &str, default: Option<&str>) -> Result<String> {
        match default {
            Some(default) => write!(self.output, "{} [{default}]: ", message.bold())?,
            None => write!(self.output, "{}: ", message.bold())?,
        }
        self.output.flush()?;

        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            bail!("input closed, setup aborted");
        }
        let answer = line.trim();
        Ok(match default {
            Some(default) if answer.is_empty() => default.to_string(),
            _ => answer.to_string(),
        })
    }

    /// Ask until `parse` accepts the answer.
    pub fn ask_with<T>(
        &mut self,
        message: &str,
        default: Option<&str>,
        parse: impl Fn(&str) -> Result<T, String>,
    ) -> Result<T> {
        loop {
            let answer = self.read_answer(message, default)?;
            match parse(&answer) {
                Ok(value) => return Ok(value),
                Err(problem) => writeln!(self.output, "{}", format!(">> Error: {problem}").red())?,
            }
        }
    }

    /// Ask for free text, falling back to `default` on an empty answer.
    pub fn ask_text(&mut self, message: &str, default: &str) -> Result<String> {
        self.ask_with(message, Some(default), |answer| {
            if answer.is_empty() {
                Err("A value is required.".to_string())
            } else {
                Ok(answer.to_string())
            }
        })
    }
}

pub fn parse_count(answer: &str) -> Result<u32, String> {
    u32::from_str(answer).map_err(|_| format!("'{answer}' is not a non-negative whole number."))
}

pub fn parse_positive(answer: &str) -> Result<u32, String> {
    match parse_count(answer)? {
        0 => Err("Value must be greater than 0.".to_string()),
        value => Ok(value),
    }
}

pub fn parse_threshold(answer: &str) -> Result<f64, String> {
    match f64::from_str(answer) {
        Ok(value) if value.is_finite() => Ok(value),
        _ => Err(format!("'{answer}' is not a number.")),
    }
}

/// Accepts a 1-based index into [`LOG_CHOICES`] or one of `docker`, `file`, `none`.
pub fn parse_log_choice(answer: &str) -> Result<usize, String> {
    match answer.to_ascii_lowercase().as_str() {
        "1" | "docker" => Ok(0),
        "2" | "file" => Ok(1),
        "3" | "none" => Ok(2),
        _ => Err("Choose 1, 2 or 3.".to_string()),
    }
}

/// Parse `all` or comma-separated 1-based indices into distinct 0-based ones.
pub fn parse_model_selection(answer: &str, available: usize) -> Result<Vec<usize>, String> {
    if answer.eq_ignore_ascii_case("all") {
        return if available == 0 {
            Err("No models available.".to_string())
        } else {
            Ok((0..available).collect())
        };
    }

    let mut selected = Vec::new();
    for part in answer.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let index: usize = part
            .parse()
            .map_err(|_| format!("'{part}' is not a model number."))?;
        if index == 0 || index > available {
            return Err(format!("Model number {index} is out of range 1..={available}."));
        }
        if !selected.contains(&(index - 1)) {
            selected.push(index - 1);
        }
    }

    if selected.is_empty() {
        Err("Select at least one model!".to_string())
    } else {
        Ok(selected)
    }
}

fn ask_log_source<R: BufRead, W: Write>(prompter: &mut Prompter<R, W>) -> Result<LogSource> {
    let default_source = LogSource::platform_default();

    prompter.say("\nLog Source")?;
    for (index, choice) in LOG_CHOICES.iter().enumerate() {
        prompter.say(&format!("  {}. {choice}", index + 1))?;
    }
    let default_choice = match default_source {
        LogSource::Container { .. } => "1",
        LogSource::File { .. } | LogSource::None => "2",
    };
    let choice = prompter.ask_with("Choice", Some(default_choice), parse_log_choice)?;

    Ok(match choice {
        0 => {
            let default_name = match &default_source {
                LogSource::Container { name } => name.clone(),
                _ => "ollama".to_string(),
            };
            LogSource::Container {
                name: prompter.ask_text("Container Name", &default_name)?,
            }
        }
        1 => {
            let default_path = match &default_source {
                LogSource::File { path } => path.display().to_string(),
                _ => "~/.ollama/logs/server.log".to_string(),
            };
            LogSource::File {
                path: PathBuf::from(prompter.ask_text("Log Path", &default_path)?),
            }
        }
        _ => LogSource::None,
    })
}

fn ask_models<R: BufRead, W: Write>(
    prompter: &mut Prompter<R, W>,
    models: &[ModelDescriptor],
) -> Result<Vec<String>> {
    prompter.say("\nAvailable Models")?;
    for (index, model) in models.iter().enumerate() {
        prompter.say(&format!("  {:>2}. {} ({})", index + 1, model.name, model.digest))?;
    }
    let selected = prompter.ask_with("Select Models (e.g. 1,3 or all)", None, |answer| {
        parse_model_selection(answer, models.len())
    })?;
    Ok(selected
        .into_iter()
        .map(|index| models[index].name.clone())
        .collect())
}

fn ask_sweep<R: BufRead, W: Write>(prompter: &mut Prompter<R, W>) -> Result<SweepParams> {
    let defaults = SweepParams::default();
    prompter.say("\n--- Test Parameters ---")?;
    loop {
        let sweep = SweepParams {
            start_ctx: prompter.ask_with(
                "Start Context",
                Some(&defaults.start_ctx.to_string()),
                parse_positive,
            )?,
            max_ctx: prompter.ask_with(
                "Max Context",
                Some(&defaults.max_ctx.to_string()),
                parse_positive,
            )?,
            step_size: prompter.ask_with(
                "Step Size",
                Some(&defaults.step_size.to_string()),
                parse_positive,
            )?,
            num_predict: prompter.ask_with(
                "Tokens to Generate",
                Some(&defaults.num_predict.to_string()),
                parse_count,
            )?,
        };
        if sweep.start_ctx <= sweep.max_ctx {
            return Ok(sweep);
        }
        prompter.say(
            &">> Error: Start Context must not exceed Max Context."
                .red()
                .to_string(),
        )?;
    }
}

fn ask_thresholds<R: BufRead, W: Write>(
    prompter: &mut Prompter<R, W>,
    integrated_gpu: bool,
) -> Result<StopThresholds> {
    let suggested = StopThresholds::suggested(integrated_gpu);
    prompter.say("\n--- Stop Criteria ---")?;
    let mut ask = |message: &str, default: f64| {
        prompter.ask_with(message, Some(&default.to_string()), parse_threshold)
    };
    Ok(StopThresholds {
        min_gpu_percent: ask("Min GPU %", suggested.min_gpu_percent)?,
        max_sys_ram_gb: ask("Max Sys-RAM GB", suggested.max_sys_ram_gb)?,
        max_vram_budget_gb: ask("Max VRAM Budget GB", suggested.max_vram_budget_gb)?,
        min_eval_tps: ask("Min Eval Speed t/s", suggested.min_eval_tps)?,
        max_duration_seconds: ask("Max Time (s)", suggested.max_duration_seconds)?,
    })
}

/// Run the whole question sequence and return a validated configuration.
pub fn collect_configuration<R: BufRead, W: Write>(
    prompter: &mut Prompter<R, W>,
    context: &SetupContext<'_>,
) -> Result<RunConfiguration> {
    let log_source = ask_log_source(prompter)?;
    let models = ask_models(prompter, context.models)?;
    let sweep = ask_sweep(prompter)?;
    let thresholds = ask_thresholds(prompter, context.integrated_gpu)?;

    let mut config = RunConfiguration::new(context.server_url.clone(), models);
    config.log_source = log_source;
    config.sweep = sweep;
    config.thresholds = thresholds;
    config.integrated_gpu = context.integrated_gpu;
    config.output_dir.clone_from(&context.output_dir);

    config
        .validate()
        .map_err(|errors| anyhow!("invalid configuration: {}", errors.join(" ")))?;
    Ok(config)
}
