// Built-In Executor
//
// Runs the defined benchmark commands in-process and measures them with
// `perf stat` where available, falling back to wall-clock timing elsewhere.
// Produces the same single-record contract as an external executor.

use std::collections::BTreeMap;
use std::process::Command;
use std::time::Instant;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::executor::{Executor, ExecutorContext, ExecutorError};
use crate::record::ResultRecord;

const PERF_EVENTS: &str = "task-clock,cycles,instructions";

/// Measures benchmark commands itself instead of delegating to an external
/// executor process.
#[derive(Debug, Clone)]
pub struct BuiltinExecutor {
    repetitions: u32,
    wall_clock_only: bool,
}

impl Default for BuiltinExecutor {
    fn default() -> Self {
        Self {
            repetitions: 20,
            wall_clock_only: false,
        }
    }
}

impl BuiltinExecutor {
    pub fn new(repetitions: u32) -> Self {
        Self {
            repetitions,
            wall_clock_only: false,
        }
    }

    /// Skip `perf` even where it is available. Useful on hosts where
    /// hardware counters are restricted (containers, locked-down runners).
    pub fn wall_clock_only(mut self) -> Self {
        self.wall_clock_only = true;
        self
    }

    fn measure(&self, argv: Vec<String>) -> Result<CommandMeasurement, ExecutorError> {
        if !self.wall_clock_only && cfg!(target_os = "linux") && perf_available() {
            measure_with_perf(argv, self.repetitions)
        } else {
            measure_wall_clock(argv)
        }
    }
}

impl Executor for BuiltinExecutor {
    fn produce(&self, ctx: &ExecutorContext<'_>) -> Result<ResultRecord, ExecutorError> {
        let mut benchmarks = IndexMap::new();

        for (name, commands) in ctx.defs.benchmarks() {
            tracing::info!(benchmark = name, commands = commands.len(), "measuring");

            let mut measurements = Vec::with_capacity(commands.len());
            for command in commands {
                let argv: Vec<String> =
                    command.split_whitespace().map(|arg| arg.to_owned()).collect();
                measurements.push(self.measure(argv)?);
            }

            benchmarks.insert(name.to_owned(), measurements);
        }

        let payload = MeasurementSet {
            host: HostFacts::gather(),
            benchmarks,
        };

        Ok(ResultRecord::new(
            ctx.commit,
            ctx.metric_key.clone(),
            serde_json::to_value(payload)?,
        ))
    }
}

/// Where the measurement ran. Recorded so history readers can tell apart
/// numbers from different runner hardware.
#[derive(Debug, Clone, Serialize)]
pub struct HostFacts {
    pub arch: String,
    pub os: String,
    pub runner: String,
    pub cpu_model: String,
}

impl HostFacts {
    pub fn gather() -> Self {
        Self {
            arch: std::env::var("RUNNER_ARCH").unwrap_or_else(|_| std::env::consts::ARCH.to_owned()),
            os: std::env::var("RUNNER_OS").unwrap_or_else(|_| std::env::consts::OS.to_owned()),
            runner: std::env::var("RUNNER_NAME").unwrap_or_else(|_| "<local bench>".to_owned()),
            cpu_model: cpu_model().unwrap_or_else(|| "unknown".to_owned()),
        }
    }
}

/// Measurements for one benchmark command.
#[derive(Debug, Clone, Serialize)]
pub struct CommandMeasurement {
    pub cmd: Vec<String>,
    pub counters: BTreeMap<String, Counter>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Counter {
    pub value: f64,
    pub variance: f64,
    pub repetitions: u32,
    pub unit: String,
}

#[derive(Debug, Serialize)]
struct MeasurementSet {
    host: HostFacts,
    benchmarks: IndexMap<String, Vec<CommandMeasurement>>,
}

fn perf_available() -> bool {
    Command::new("perf")
        .arg("--version")
        .output()
        .map(|output| output.status.success())
        .unwrap_or(false)
}

fn measure_with_perf(argv: Vec<String>, repetitions: u32) -> Result<CommandMeasurement, ExecutorError> {
    // perf emits broken JSON under a decimal-comma locale.
    let mut perf = Command::new("perf");
    perf.env("LANG", "C")
        .arg("stat")
        .arg("-j")
        .arg("-e")
        .arg(PERF_EVENTS)
        .arg("--repeat")
        .arg(repetitions.to_string())
        .arg("--")
        .args(&argv);

    let output = perf.output().map_err(|source| ExecutorError::Spawn {
        command: format!("perf stat -- {}", argv.join(" ")),
        source,
    })?;

    if !output.status.success() {
        return Err(ExecutorError::CommandFailed {
            command: argv.join(" "),
            status: output.status,
        });
    }

    // Counters arrive as one JSON object per stderr line.
    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "kebab-case")]
    struct PerfLine {
        event: String,
        counter_value: String,
        unit: String,
        variance: f64,
    }

    let mut counters = BTreeMap::new();
    for line in String::from_utf8_lossy(&output.stderr).lines() {
        let parsed: PerfLine = serde_json::from_str(line)
            .map_err(|err| ExecutorError::Perf(format!("unparseable line {line:?}: {err}")))?;

        if parsed.counter_value == "<not counted>" {
            continue;
        }

        let value: f64 = parsed
            .counter_value
            .parse()
            .map_err(|_| ExecutorError::Perf(format!("non-numeric counter {:?}", parsed.counter_value)))?;

        counters.insert(
            parsed.event,
            Counter {
                value,
                variance: parsed.variance,
                repetitions,
                unit: parsed.unit,
            },
        );
    }

    Ok(CommandMeasurement { cmd: argv, counters })
}

fn measure_wall_clock(argv: Vec<String>) -> Result<CommandMeasurement, ExecutorError> {
    let mut command = Command::new(&argv[0]);
    command.args(&argv[1..]);

    let start = Instant::now();
    let output = command.output().map_err(|source| ExecutorError::Spawn {
        command: argv.join(" "),
        source,
    })?;
    let elapsed = start.elapsed();

    if !output.status.success() {
        return Err(ExecutorError::CommandFailed {
            command: argv.join(" "),
            status: output.status,
        });
    }

    let counters = BTreeMap::from_iter([(
        "wall-time".to_owned(),
        Counter {
            value: elapsed.as_secs_f64() * 1000.0,
            variance: 0.0,
            repetitions: 1,
            unit: "msec".to_owned(),
        },
    )]);

    Ok(CommandMeasurement { cmd: argv, counters })
}

fn cpu_model() -> Option<String> {
    if cfg!(target_os = "linux") {
        let output = Command::new("lscpu").arg("-J").output().ok()?;
        let parsed: serde_json::Value = serde_json::from_slice(&output.stdout).ok()?;

        parsed["lscpu"]
            .as_array()?
            .iter()
            .find(|entry| entry["field"] == "Model name:")?["data"]
            .as_str()
            .map(|model| model.to_owned())
    } else if cfg!(target_os = "macos") {
        let output = Command::new("sysctl")
            .arg("-n")
            .arg("machdep.cpu.brand_string")
            .output()
            .ok()?;

        Some(String::from_utf8_lossy(&output.stdout).trim().to_owned())
    } else {
        None
    }
}
