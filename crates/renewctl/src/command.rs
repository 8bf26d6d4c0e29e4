//! Runs an external command as a production function.
use std::process::{Command, Output};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use renewable::Producer;

/// An external command whose output is the cached value.
#[derive(Clone, Debug)]
pub struct ExternalCommand {
    program: String,
    args: Vec<String>,
    runs: Arc<AtomicUsize>,
}

impl ExternalCommand {
    pub fn new(program: String, args: Vec<String>) -> Self {
        Self {
            program,
            args,
            runs: Arc::default(),
        }
    }

    /// How often the command has been started so far.
    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::Relaxed)
    }

    /// Runs the command once.
    ///
    /// The trimmed stdout is the value. A failure to spawn or a non-zero exit is an error
    /// carrying the trimmed stderr, or the exit status if stderr is empty.
    pub fn run(&self) -> Result<String, String> {
        self.runs.fetch_add(1, Ordering::Relaxed);

        let output = Command::new(&self.program)
            .args(&self.args)
            .output()
            .map_err(|err| format!("failed to spawn `{}`: {err}", self.program))?;

        evaluate(output)
    }

    /// Wraps the command into a producer named after the program.
    pub fn producer(&self) -> Producer<String, String> {
        let command = self.clone();
        Producer::new(move || command.run()).named(self.program.clone())
    }
}

fn evaluate(output: Output) -> Result<String, String> {
    if output.status.success() {
        return Ok(String::from_utf8_lossy(&output.stdout).trim().to_owned());
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    match stderr.trim() {
        "" => Err(format!("command failed with {}", output.status)),
        stderr => Err(stderr.to_owned()),
    }
}
