//! Scripted process runner for tests.
//!
//! Responses are queued per docker subcommand (`run`, `port`, `rm`,
//! `inspect`, ...) and handed out in order. Every invocation is recorded.

use crate::process::{ProcessOutput, ProcessRunner};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::Mutex;

type Scripted = Result<ProcessOutput, io::ErrorKind>;

/// A [`ProcessRunner`] that replays queued responses.
///
/// An invocation with nothing queued fails with exit code 1 and stderr
/// `unscripted`, which reads like a missing container to the sandbox code.
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    responses: Mutex<HashMap<String, VecDeque<Scripted>>>,
    calls: Mutex<Vec<Vec<String>>>,
}

impl ScriptedRunner {
    /// Create a runner with no scripted responses.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an output for the next call of `subcommand`.
    pub fn push(&self, subcommand: &str, output: ProcessOutput) -> &Self {
        self.queue(subcommand, Ok(output));
        self
    }

    /// Queue a spawn failure for the next call of `subcommand`.
    pub fn push_error(&self, subcommand: &str, kind: io::ErrorKind) -> &Self {
        self.queue(subcommand, Err(kind));
        self
    }

    /// Every recorded invocation as `[program, args...]`.
    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Number of recorded invocations of `subcommand`.
    pub fn calls_to(&self, subcommand: &str) -> usize {
        self.calls()
            .iter()
            .filter(|call| call.get(1).map(String::as_str) == Some(subcommand))
            .count()
    }

    fn queue(&self, subcommand: &str, response: Scripted) {
        self.responses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(subcommand.to_string())
            .or_default()
            .push_back(response);
    }
}

#[async_trait]
impl ProcessRunner for ScriptedRunner {
    async fn run(&self, program: &str, args: &[String]) -> io::Result<ProcessOutput> {
        let mut call = Vec::with_capacity(args.len() + 1);
        call.push(program.to_string());
        call.extend(args.iter().cloned());
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).push(call);

        let subcommand = args.first().map(String::as_str).unwrap_or_default();
        let next = self
            .responses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get_mut(subcommand)
            .and_then(VecDeque::pop_front);

        match next {
            Some(Ok(output)) => Ok(output),
            Some(Err(kind)) => Err(io::Error::new(kind, format!("scripted {subcommand} failure"))),
            None => Ok(ProcessOutput::failed(1, "unscripted")),
        }
    }
}
