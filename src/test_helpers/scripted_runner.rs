// Scripted CommandRunner: replays canned backend output per program name and
// records every request it receives.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::engine::command::{CommandOutput, CommandRequest, CommandRunner};

#[derive(Debug, Clone)]
enum Scripted {
    Output(CommandOutput),
    SpawnError(String),
}

/// Responses are consumed in order per program. Once a program's script is
/// exhausted its last response repeats; unscripted programs succeed with no
/// output.
#[derive(Debug)]
pub struct ScriptedCommandRunner {
    scripts: Mutex<HashMap<String, VecDeque<Scripted>>>,
    calls: Mutex<Vec<CommandRequest>>,
    next_pid: AtomicU32,
}

impl Default for ScriptedCommandRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedCommandRunner {
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            next_pid: AtomicU32::new(4242),
        }
    }

    /// Queue `output` as the next response for `program`.
    pub fn on(&self, program: &str, output: CommandOutput) -> &Self {
        self.push(program, Scripted::Output(output));
        self
    }

    /// Make the next invocation of `program` fail to start.
    pub fn on_spawn_error(&self, program: &str, message: &str) -> &Self {
        self.push(program, Scripted::SpawnError(message.to_string()));
        self
    }

    /// Every request received so far, in order.
    pub fn calls(&self) -> Vec<CommandRequest> {
        self.calls.lock().clone()
    }

    pub fn calls_to(&self, program: &str) -> Vec<CommandRequest> {
        self.calls
            .lock()
            .iter()
            .filter(|request| request.program == program)
            .cloned()
            .collect()
    }

    fn push(&self, program: &str, scripted: Scripted) {
        self.scripts
            .lock()
            .entry(program.to_string())
            .or_default()
            .push_back(scripted);
    }

    fn next(&self, request: &CommandRequest) -> Option<Scripted> {
        self.calls.lock().push(request.clone());
        let mut scripts = self.scripts.lock();
        let queue = scripts.get_mut(&request.program)?;
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }
}

#[async_trait]
impl CommandRunner for ScriptedCommandRunner {
    async fn run(&self, request: &CommandRequest) -> io::Result<CommandOutput> {
        match self.next(request) {
            Some(Scripted::Output(output)) => Ok(output),
            Some(Scripted::SpawnError(message)) => {
                Err(io::Error::new(io::ErrorKind::NotFound, message))
            }
            None => Ok(CommandOutput::new(0, "", "")),
        }
    }

    async fn spawn_detached(&self, request: &CommandRequest) -> io::Result<u32> {
        match self.next(request) {
            Some(Scripted::SpawnError(message)) => {
                Err(io::Error::new(io::ErrorKind::NotFound, message))
            }
            _ => Ok(self.next_pid.fetch_add(1, Ordering::SeqCst)),
        }
    }
}
