use shelfwatch_core::queue::{HandlerError, HandlerRegistry, TaskHandler};
use shelfwatch_core::storage::models::CatalogEntry;
use shelfwatch_core::TaskType;
use std::collections::HashMap;
use std::io;
use std::process::Command;
use tracing::{debug, warn};

const MAX_STDERR_LEN: usize = 400;

/// Runs a configured program with the entry path as its last argument.
/// A non-zero exit is retried; a program that cannot be started is not.
pub struct ExternalCommandHandler {
    program: String,
    args: Vec<String>,
}

impl ExternalCommandHandler {
    pub fn new(command: &[String]) -> Option<Self> {
        let (program, args) = command.split_first()?;
        Some(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }
}

impl TaskHandler for ExternalCommandHandler {
    fn run(&self, entry: &CatalogEntry) -> Result<(), HandlerError> {
        debug!("Running {} {:?} {}", self.program, self.args, entry.path);
        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(&entry.path)
            .output()
            .map_err(|e| match e.kind() {
                io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied => {
                    HandlerError::Permanent(format!("cannot run {}: {}", self.program, e))
                }
                _ => HandlerError::Failed(format!("{}: {}", self.program, e)),
            })?;

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let stderr: String = stderr.trim().chars().take(MAX_STDERR_LEN).collect();
        Err(HandlerError::Failed(format!(
            "{} exited with {}: {}",
            self.program, output.status, stderr
        )))
    }
}

/// Build the registry from the `[handlers]` config table.
pub fn registry_from_config(handlers: &HashMap<String, Vec<String>>) -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    for (name, command) in handlers {
        let task = match name.parse::<TaskType>() {
            Ok(task) => task,
            Err(e) => {
                warn!("Ignoring handler '{}': {}", name, e);
                continue;
            }
        };
        match ExternalCommandHandler::new(command) {
            Some(handler) => {
                registry.register(task, handler);
            }
            None => warn!("Ignoring handler '{}': empty command", name),
        }
    }
    registry
}
