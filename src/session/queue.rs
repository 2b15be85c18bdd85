//! FIFO command queue with a single-slot busy flag.
//!
//! The transport permits exactly one in-flight operation; the queue converts
//! that single-slot constraint into a fair pipeline. A command is started by
//! [`CommandQueue::start`], which marks the queue busy, and the queue stays
//! busy until [`CommandQueue::complete`] runs after the command's completion
//! arrives.

use std::collections::VecDeque;

use super::Command;

/// Ordered queue of deferred commands for one session.
#[derive(Default)]
pub(crate) struct CommandQueue {
    commands: VecDeque<Command>,
    busy: bool,
}

impl CommandQueue {
    /// Creates an empty queue.
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Appends a command to the back of the queue.
    pub(crate) fn push(&mut self, command: Command) {
        self.commands.push_back(command);
        tracing::trace!("enqueued command, queue depth {}", self.commands.len());
    }

    /// Takes the next command for execution and marks the queue busy.
    ///
    /// Returns `None` if the queue is already busy or empty.
    pub(crate) fn start(&mut self) -> Option<Command> {
        if self.busy {
            return None;
        }
        let command = self.commands.pop_front()?;
        self.busy = true;
        Some(command)
    }

    /// Clears the busy flag after the current command finished.
    pub(crate) fn complete(&mut self) {
        self.busy = false;
    }

    /// Removes and returns every queued command, clearing the busy flag.
    pub(crate) fn drain(&mut self) -> VecDeque<Command> {
        self.busy = false;
        std::mem::take(&mut self.commands)
    }

    /// Returns true while a command is executing.
    pub(crate) const fn is_busy(&self) -> bool {
        self.busy
    }

    /// Returns true if no commands are waiting.
    pub(crate) fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::oneshot;

    use super::*;

    fn command() -> Command {
        let (reply, _rx) = oneshot::channel();
        Command::ReadSignalStrength { reply }
    }

    #[test]
    fn test_fifo_order_with_busy_gate() {
        let mut queue = CommandQueue::new();
        queue.push(command());
        queue.push(command());

        assert!(queue.start().is_some());
        assert!(queue.is_busy());
        // Busy queue refuses to start the next command
        assert!(queue.start().is_none());

        queue.complete();
        assert!(!queue.is_busy());
        assert!(queue.start().is_some());
        queue.complete();
        assert!(queue.start().is_none());
        assert!(queue.is_empty());
    }

    #[test]
    fn test_drain_clears_busy() {
        let mut queue = CommandQueue::new();
        queue.push(command());
        queue.push(command());
        let _ = queue.start();
        queue.push(command());

        let drained = queue.drain();
        assert_eq!(drained.len(), 2);
        assert!(!queue.is_busy());
        assert!(queue.is_empty());
    }
}
