//! Echo interpreter: a stand-in for the script VM.
//!
//! Each step moves at most one byte from console RX to console TX and
//! advances the instruction pointer, which is enough to exercise the
//! stepping contract and the console round trip end to end.

use crate::app::ports::{Interpreter, StepContext};

#[derive(Debug, Default)]
pub struct EchoInterpreter {
    steps: u64,
}

impl EchoInterpreter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Steps executed across every slot.
    pub fn steps(&self) -> u64 {
        self.steps
    }
}

impl Interpreter for EchoInterpreter {
    fn step(&mut self, ctx: &mut StepContext<'_>) {
        self.steps += 1;
        ctx.registers.ip = ctx.registers.ip.wrapping_add(1);
        if ctx.console_tx.is_full() {
            return;
        }
        if let Some(byte) = ctx.console_rx.pop() {
            // Room checked above.
            let _ = ctx.console_tx.push(byte);
        }
    }
}
