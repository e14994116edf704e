//! Operator channel for the stepped loop.

use std::io::{BufRead, Write};

use anyhow::{Context, Result};

use crate::core::types::{Bead, BeadId};
use crate::report::Resolution;

/// What to do after a bead resolved successfully (or was skipped).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepDecision {
    Continue,
    Stop,
    /// Run this ready bead next instead of the highest-priority one.
    JumpTo(BeadId),
}

/// What to do after a bead failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDecision {
    /// Apply the operator `retry` transition and run the bead again.
    Retry,
    /// Leave the bead blocked and carry on.
    Skip,
    Stop,
}

/// Synchronous decision source consulted by the stepped loop between beads.
pub trait Operator {
    /// Called after each bead while ready beads remain. `ready` is in dispatch order.
    fn after_step(&mut self, resolution: &Resolution, ready: &[Bead]) -> Result<StepDecision>;

    fn on_failure(&mut self, resolution: &Resolution) -> Result<FailureDecision>;
}

/// Line-oriented operator reading answers from `input` and prompting on `output`.
///
/// End of input counts as `stop`.
pub struct StdinOperator<R, W> {
    input: R,
    output: W,
}

impl<R: BufRead, W: Write> StdinOperator<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    /// Blocks the calling thread until a line or EOF arrives. A Ctrl-C during
    /// the prompt is acted on once the read returns.
    fn read_answer(&mut self, prompt: &str) -> Result<Option<String>> {
        write!(self.output, "{prompt} ").context("write prompt")?;
        self.output.flush().context("flush prompt")?;
        let mut line = String::new();
        let read = self.input.read_line(&mut line).context("read operator input")?;
        if read == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim().to_string()))
    }
}

impl<R: BufRead, W: Write> Operator for StdinOperator<R, W> {
    fn after_step(&mut self, resolution: &Resolution, ready: &[Bead]) -> Result<StepDecision> {
        writeln!(self.output, "{resolution}").context("write resolution")?;
        let listing: Vec<String> = ready
            .iter()
            .map(|bead| format!("{} ({})", bead.id, bead.title))
            .collect();
        writeln!(self.output, "ready: {}", listing.join(", ")).context("write ready list")?;

        loop {
            let Some(answer) = self.read_answer("[c]ontinue, [s]top, [j]ump <id>?")? else {
                return Ok(StepDecision::Stop);
            };
            let mut words = answer.split_whitespace();
            match (words.next(), words.next()) {
                (None | Some("c" | "continue"), None) => return Ok(StepDecision::Continue),
                (Some("s" | "stop"), None) => return Ok(StepDecision::Stop),
                (Some("j" | "jump"), Some(id)) => {
                    if ready.iter().any(|bead| bead.id == id) {
                        return Ok(StepDecision::JumpTo(id.to_string()));
                    }
                    writeln!(self.output, "bead '{id}' is not ready").context("write notice")?;
                }
                _ => {
                    writeln!(self.output, "unrecognized answer '{answer}'")
                        .context("write notice")?;
                }
            }
        }
    }

    fn on_failure(&mut self, resolution: &Resolution) -> Result<FailureDecision> {
        writeln!(self.output, "{resolution}").context("write resolution")?;
        loop {
            let Some(answer) = self.read_answer("[r]etry, s[k]ip, [s]top?")? else {
                return Ok(FailureDecision::Stop);
            };
            match answer.as_str() {
                "r" | "retry" => return Ok(FailureDecision::Retry),
                "k" | "skip" => return Ok(FailureDecision::Skip),
                "s" | "stop" => return Ok(FailureDecision::Stop),
                _ => {
                    writeln!(self.output, "unrecognized answer '{answer}'")
                        .context("write notice")?;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::core::types::ExecutionResult;
    use crate::test_support::bead;

    fn resolution(ok: bool) -> Resolution {
        Resolution {
            bead_id: "a".to_string(),
            title: "a".to_string(),
            result: if ok {
                ExecutionResult::success("done")
            } else {
                ExecutionResult::failure("exit 1")
            },
        }
    }

    fn operator(input: &str) -> StdinOperator<Cursor<Vec<u8>>, Vec<u8>> {
        StdinOperator::new(Cursor::new(input.as_bytes().to_vec()), Vec::new())
    }

    #[test]
    fn empty_line_continues() {
        let mut op = operator("\n");
        let decision = op.after_step(&resolution(true), &[bead("b", 0)]).expect("decide");
        assert_eq!(decision, StepDecision::Continue);
    }

    #[test]
    fn jump_to_unready_bead_reprompts() {
        let mut op = operator("j zzz\nj b\n");
        let decision = op
            .after_step(&resolution(true), &[bead("b", 0), bead("c", 0)])
            .expect("decide");
        assert_eq!(decision, StepDecision::JumpTo("b".to_string()));
        let transcript = String::from_utf8(op.output).expect("utf8");
        assert!(transcript.contains("bead 'zzz' is not ready"));
    }

    #[test]
    fn end_of_input_stops() {
        let mut op = operator("");
        assert_eq!(
            op.after_step(&resolution(true), &[bead("b", 0)]).expect("decide"),
            StepDecision::Stop
        );
        assert_eq!(
            op.on_failure(&resolution(false)).expect("decide"),
            FailureDecision::Stop
        );
    }

    #[test]
    fn failure_answers_are_parsed_after_garbage() {
        let mut op = operator("what\nk\n");
        assert_eq!(
            op.on_failure(&resolution(false)).expect("decide"),
            FailureDecision::Skip
        );
    }
}
