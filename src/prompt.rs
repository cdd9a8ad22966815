#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

//! Interactive operator prompts.

use std::io::{self, BufRead, StdinLock, Stdout, Write};

use colored::Colorize;

/// Decides whether an upload batch may proceed.
pub trait Confirm {
    /// Asked once with the number of records that would be sent.
    fn confirm(&mut self, batch_len: usize) -> bool;
}

impl<F: FnMut(usize) -> bool> Confirm for F {
    fn confirm(&mut self, batch_len: usize) -> bool {
        self(batch_len)
    }
}

/// Line-oriented prompt over any reader/writer pair.
pub struct TerminalPrompt<R, W> {
    /// Where answers come from.
    input:  R,
    /// Where questions go.
    output: W,
}

impl TerminalPrompt<StdinLock<'static>, Stdout> {
    /// Prompt bound to the process's stdin and stdout.
    pub fn stdio() -> Self {
        Self::new(io::stdin().lock(), io::stdout())
    }
}

impl<R: BufRead, W: Write> TerminalPrompt<R, W> {
    /// Wraps an input and output stream.
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    /// Prints `question` and reads one trimmed line. `None` on end of input.
    fn ask(&mut self, question: &str) -> io::Result<Option<String>> {
        write!(self.output, "{question}")?;
        self.output.flush()?;
        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim().to_string()))
    }

    /// `true` only for an explicit `y`/`yes`.
    pub fn ask_yes_no(&mut self, question: &str) -> io::Result<bool> {
        let answer = self.ask(question)?.unwrap_or_default().to_lowercase();
        Ok(matches!(answer.as_str(), "y" | "yes"))
    }

    /// Shows a numbered list and returns the chosen index. `q` or end of
    /// input cancels.
    pub fn choose<T>(
        &mut self,
        items: &[T],
        label: impl Fn(&T) -> String,
    ) -> io::Result<Option<usize>> {
        if items.is_empty() {
            return Ok(None);
        }
        for (i, item) in items.iter().enumerate() {
            writeln!(self.output, "{:>3}. {}", (i + 1).to_string().bold(), label(item))?;
        }
        loop {
            let Some(answer) = self.ask(&format!("Select [1-{}] or q to cancel: ", items.len()))?
            else {
                return Ok(None);
            };
            if answer.eq_ignore_ascii_case("q") {
                return Ok(None);
            }
            match answer.parse::<usize>() {
                Ok(n) if (1..=items.len()).contains(&n) => return Ok(Some(n - 1)),
                _ => writeln!(self.output, "{}", "Invalid selection.".red())?,
            }
        }
    }
}

impl<R: BufRead, W: Write> Confirm for TerminalPrompt<R, W> {
    fn confirm(&mut self, batch_len: usize) -> bool {
        let question = format!(
            "Found {batch_len} submissions with scores/comments to upload. Proceed? [y/N]: "
        );
        match self.ask_yes_no(&question) {
            Ok(answer) => answer,
            Err(err) => {
                tracing::warn!("Could not read confirmation: {err}");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prompt(input: &str) -> TerminalPrompt<&[u8], Vec<u8>> {
        TerminalPrompt::new(input.as_bytes(), Vec::new())
    }

    #[test]
    fn only_explicit_yes_confirms() {
        assert!(prompt("y\n").confirm(3));
        assert!(prompt(" YES \n").confirm(3));
        assert!(!prompt("\n").confirm(3));
        assert!(!prompt("").confirm(3));
        assert!(!prompt("nope\n").confirm(3));
    }

    #[test]
    fn choose_retries_until_valid() {
        let mut p = prompt("0\nfoo\n2\n");
        let picked = p.choose(&["a", "b"], |s| s.to_string()).expect("io");
        assert_eq!(picked, Some(1));
    }

    #[test]
    fn choose_can_be_cancelled() {
        assert_eq!(prompt("q\n").choose(&[1], |n| n.to_string()).expect("io"), None);
        assert_eq!(prompt("").choose(&[1], |n| n.to_string()).expect("io"), None);
    }
}
