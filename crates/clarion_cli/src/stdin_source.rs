//! Interactive answer source: a person at the terminal.

use anyhow::{Context, Result};
use async_trait::async_trait;
use clarion_core::{ClarionError, SessionInput};
use clarion_reasoning::{Answer, AnswerSource, PhrasedQuestion};
use std::io::{self, BufRead, Write};

/// Prints each question and reads one line from stdin. An empty line or end
/// of input declines the question.
#[derive(Debug, Default)]
pub struct StdinAnswerSource;

impl StdinAnswerSource {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl AnswerSource for StdinAnswerSource {
    fn name(&self) -> &str {
        "stdin"
    }

    async fn answer(&self, question: &PhrasedQuestion, _input: &SessionInput) -> Result<Answer> {
        let text = question.text.clone();
        let line = tokio::task::spawn_blocking(move || read_reply(&text))
            .await
            .context("stdin reader task failed")?
            .map_err(|e| ClarionError::collaborator_permanent("stdin", e.to_string()))?;
        Ok(to_answer(line))
    }
}

fn read_reply(question: &str) -> io::Result<Option<String>> {
    let mut stdout = io::stdout().lock();
    writeln!(stdout, "\n{}", question)?;
    write!(stdout, "> ")?;
    stdout.flush()?;

    let mut line = String::new();
    let read = io::stdin().lock().read_line(&mut line)?;
    Ok((read > 0).then_some(line))
}

fn to_answer(line: Option<String>) -> Answer {
    match line.as_deref().map(str::trim) {
        Some(reply) if !reply.is_empty() => Answer::Text(reply.to_string()),
        _ => Answer::Declined,
    }
}
