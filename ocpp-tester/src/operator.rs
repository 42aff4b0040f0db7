use std::{
    collections::VecDeque,
    io::{BufRead, Write},
    sync::{Mutex, PoisonError},
};

use async_trait::async_trait;

/// The person at the charge point: answers prompts and confirms what the
/// harness cannot observe.
#[async_trait]
pub trait Operator: Send + Sync {
    async fn ask(&self, prompt: &str) -> String;

    async fn confirm(&self, question: &str) -> bool {
        let answer = self.ask(&format!("{question} y/n ")).await;
        answer.trim().eq_ignore_ascii_case("y")
    }
}

/// Reads answers from stdin on a blocking task.
#[derive(Debug, Default)]
pub struct StdinOperator;

#[async_trait]
impl Operator for StdinOperator {
    async fn ask(&self, prompt: &str) -> String {
        let prompt = prompt.to_owned();
        let read = tokio::task::spawn_blocking(move || {
            let mut out = std::io::stdout().lock();
            write!(out, "{prompt}")?;
            out.flush()?;
            let mut line = String::new();
            std::io::stdin().lock().read_line(&mut line)?;
            Ok::<_, std::io::Error>(line)
        })
        .await;
        match read {
            Ok(Ok(line)) => line.trim().to_owned(),
            Ok(Err(e)) => {
                log::error!("reading operator input: {}", e);
                String::new()
            }
            Err(e) => {
                log::error!("operator prompt task failed: {}", e);
                String::new()
            }
        }
    }
}

/// Answers from a fixed script, then empty strings. Records every prompt.
#[derive(Debug, Default)]
pub struct ScriptedOperator {
    answers: Mutex<VecDeque<String>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedOperator {
    pub fn new<I, S>(answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            answers: Mutex::new(answers.into_iter().map(Into::into).collect()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[async_trait]
impl Operator for ScriptedOperator {
    async fn ask(&self, prompt: &str) -> String {
        self.prompts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(prompt.to_owned());
        self.answers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or_default()
    }
}
