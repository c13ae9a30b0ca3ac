use std::io::{self, BufRead, Write};

use log::{debug, warn};

/// Yes/no questions asked at fixed checkpoints of a run.
pub trait OperatorPrompt: Send + Sync {
    fn confirm(&self, question: &str) -> bool;
}

/// Interactive prompt on the controlling console. Only `y`/`yes` count as consent.
#[derive(Clone, Copy, Debug, Default)]
pub struct ConsolePrompt;

impl OperatorPrompt for ConsolePrompt {
    fn confirm(&self, question: &str) -> bool {
        print!("{question} [y/N]: ");
        if let Err(err) = io::stdout().flush() {
            warn!("prompt: failed to flush stdout ({err})");
        }
        let mut line = String::new();
        match io::stdin().lock().read_line(&mut line) {
            Ok(_) => {
                let accepted = is_yes(&line);
                debug!("prompt: {question:?} -> {accepted}");
                accepted
            }
            Err(err) => {
                warn!("prompt: failed to read answer ({err}); assuming no");
                false
            }
        }
    }
}

/// Unattended runs: every checkpoint is accepted.
#[derive(Clone, Copy, Debug, Default)]
pub struct AssumeYes;

impl OperatorPrompt for AssumeYes {
    fn confirm(&self, question: &str) -> bool {
        debug!("prompt: {question:?} -> yes (unattended)");
        true
    }
}

/// Block until the operator presses Enter.
pub fn pause() {
    print!("Press Enter to exit...");
    let _ = io::stdout().flush();
    let mut line = String::new();
    let _ = io::stdin().lock().read_line(&mut line);
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

#[cfg(test)]
pub mod scripted {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use super::OperatorPrompt;

    /// Answers questions from a queue and records what was asked.
    /// An exhausted queue answers `fallback`.
    #[derive(Default)]
    pub struct ScriptedPrompt {
        answers: Mutex<VecDeque<bool>>,
        pub asked: Mutex<Vec<String>>,
        fallback: bool,
    }

    impl ScriptedPrompt {
        pub fn new(answers: &[bool], fallback: bool) -> Self {
            Self {
                answers: Mutex::new(answers.iter().copied().collect()),
                asked: Mutex::new(Vec::new()),
                fallback,
            }
        }

        pub fn questions(&self) -> Vec<String> {
            self.asked.lock().unwrap().clone()
        }
    }

    impl OperatorPrompt for ScriptedPrompt {
        fn confirm(&self, question: &str) -> bool {
            self.asked.lock().unwrap().push(question.to_owned());
            self.answers
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(self.fallback)
        }
    }
}
