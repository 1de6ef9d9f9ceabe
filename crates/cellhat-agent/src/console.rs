//! Line-oriented console input.
//!
//! Stdin is read on a dedicated OS thread and forwarded over a channel so the
//! foreground task can `select!` between user input and modem events.

use std::io::{BufRead, Write};

use tokio::sync::mpsc;

use cellhat_modem::Prompter;

pub struct Console {
    lines: mpsc::Receiver<String>,
}

impl Console {
    pub fn spawn() -> std::io::Result<Self> {
        let (tx, rx) = mpsc::channel(16);
        std::thread::Builder::new()
            .name("stdin".into())
            .spawn(move || {
                for line in std::io::stdin().lock().lines() {
                    let Ok(line) = line else { break };
                    if tx.blocking_send(line).is_err() {
                        break;
                    }
                }
            })?;
        Ok(Self { lines: rx })
    }

    /// Next input line, or `None` once stdin is closed.
    pub async fn next_line(&mut self) -> Option<String> {
        self.lines.recv().await.map(|l| l.trim().to_string())
    }

    /// Print `prompt` and wait for the answer.
    pub async fn ask(&mut self, prompt: &str) -> anyhow::Result<String> {
        print!("{prompt}");
        let _ = std::io::stdout().flush();
        self.next_line()
            .await
            .ok_or_else(|| anyhow::anyhow!("stdin closed"))
    }
}

impl Prompter for Console {
    async fn confirm(&mut self, question: &str) -> bool {
        loop {
            print!("{question} [y/n]: ");
            let _ = std::io::stdout().flush();
            match self.next_line().await.as_deref() {
                Some("y") | Some("Y") => return true,
                Some("n") | Some("N") | None => return false,
                Some(_) => continue,
            }
        }
    }
}
