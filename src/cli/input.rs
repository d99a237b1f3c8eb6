// Shared line reader
//
// The prompt loop and the approval gate both read from stdin. They never
// read at the same time: approval is only asked while a turn runs.
// A terminal gets a rustyline editor; piped input is read line by line.

use anyhow::{anyhow, Context, Result};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::io::{IsTerminal, Write};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};
use tokio::sync::Mutex;

enum Source {
    /// rustyline blocks, so each read runs on the blocking pool
    Editor(Arc<StdMutex<DefaultEditor>>),
    Lines(Mutex<Lines<Box<dyn AsyncBufRead + Unpin + Send>>>),
}

pub struct LineInput {
    source: Source,
}

impl LineInput {
    /// Line editor when stdin is a terminal, plain lines otherwise
    pub fn stdin() -> Result<Self> {
        if !std::io::stdin().is_terminal() {
            return Ok(Self::from_reader(BufReader::new(tokio::io::stdin())));
        }
        let editor = DefaultEditor::new().context("Failed to initialize line editor")?;
        Ok(Self {
            source: Source::Editor(Arc::new(StdMutex::new(editor))),
        })
    }

    pub fn from_reader(reader: impl AsyncBufRead + Unpin + Send + 'static) -> Self {
        let reader: Box<dyn AsyncBufRead + Unpin + Send> = Box::new(reader);
        Self {
            source: Source::Lines(Mutex::new(reader.lines())),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.source, Source::Editor(_))
    }

    /// Show `prompt` and return the next line without its terminator.
    /// None at end of input or when the user presses Ctrl-C / Ctrl-D at
    /// the prompt.
    pub async fn read_line(&self, prompt: &str) -> Result<Option<String>> {
        match &self.source {
            Source::Editor(editor) => {
                let editor = editor.clone();
                let prompt = prompt.to_string();
                let line = tokio::task::spawn_blocking(move || {
                    let mut editor = editor
                        .lock()
                        .map_err(|_| anyhow!("line editor lock poisoned"))?;
                    match editor.readline(&prompt) {
                        Ok(line) => Ok(Some(line)),
                        Err(ReadlineError::Interrupted | ReadlineError::Eof) => Ok(None),
                        Err(e) => Err(anyhow::Error::from(e).context("Failed to read input")),
                    }
                })
                .await
                .context("Line editor task failed")??;
                Ok(line)
            }
            Source::Lines(lines) => {
                if !prompt.is_empty() {
                    let mut stderr = std::io::stderr();
                    let _ = write!(stderr, "{}", prompt);
                    let _ = stderr.flush();
                }
                lines
                    .lock()
                    .await
                    .next_line()
                    .await
                    .context("Failed to read input")
            }
        }
    }

    /// Add a submitted prompt to the editor history
    pub fn remember(&self, line: &str) {
        if let Source::Editor(editor) = &self.source {
            if let Ok(mut editor) = editor.lock() {
                let _ = editor.add_history_entry(line);
            }
        }
    }
}
