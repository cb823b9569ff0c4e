//! Line-oriented terminal front end.
//!
//! Reads commands, forwards them to the view-model, and redraws the note
//! list whenever a new one is published. The busy/list/empty-state toggling
//! lives in [`Visibility`] so it can be checked without a terminal.

use std::io::Write;
use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;

use crate::adapter::{highlight, render_segments, NoteListAdapter};
use crate::types::{Note, NoteSearchResult};
use crate::viewmodel::NoteViewModel;

const ANSI_BOLD: (&str, &str) = ("\x1b[1m", "\x1b[0m");

const HELP: &str = "\
commands:
  add <text>       save a new note
  search [query]   show matching notes (no query shows all)
  rm <row>         delete the note shown on that row
  ls               redraw the current list
  help             show this message
  quit             exit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Add(String),
    Search(String),
    Remove(usize),
    List,
    Help,
    Quit,
}

pub fn parse_command(line: &str) -> Result<Command, String> {
    let line = line.trim();
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };
    match word.to_ascii_lowercase().as_str() {
        "add" => Ok(Command::Add(rest.to_string())),
        "search" | "find" => Ok(Command::Search(rest.to_string())),
        "rm" | "delete" => rest
            .parse::<usize>()
            .ok()
            .filter(|row| *row > 0)
            .map(Command::Remove)
            .ok_or_else(|| "usage: rm <row number>".to_string()),
        "ls" | "list" => Ok(Command::List),
        "help" | "?" => Ok(Command::Help),
        "quit" | "exit" | "q" => Ok(Command::Quit),
        "" => Err(String::new()),
        other => Err(format!("unknown command: {other} (try `help`)")),
    }
}

/// Which parts of the list screen are showing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Visibility {
    pub spinner: bool,
    pub list: bool,
    pub empty_message: bool,
}

impl Visibility {
    /// Nothing loaded yet.
    pub fn loading() -> Self {
        Self {
            spinner: true,
            list: false,
            empty_message: false,
        }
    }

    pub fn resolve(busy: bool, item_count: usize) -> Self {
        if busy {
            return Self::loading();
        }
        Self {
            spinner: false,
            list: item_count > 0,
            empty_message: item_count == 0,
        }
    }
}

pub struct Shell<W> {
    vm: Arc<NoteViewModel>,
    adapter: NoteListAdapter,
    visibility: Visibility,
    in_flight: watch::Receiver<usize>,
    bold: (&'static str, &'static str),
    out: W,
}

impl<W: Write> Shell<W> {
    pub fn new(vm: Arc<NoteViewModel>, out: W) -> Self {
        let on_delete = {
            let vm = Arc::clone(&vm);
            move |note: &Note| vm.launch_remove_note(note.namespace.clone(), note.id.clone())
        };
        let in_flight = vm.in_flight();
        Self {
            vm,
            adapter: NoteListAdapter::new(on_delete),
            visibility: Visibility::loading(),
            in_flight,
            bold: ANSI_BOLD,
            out,
        }
    }

    /// Mark matches with `open`/`close` instead of terminal escapes.
    pub fn with_markers(mut self, open: &'static str, close: &'static str) -> Self {
        self.bold = (open, close);
        self
    }

    pub fn visibility(&self) -> Visibility {
        self.visibility
    }

    pub fn adapter(&self) -> &NoteListAdapter {
        &self.adapter
    }

    pub fn into_output(self) -> W {
        self.out
    }

    fn set_busy(&mut self) -> std::io::Result<()> {
        if !self.visibility.spinner {
            writeln!(self.out, "Working...")?;
        }
        self.visibility = Visibility::loading();
        Ok(())
    }

    /// Apply a command. Returns `false` when the shell should exit.
    pub fn handle_command(&mut self, command: Command) -> std::io::Result<bool> {
        match command {
            Command::Add(text) => {
                self.set_busy()?;
                self.vm.launch_add_note(text);
            }
            Command::Search(query) => {
                self.set_busy()?;
                self.vm.launch_query_notes(query);
            }
            Command::Remove(row) => {
                if self.adapter.delete(row - 1) {
                    self.set_busy()?;
                } else {
                    writeln!(self.out, "no note on row {row}")?;
                }
            }
            Command::List => self.draw()?,
            Command::Help => writeln!(self.out, "{HELP}")?,
            Command::Quit => return Ok(false),
        }
        Ok(true)
    }

    fn is_busy(&self) -> bool {
        *self.in_flight.borrow() > 0
    }

    /// A new list was published. Rows stay hidden while work is pending.
    pub fn on_list(&mut self, list: Vec<NoteSearchResult>) -> std::io::Result<()> {
        self.adapter.submit_list(list);
        self.visibility = Visibility::resolve(self.is_busy(), self.adapter.len());
        self.draw()
    }

    /// The in-flight count changed. Redraw once everything has settled,
    /// whether or not a new list came with it.
    pub fn on_settled(&mut self) -> std::io::Result<()> {
        let next = Visibility::resolve(self.is_busy(), self.adapter.len());
        if next == self.visibility {
            return Ok(());
        }
        self.visibility = next;
        if next.spinner {
            Ok(())
        } else {
            self.draw()
        }
    }

    pub fn on_error(&mut self, message: &str) -> std::io::Result<()> {
        writeln!(self.out, "! {message}")
    }

    fn draw(&mut self) -> std::io::Result<()> {
        if self.visibility.empty_message {
            writeln!(self.out, "No notes yet. Add one with `add <text>`.")?;
        }
        if self.visibility.list {
            let (open, close) = self.bold;
            for (row, item) in self.adapter.items().iter().enumerate() {
                let text = render_segments(&highlight(item), open, close);
                writeln!(self.out, "{:>3}. {text}", row + 1)?;
            }
        }
        self.out.flush()
    }

    /// Drive the shell until `quit` or end of input. Pending work is allowed
    /// to settle before the scope is closed.
    pub async fn run<R>(mut self, input: R) -> anyhow::Result<W>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut lines = input.lines();
        let mut notes = self.vm.notes();
        let mut errors = self.vm.errors();
        let mut in_flight = self.vm.in_flight();

        self.vm.launch_query_notes("");
        loop {
            tokio::select! {
                line = lines.next_line() => {
                    let Some(line) = line? else { break };
                    match parse_command(&line) {
                        Ok(command) => {
                            if !self.handle_command(command)? {
                                break;
                            }
                        }
                        Err(usage) if usage.is_empty() => {}
                        Err(usage) => writeln!(self.out, "{usage}")?,
                    }
                }
                changed = notes.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let list = notes.borrow_and_update().clone();
                    self.on_list(list)?;
                }
                settled = in_flight.changed() => {
                    if settled.is_err() {
                        break;
                    }
                    self.on_settled()?;
                }
                message = errors.recv() => match message {
                    Ok(message) => self.on_error(&message)?,
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!("Dropped {skipped} error messages");
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }

        if in_flight.wait_for(|n| *n == 0).await.is_ok() {
            if notes.has_changed().unwrap_or(false) {
                let list = notes.borrow_and_update().clone();
                self.on_list(list)?;
            }
            self.on_settled()?;
        }
        while let Ok(message) = errors.try_recv() {
            self.on_error(&message)?;
        }
        self.vm.close().await;
        Ok(self.out)
    }
}
