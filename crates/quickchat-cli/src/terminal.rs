//! Line-oriented delegate.
//!
//! Renders the message list as plain lines. A reload that extends what is
//! already on screen prints only the new tail; anything else redraws the
//! whole list.

use std::{
    io::Write,
    sync::{Mutex, MutexGuard, PoisonError},
};

use quickchat_session::{Message, SessionDelegate};
use tracing::warn;

struct Screen<W> {
    out: W,
    rendered: Vec<Message>,
}

impl<W: Write> Screen<W> {
    fn line(&mut self, args: std::fmt::Arguments<'_>) {
        if let Err(e) = self.out.write_fmt(args).and_then(|()| self.out.write_all(b"\n")) {
            warn!(error = %e, "unable to write to terminal");
        }
    }

    fn message(&mut self, message: &Message) {
        self.line(format_args!("<{}> {}", message.author, message.body));
    }
}

/// [`SessionDelegate`] writing to a terminal-like sink.
pub struct TerminalDelegate<W> {
    screen: Mutex<Screen<W>>,
}

impl<W: Write> TerminalDelegate<W> {
    pub fn new(out: W) -> Self {
        Self { screen: Mutex::new(Screen { out, rendered: Vec::new() }) }
    }

    fn screen(&self) -> MutexGuard<'_, Screen<W>> {
        self.screen.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[cfg(test)]
    fn into_inner(self) -> W {
        self.screen.into_inner().unwrap_or_else(PoisonError::into_inner).out
    }
}

impl<W: Write + Send> SessionDelegate for TerminalDelegate<W> {
    fn reload_messages(&self, messages: &[Message]) {
        let mut screen = self.screen();
        let extends = !screen.rendered.is_empty() && messages.starts_with(&screen.rendered);

        let tail = if extends {
            &messages[screen.rendered.len()..]
        } else {
            screen.line(format_args!("--- {} messages ---", messages.len()));
            messages
        };
        for message in tail {
            screen.message(message);
        }
        screen.rendered = messages.to_vec();
    }

    fn received_new_message(&self, message: &Message) {
        let mut screen = self.screen();
        if screen.rendered.last() != Some(message) {
            screen.message(message);
            screen.rendered.push(message.clone());
        }
    }

    fn display_status_message(&self, status: &str) {
        self.screen().line(format_args!("* {status}"));
    }

    fn display_error_message(&self, error: &str) {
        self.screen().line(format_args!("! {error}"));
    }
}
