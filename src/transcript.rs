//! Transcript rendering and archiving for closed tickets.

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::models::message::HistoryMessage;
use crate::models::ticket::Ticket;
use crate::persistence::file_key;
use crate::{AppError, Result};

/// Rendered transcript in both archive formats.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transcript {
    /// Plain-text rendering.
    pub text: String,
    /// Self-contained HTML page.
    pub html: String,
}

/// Renders a channel history into a [`Transcript`].
///
/// Receives read-only snapshots; implementations must not call back into
/// the ticket engine.
pub trait TranscriptGenerator: Send + Sync {
    /// Render the transcript of `ticket`'s channel.
    ///
    /// # Errors
    ///
    /// Returns an error if rendering fails.
    fn generate(
        &self,
        ticket: &Ticket,
        channel_name: &str,
        history: &[HistoryMessage],
    ) -> Result<Transcript>;
}

/// Default renderer producing a text log and a dark-themed HTML page.
#[derive(Debug, Default, Clone, Copy)]
pub struct HtmlTranscriptGenerator;

const STYLE: &str = "body{font-family:Arial,sans-serif;background:#111;color:#eee;padding:20px}\
.m{margin:4px 0}\
.t{color:#888;font-size:11px;margin-right:6px}\
.a{color:#4ea1ff;font-weight:bold;margin-right:4px}\
.att{color:#ffa500;font-size:11px;display:block;margin-left:2rem}";

impl TranscriptGenerator for HtmlTranscriptGenerator {
    fn generate(
        &self,
        ticket: &Ticket,
        channel_name: &str,
        history: &[HistoryMessage],
    ) -> Result<Transcript> {
        let created = ticket.created_at.to_rfc3339();

        let mut text = format!(
            "# Transcript Ticket {}\nChannel: {channel_name}\nCreated: {created}\n",
            ticket.id
        );
        for message in history {
            let content = message.content.replace('\n', "\\n");
            write!(
                text,
                "\n[{}] {}: {content}",
                message.created_at.to_rfc3339(),
                message.author_name
            )
            .map_err(render_error)?;
            for (filename, url) in &message.attachments {
                write!(text, "\n  [Attachment] {filename} -> {url}").map_err(render_error)?;
            }
        }

        let mut body = String::new();
        for message in history {
            write!(
                body,
                "<div class='m'><span class='t'>{}</span><span class='a'>{}</span><span>{}</span>",
                message.created_at.to_rfc3339(),
                escape(&message.author_name),
                escape(&message.content)
            )
            .map_err(render_error)?;
            for (filename, url) in &message.attachments {
                let written = if is_web_url(url) {
                    write!(
                        body,
                        "<span class='att'>\u{1f4ce} <a href='{}'>{}</a></span>",
                        escape(url),
                        escape(filename)
                    )
                } else {
                    write!(
                        body,
                        "<span class='att'>\u{1f4ce} {}</span>",
                        escape(filename)
                    )
                };
                written.map_err(render_error)?;
            }
            body.push_str("</div>\n");
        }

        let html = format!(
            "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n\
             <title>Transcript {id}</title>\n<style>{STYLE}</style>\n</head>\n<body>\n\
             <h1>Transcript Ticket {id}</h1>\n\
             <p>Channel: {channel}<br>Created: {created}<br>Messages: {count}</p>\n<hr>\n\
             {body}</body>\n</html>\n",
            id = ticket.id,
            channel = escape(channel_name),
            count = history.len(),
        );

        Ok(Transcript { text, html })
    }
}

/// Escape text for element content and quoted attribute values.
fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Only plain web links become anchors.
fn is_web_url(url: &str) -> bool {
    let lower = url.trim_start().to_ascii_lowercase();
    lower.starts_with("https://") || lower.starts_with("http://")
}

fn render_error(err: std::fmt::Error) -> AppError {
    AppError::Persistence(format!("failed to render transcript: {err}"))
}

/// Paths of an archived transcript.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchivedTranscript {
    /// Text file.
    pub text_path: PathBuf,
    /// HTML file.
    pub html_path: PathBuf,
}

/// Writes transcripts to `<root>/<key>/transcript_<id>.{txt,html}`, where
/// `<key>` is the community's [`file_key`].
#[derive(Debug, Clone)]
pub struct TranscriptArchive {
    root: PathBuf,
}

impl TranscriptArchive {
    /// Archive rooted at `root`; directories are created on first write.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Write both renderings of a ticket's transcript.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Persistence` if a directory or file cannot be written.
    pub fn store(
        &self,
        community_id: &str,
        ticket_id: u64,
        transcript: &Transcript,
    ) -> Result<ArchivedTranscript> {
        let dir = self.root.join(file_key(community_id));
        fs::create_dir_all(&dir).map_err(|err| {
            AppError::Persistence(format!(
                "failed to create transcript dir {}: {err}",
                dir.display()
            ))
        })?;

        let text_path = dir.join(format!("transcript_{ticket_id}.txt"));
        let html_path = dir.join(format!("transcript_{ticket_id}.html"));
        fs::write(&text_path, &transcript.text)?;
        fs::write(&html_path, &transcript.html)?;

        debug!(community = community_id, ticket_id, "transcript archived");
        Ok(ArchivedTranscript {
            text_path,
            html_path,
        })
    }
}
