// Copyright 2025 Cornell University
// released under MIT License

use std::io::Write;

use codespan_reporting::diagnostic::{
    Diagnostic as CodespanDiagnostic, Label as CodespanLabel, LabelStyle, Severity,
};
use codespan_reporting::files::{Error as FilesError, SimpleFiles};
use codespan_reporting::term;
use codespan_reporting::term::termcolor::{Buffer, Color, ColorSpec, WriteColor};

use crate::errors::{DecodeError, ParseError};

/// Severity of diagnostic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Error,
    Warning,
}

/// A label representing a part of a process expression
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Label {
    pub message: Option<String>,
    pub range: (usize, usize),
}

impl Label {
    fn to_codespan_label(&self, fileid: usize) -> CodespanLabel<usize> {
        CodespanLabel::new(LabelStyle::Primary, fileid, self.range.0..self.range.1)
            .with_message(self.message.clone().unwrap_or_default())
    }
}

/// Diagnostic of a particular part of an expression, or of a whole description
pub struct Diagnostic {
    message: String,
    level: Level,
    location: Option<(usize, Label)>,
}

impl Diagnostic {
    pub fn emit(
        &self,
        buffer: &mut Buffer,
        files: &SimpleFiles<String, String>,
    ) -> Result<(), FilesError> {
        if let Some((fileid, label)) = &self.location {
            let severity = match self.level {
                Level::Error => Severity::Error,
                Level::Warning => Severity::Warning,
            };
            let diagnostic = CodespanDiagnostic::new(severity)
                .with_message(&self.message)
                .with_labels(vec![label.to_codespan_label(*fileid)]);
            term::emit(buffer, &term::Config::default(), files, &diagnostic)
        } else {
            let color = match self.level {
                Level::Error => Color::Red,
                Level::Warning => Color::Yellow,
            };
            buffer.set_color(ColorSpec::new().set_bold(true).set_fg(Some(color)))?;
            write!(buffer, "{:?}", self.level)?;
            buffer.set_color(&ColorSpec::new())?;
            writeln!(buffer, ": {}", self.message)?;
            Ok(())
        }
    }
}

fn label_message(error: &ParseError) -> String {
    match error {
        ParseError::Syntax { .. } => "invalid process expression".to_string(),
        ParseError::UndeclaredAction { .. } => "undeclared action".to_string(),
        ParseError::KindMismatch { used, .. } => format!("used as a {used}"),
    }
}

/// Renders decoding problems, pointing into process expressions when possible
pub struct DiagnosticHandler {
    files: SimpleFiles<String, String>,
}

impl Default for DiagnosticHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl DiagnosticHandler {
    pub fn new() -> Self {
        Self {
            files: SimpleFiles::new(),
        }
    }

    pub fn add_file(&mut self, name: String, content: String) -> usize {
        self.files.add(name, content)
    }

    /// Renders `error` found in `expression`, which is registered under `name`
    pub fn render_parse_error(
        &mut self,
        name: &str,
        expression: &str,
        error: &ParseError,
        level: Level,
    ) -> Result<String, FilesError> {
        let fileid = self.add_file(name.to_string(), expression.to_string());
        let diagnostic = Diagnostic {
            message: error.to_string(),
            level,
            location: Some((
                fileid,
                Label {
                    message: Some(label_message(error)),
                    range: error.span(),
                },
            )),
        };
        self.render(&diagnostic)
    }

    pub fn render_decode_error(&mut self, error: &DecodeError) -> Result<String, FilesError> {
        match error {
            DecodeError::Expression {
                process,
                expression,
                source,
            } => self.render_parse_error(process, expression, source, Level::Error),
            other => self.render(&Diagnostic {
                message: other.to_string(),
                level: Level::Error,
                location: None,
            }),
        }
    }

    fn render(&self, diagnostic: &Diagnostic) -> Result<String, FilesError> {
        let mut buffer = Buffer::ansi();
        diagnostic.emit(&mut buffer, &self.files)?;
        Ok(String::from_utf8_lossy(buffer.as_slice()).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::description::ProcessDescription;

    fn plain(rendered: &str) -> String {
        String::from_utf8(strip_ansi_escapes::strip(rendered.as_bytes())).unwrap()
    }

    #[test]
    fn undeclared_action_points_at_reference() {
        let mut handler = DiagnosticHandler::new();
        let error = ParseError::UndeclaredAction {
            process: "c/p".to_string(),
            name: "b".to_string(),
            start: 4,
            end: 7,
        };
        let rendered = handler
            .render_parse_error("c/p", "<a>.[b]", &error, Level::Error)
            .unwrap();
        let text = plain(&rendered);
        assert!(text.starts_with("error: action `b` is not declared in process `c/p`"));
        assert!(text.contains("c/p:1:5"));
        assert!(text.contains("<a>.[b]"));
        assert!(text.contains("^^^ undeclared action"));
    }

    #[test]
    fn syntax_error_from_description() {
        let description = ProcessDescription {
            process: "<a>.|<b>".to_string(),
            ..Default::default()
        };
        let error = description.decode("c/p").unwrap_err();
        let text = plain(&DiagnosticHandler::new().render_decode_error(&error).unwrap());
        assert!(text.starts_with("error: Lexing failed"));
        assert!(text.contains("<a>.|<b>"));
        assert!(text.contains("invalid process expression"));
    }

    #[test]
    fn errors_without_location() {
        let error = DecodeError::MissingBody {
            process: "c/p".to_string(),
            action: "loop".to_string(),
        };
        let text = plain(&DiagnosticHandler::new().render_decode_error(&error).unwrap());
        insta::assert_snapshot!(text, @"Error: subprocess `loop` of process `c/p` has no `process` expression");
    }
}
