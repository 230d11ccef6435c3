//! Output writing utilities
//!
//! Results go to stdout; status messages go to stderr so piping the output
//! of `courier get` yields clean JSON.

use crate::error::Result;
use colored::Colorize;
use serde::Serialize;
use std::io::{self, Write};

/// Writes command results and status messages
pub struct OutputWriter {
    use_color: bool,
    quiet: bool,
    writer: Box<dyn Write>,
}

impl OutputWriter {
    /// Create a writer targeting stdout
    pub fn new(use_color: bool, quiet: bool) -> Self {
        Self {
            use_color,
            quiet,
            writer: Box::new(io::stdout()),
        }
    }

    /// Create a writer targeting an arbitrary sink
    #[cfg(test)]
    pub fn with_writer(writer: Box<dyn Write>, quiet: bool) -> Self {
        Self {
            use_color: false,
            quiet,
            writer,
        }
    }

    /// Write a line of output
    pub fn writeln(&mut self, content: &str) -> Result<()> {
        writeln!(self.writer, "{}", content)?;
        self.writer.flush()?;
        Ok(())
    }

    /// Write a value as JSON
    pub fn json<T: Serialize>(&mut self, value: &T, pretty: bool) -> Result<()> {
        let content = if pretty {
            serde_json::to_string_pretty(value)?
        } else {
            serde_json::to_string(value)?
        };
        self.writeln(&content)
    }

    /// Write a success message
    pub fn success(&mut self, message: &str) -> Result<()> {
        if self.quiet {
            return Ok(());
        }

        if self.use_color {
            eprintln!("{}", message.green());
        } else {
            eprintln!("{}", message);
        }
        Ok(())
    }

    /// Write an info message
    pub fn info(&mut self, message: &str) -> Result<()> {
        tracing::debug!("Output info: {}", message);
        if self.quiet {
            return Ok(());
        }

        if self.use_color {
            eprintln!("{} {}", "ℹ".blue(), message);
        } else {
            eprintln!("INFO: {}", message);
        }
        Ok(())
    }

    /// Write a warning message
    pub fn warning(&mut self, message: &str) -> Result<()> {
        if self.use_color {
            eprintln!("{}", message.yellow());
        } else {
            eprintln!("WARNING: {}", message);
        }
        Ok(())
    }
}
