//! External command lines

use std::fmt;

/// Program plus arguments, split on whitespace. No shell is involved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    program: String,
    args: Vec<String>,
}

impl CommandLine {
    /// Build from a program and its arguments
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Split a command string on whitespace. Returns `None` for a blank string.
    pub fn parse(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace();
        let program = parts.next()?;
        Some(Self::new(program, parts))
    }

    /// Executable name or path
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Arguments after the program
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Prefix this command with `sudo` unless `privileged` is set
    pub fn elevated(self, privileged: bool) -> Self {
        if privileged {
            return self;
        }
        let mut args = Vec::with_capacity(self.args.len() + 1);
        args.push(self.program);
        args.extend(self.args);
        Self {
            program: "sudo".to_string(),
            args,
        }
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Whether the current process runs with effective uid 0
#[cfg(unix)]
pub fn is_privileged() -> bool {
    unsafe { libc::geteuid() == 0 }
}

/// Whether the current process runs with effective uid 0
#[cfg(not(unix))]
pub fn is_privileged() -> bool {
    false
}
