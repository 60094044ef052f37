use crate::backup::command::{CommandRunner, CommandSpec, OutputLine, StreamKind};
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use bon::Builder;
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// File access that needs elevated rights.
pub trait PrivilegedFileEditor {
    fn read(&self, path: &Path) -> Result<String>;

    /// Appends `line` followed by a newline.
    fn append(&self, path: &Path, line: &str) -> Result<()>;
}

/// How commands get elevated.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
#[serde(rename_all = "snake_case")]
#[serde(deny_unknown_fields)]
pub enum Elevation {
    /// polkit, which brings its own authentication agent.
    #[default]
    Pkexec,
    /// `sudo -A`; the password comes from the `askpass` helper, or the editor's default one.
    Sudo { askpass: Option<PathBuf> },
}

/// Edits files by running `cat` and `tee -a` through the configured elevation helper.
#[derive(Clone, Builder)]
pub struct ElevatedFileEditor {
    runner: Arc<dyn CommandRunner>,
    #[builder(default)]
    elevation: Elevation,
    /// `SUDO_ASKPASS` when the `sudo` elevation names no helper.
    #[builder(into)]
    default_askpass: Option<PathBuf>,
}

impl ElevatedFileEditor {
    pub fn command(&self, program: &str, args: Vec<OsString>, stdin: Option<String>) -> CommandSpec {
        let (helper, mut helper_args, envs): (&str, Vec<OsString>, Vec<(OsString, OsString)>) =
            match &self.elevation {
                Elevation::Pkexec => ("pkexec", vec![], vec![]),
                Elevation::Sudo { askpass } => (
                    "sudo",
                    vec!["-A".into()],
                    askpass
                        .as_ref()
                        .or(self.default_askpass.as_ref())
                        .map(|path| ("SUDO_ASKPASS".into(), path.into()))
                        .into_iter()
                        .collect(),
                ),
            };
        helper_args.push(program.into());
        helper_args.extend(args);

        CommandSpec::builder()
            .program(helper)
            .args(helper_args)
            .envs(envs)
            .maybe_stdin(stdin)
            .build()
    }

    /// Stdout lines and whether the last one was missing its newline.
    fn run(&self, spec: &CommandSpec) -> Result<(Vec<String>, bool)> {
        let mut stdout = Vec::new();
        let output = self.runner.run(spec, &mut |OutputLine { kind, line }| {
            if kind == StreamKind::Stdout {
                stdout.push(line)
            }
        })?;
        if !output.success() {
            return Err(Error::privileged(
                spec.display(),
                output.exit_code,
                output.stderr_text(),
            ));
        }
        Ok((stdout, output.stdout_unterminated))
    }
}

impl PrivilegedFileEditor for ElevatedFileEditor {
    fn read(&self, path: &Path) -> Result<String> {
        let spec = self.command("cat", vec![path.into()], None);
        let (lines, unterminated) = self.run(&spec)?;
        let mut content = lines.join("\n");
        if !lines.is_empty() && !unterminated {
            content.push('\n');
        }
        Ok(content)
    }

    fn append(&self, path: &Path, line: &str) -> Result<()> {
        let spec = self.command("tee", vec!["-a".into(), path.into()], Some(format!("{line}\n")));
        self.run(&spec).map(|_| ())
    }
}
