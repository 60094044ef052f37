//! Askpass helper for `sudo -A`.
//!
//! sudo runs the program named by `SUDO_ASKPASS` with a prompt argument and reads the password
//! from its stdout. Nothing is printed when the user enters an empty line, which makes sudo give up.

use crate::backup::function_path;
use crate::backup::redacted::RedactedString;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::{AddFunctionName, AddMsg};
use function_name::named;
use std::io::{BufRead, Write};
use zeroize::Zeroize;

pub static DEFAULT_PROMPT: &str = "Password: ";

/// File name of the askpass executable installed next to the main one.
pub static ASKPASS_PROGRAM: &str = "home-backup-askpass";

pub trait SecretPrompt {
    fn prompt(&self, message: &str) -> Result<RedactedString>;
}

/// Prompts on stderr and reads one line from stdin.
#[derive(Clone, Copy, Debug, Default)]
pub struct TerminalSecretPrompt;

impl SecretPrompt for TerminalSecretPrompt {
    #[named]
    fn prompt(&self, message: &str) -> Result<RedactedString> {
        let mut stderr = std::io::stderr().lock();
        write!(stderr, "{message}")
            .and_then(|_| stderr.flush())
            .map_err(Error::from)
            .add_fn_name(function_path!())?;

        let mut buffer = String::new();
        let read = std::io::stdin()
            .lock()
            .read_line(&mut buffer)
            .map_err(Error::from)
            .add_msg("Failed to read secret from stdin")
            .add_fn_name(function_path!());
        let secret = read.map(|_| RedactedString::from(buffer.trim_end_matches(['\r', '\n'])));
        buffer.zeroize();
        secret
    }
}

/// Writes the secret and a newline to `out`, or nothing if it is empty.
#[named]
pub fn askpass(prompt: &dyn SecretPrompt, message: &str, out: &mut dyn Write) -> Result<()> {
    let secret = prompt.prompt(message)?;
    if secret.is_empty() {
        tracing::warn!("No password entered");
        return Ok(());
    }
    writeln!(out, "{}", secret.inner())
        .and_then(|_| out.flush())
        .map_err(Error::from)
        .add_fn_name(function_path!())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct FixedPrompt {
        answer: &'static str,
        asked: Mutex<Vec<String>>,
    }

    impl FixedPrompt {
        fn new(answer: &'static str) -> Self {
            Self {
                answer,
                asked: Mutex::new(vec![]),
            }
        }
    }

    impl SecretPrompt for FixedPrompt {
        fn prompt(&self, message: &str) -> Result<RedactedString> {
            self.asked.lock().unwrap().push(message.to_string());
            Ok(self.answer.into())
        }
    }

    #[test]
    fn test_askpass_prints_secret_line() {
        let prompt = FixedPrompt::new("hunter2");
        let mut out = Vec::new();

        askpass(&prompt, "[sudo] password for me: ", &mut out).unwrap();

        assert_eq!(out, b"hunter2\n");
        assert_eq!(
            prompt.asked.lock().unwrap().as_slice(),
            ["[sudo] password for me: "]
        );
    }

    #[test]
    fn test_askpass_empty_secret_prints_nothing() {
        let mut out = Vec::new();

        askpass(&FixedPrompt::new(""), DEFAULT_PROMPT, &mut out).unwrap();

        assert!(out.is_empty());
    }

    #[test]
    fn test_askpass_propagates_prompt_error() {
        struct BrokenPrompt;

        impl SecretPrompt for BrokenPrompt {
            fn prompt(&self, _: &str) -> Result<RedactedString> {
                Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into())
            }
        }

        let mut out = Vec::new();
        let err = askpass(&BrokenPrompt, DEFAULT_PROMPT, &mut out).unwrap_err();

        assert!(matches!(err, Error::Io(_)));
        assert!(out.is_empty());
    }
}
