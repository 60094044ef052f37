use clap::Parser;
use home_backup::backup::secret::{askpass, TerminalSecretPrompt, DEFAULT_PROMPT};
use std::process::exit;
use tracing::error;
use tracing_subscriber::EnvFilter;

/// Askpass helper for `sudo -A`: prompts for a password and prints it on stdout
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Prompt text, passed by sudo as the only argument
    prompt: Option<String>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();
    let args = Args::parse();

    let res = askpass(
        &TerminalSecretPrompt,
        args.prompt.as_deref().unwrap_or(DEFAULT_PROMPT),
        &mut std::io::stdout().lock(),
    );
    if let Err(e) = res {
        error!("{e}");
        exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_as_only_argument() {
        let args = Args::try_parse_from(["home-backup-askpass", "[sudo] password for me: "]).unwrap();

        assert_eq!(args.prompt.as_deref(), Some("[sudo] password for me: "));
    }

    #[test]
    fn test_no_prompt_argument() {
        let args = Args::try_parse_from(["home-backup-askpass"]).unwrap();

        assert!(args.prompt.is_none());
    }
}
