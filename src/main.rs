use clap::{Parser, Subcommand};
use home_backup::backup::backup_config::BackupConfig;
use home_backup::backup::command::SystemCommandRunner;
use home_backup::backup::job_slot::{JobSlot, StatusEvent};
use home_backup::backup::result_error::error::Error;
use home_backup::backup::result_error::result::Result;
use home_backup::backup::result_error::AddMsg;
use home_backup::backup::schedule::elevated::ElevatedFileEditor;
use home_backup::backup::schedule::register_schedule;
use home_backup::backup::secret::{askpass, TerminalSecretPrompt, ASKPASS_PROGRAM, DEFAULT_PROMPT};
use home_backup::backup::sink::{FileSink, LogSink, TracingSink};
use std::path::{Path, PathBuf};
use std::process::exit;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Back up a home directory to an rclone remote
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one backup in the foreground
    Run {
        /// Location of config file
        #[arg(short, long)]
        config: PathBuf,
        /// Print the final result as JSON on stdout
        #[arg(long)]
        json: bool,
    },
    /// Register the anacron entry from the config's `schedule` section
    Schedule {
        /// Location of config file
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Validate the config and print the job it produces for today
    Check {
        /// Location of config file
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Prompt for a password and print it on stdout, like the `home-backup-askpass` helper
    Askpass { prompt: Option<String> },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
    let args = Args::parse();

    let res = match args.command {
        Command::Run { config, json } => run(&config, json),
        Command::Schedule { config } => schedule(&config).map(|_| true),
        Command::Check { config } => check(&config).map(|_| true),
        Command::Askpass { prompt } => askpass(
            &TerminalSecretPrompt,
            prompt.as_deref().unwrap_or(DEFAULT_PROMPT),
            &mut std::io::stdout().lock(),
        )
        .map(|_| true),
    };

    match res {
        Ok(true) => exit(0),
        Ok(false) => exit(1),
        Err(e) => {
            error!("{e}");
            exit(1)
        }
    }
}

fn run(config_path: &Path, json: bool) -> Result<bool> {
    let config = BackupConfig::from_file(config_path)?;
    let job = config.job(chrono::Local::now().date_naive());
    let pipeline = config.pipeline(Arc::new(SystemCommandRunner));
    let file_sink: Arc<dyn LogSink> = Arc::new(FileSink::open(job.log_path())?);
    info!("Logging this run to {:?}", job.log_path());

    let slot = JobSlot::default();
    let handle = slot.try_submit(job, pipeline, file_sink)?;
    for event in handle.events().iter() {
        match event {
            StatusEvent::Stage(stage) => tracing::debug!("Entered stage {stage}"),
            StatusEvent::Line(line) => TracingSink.write(line),
            StatusEvent::Finished(result) => tracing::debug!("Worker reported {:?}", result),
        }
    }
    let result = handle.wait()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    }
    Ok(result.success())
}

fn schedule(config_path: &Path) -> Result<()> {
    let config = BackupConfig::from_file(config_path)?;
    let schedule = config.schedule().as_ref().ok_or_else(|| {
        Error::config(format!("No schedule section in {:?}", config_path))
    })?;

    let exe = std::env::current_exe()
        .map_err(Error::from)
        .add_msg("Cannot locate the running executable")?;
    let config_abs = config_path
        .canonicalize()
        .map_err(Error::from)
        .add_msg(format!("Cannot resolve {:?}", config_path))?;
    let fallback_command = format!("{} run --config {}", exe.display(), config_abs.display());

    let editor = ElevatedFileEditor::builder()
        .runner(Arc::new(SystemCommandRunner))
        .elevation(schedule.elevation().clone())
        .default_askpass(exe.with_file_name(ASKPASS_PROGRAM))
        .build();
    let registration = register_schedule(&editor, schedule, &fallback_command)?;
    info!(
        "Schedule {} in {:?}",
        registration,
        schedule.anacrontab()
    );
    Ok(())
}

fn check(config_path: &Path) -> Result<()> {
    let config = BackupConfig::from_file(config_path)?;
    let job = config.job(chrono::Local::now().date_naive());
    print!("{}", serde_yml::to_string(&job)?);
    info!("Config {:?} is valid", config_path);
    Ok(())
}
