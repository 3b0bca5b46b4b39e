//! Common utility functions for the simulation driver.
//!
//! This module contains:
//! - Logger initialization
//! - Output path preparation
//! - Interactive pacing between cycles

use std::error::Error;
use std::io;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};

/// Parse a log level name, falling back to `info` for anything unrecognised.
pub fn parse_log_level(log_level: &str) -> log::LevelFilter {
    log_level.parse::<log::LevelFilter>().unwrap_or_else(|_| {
        eprintln!("Invalid log level '{}', defaulting to 'info'", log_level);
        log::LevelFilter::Info
    })
}

/// Initialize the logger with the specified configuration.
///
/// # Arguments
/// * `log_level` - Log level string (off, error, warn, info, debug, trace)
/// * `log_file` - Optional path to log file (logs to stderr if None)
///
/// # Errors
/// Returns an error if the log file cannot be opened or logger initialization fails.
pub fn init_logger(log_level: &str, log_file: Option<&PathBuf>) -> Result<(), Box<dyn Error>> {
    use std::io::Write;

    let mut builder = env_logger::Builder::new();
    builder.filter_level(parse_log_level(log_level));
    builder.format(|buf, record| {
        writeln!(
            buf,
            "{} [{}] {} - {}",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
            record.level(),
            record.target(),
            record.args()
        )
    });

    if let Some(log_path) = log_file {
        prepare_output_file(log_path)?;
        let target = Box::new(
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(log_path)?,
        );
        builder.target(env_logger::Target::Pipe(target));
    }

    builder.try_init()?;
    Ok(())
}

/// Create the parent directories of an output file if needed.
///
/// # Errors
/// Returns an error if the path names an existing directory or directory creation fails.
pub fn prepare_output_file(output: &Path) -> Result<(), Box<dyn Error>> {
    if output.is_dir() {
        return Err(format!("Output path '{}' is a directory.", output.display()).into());
    }
    if let Some(parent) = output.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    Ok(())
}

/// Output file for one run of a batch: `{stem}_seed{seed}.{ext}` next to `output`.
pub fn output_for_seed(output: &Path, seed: u64) -> PathBuf {
    let stem = output
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("results");
    let ext = output
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or("csv");
    output.with_file_name(format!("{stem}_seed{seed}.{ext}"))
}

/// Interpret a line typed between cycles: `q` stops, anything else continues.
pub fn interpret_pacing_input(input: &str) -> ControlFlow<()> {
    if input.trim().eq_ignore_ascii_case("q") {
        ControlFlow::Break(())
    } else {
        ControlFlow::Continue(())
    }
}

/// Block until the user presses Enter. Typing `q` (or closing stdin) stops the run.
pub fn wait_for_user() -> ControlFlow<()> {
    println!("Press Enter for the next cycle, or 'q' to stop:");
    let mut input = String::new();
    match io::stdin().read_line(&mut input) {
        Ok(0) | Err(_) => ControlFlow::Break(()),
        Ok(_) => interpret_pacing_input(&input),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use tempfile::tempdir;

    #[test]
    fn test_parse_log_level() {
        assert_eq!(parse_log_level("debug"), log::LevelFilter::Debug);
        assert_eq!(parse_log_level("OFF"), log::LevelFilter::Off);
        assert_eq!(parse_log_level("loud"), log::LevelFilter::Info);
    }

    #[test]
    fn test_prepare_output_file_creates_parents() {
        let dir = tempdir().unwrap();
        let output = dir.path().join("nested").join("deeper").join("run.csv");
        prepare_output_file(&output).unwrap();
        assert!(output.parent().unwrap().is_dir());
        assert!(!output.exists());
    }

    #[test]
    fn test_prepare_output_file_existing_file() {
        let dir = tempdir().unwrap();
        let output = dir.path().join("run.csv");
        File::create(&output).unwrap();
        assert!(prepare_output_file(&output).is_ok());
    }

    #[test]
    fn test_prepare_output_file_rejects_directory() {
        let dir = tempdir().unwrap();
        assert!(prepare_output_file(dir.path()).is_err());
    }

    #[test]
    fn test_output_for_seed() {
        assert_eq!(
            output_for_seed(Path::new("out/results.csv"), 7),
            PathBuf::from("out/results_seed7.csv")
        );
        assert_eq!(
            output_for_seed(Path::new("run"), 3),
            PathBuf::from("run_seed3.csv")
        );
    }

    #[test]
    fn test_interpret_pacing_input() {
        assert!(interpret_pacing_input("q\n").is_break());
        assert!(interpret_pacing_input(" Q ").is_break());
        assert!(interpret_pacing_input("\n").is_continue());
        assert!(interpret_pacing_input("next").is_continue());
    }
}
