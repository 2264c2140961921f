//! `orchestrator init`: write a starter configuration.
//!
//! The template carries a `[shutdown]` block with the default timings
//! (`timeout = "30s"`, `wait_time = "10s"`, `callback_timeout = "3s"`) and two
//! `[[services]]` listeners, a public one on `0.0.0.0:8080` and an admin one
//! on loopback.

use std::fs;
use std::path::Path;

use orchestrator::Error;
use orchestrator::config::generate_default_config;

/// Writes the starter configuration to `output`.
///
/// An existing file is kept unless `force` is set.
///
/// # Errors
///
/// [`Error::Config`] when `output` exists and `force` is unset, or when the
/// write fails.
#[allow(clippy::print_stderr)]
pub fn run(output: &Path, force: bool) -> Result<(), Error> {
    if !force && output.exists() {
        return Err(Error::config(format!(
            "'{}' already exists, pass --force to replace it",
            output.display()
        )));
    }

    fs::write(output, generate_default_config())
        .map_err(|e| Error::config_with(format!("cannot write '{}'", output.display()), e))?;

    eprintln!("Starter config written to {}", output.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    fn scratch(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("orchestrator-init-{}-{name}.toml", std::process::id()))
    }

    #[test]
    fn refuses_to_overwrite_without_force() {
        let path = scratch("existing");
        fs::write(&path, "# keep me").unwrap();

        let err = run(&path, false).unwrap_err();
        assert!(err.to_string().contains("already exists"));
        assert_eq!(fs::read_to_string(&path).unwrap(), "# keep me");

        run(&path, true).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), generate_default_config());
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn written_template_loads_with_default_timings() {
        let path = scratch("fresh");
        let _ = fs::remove_file(&path);

        run(&path, false).unwrap();
        let config = orchestrator::config::load_config(&path).unwrap();
        assert_eq!(config.shutdown, orchestrator::ShutdownConfig::default());
        assert_eq!(config.services.len(), 2);
        fs::remove_file(&path).unwrap();
    }
}
