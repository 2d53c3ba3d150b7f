//! Reads and writes the `~/.f1rc` credential file, and prompts
//! interactively for whatever the file doesn't have.
//!
//! The file is a flat `key value` list (`#` starts a comment), written
//! atomically: a `.f1rc.tmp` sibling is created, written, and renamed
//! over the target so a crash mid-write never leaves a half-written
//! file in place.

use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use live_timing_errors::ConfigError;

/// Credentials and connection overrides persisted across runs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Config {
    pub email: Option<String>,
    pub password: Option<String>,
    pub host: Option<String>,
    pub auth_host: Option<String>,
}

/// Default location, `$HOME/.f1rc`.
pub fn default_path() -> Result<PathBuf, ConfigError> {
    dirs::home_dir().map(|home| home.join(".f1rc")).ok_or(ConfigError::NoHome)
}

/// Read `path`. A missing file is not an error; it just means nothing
/// has been configured yet.
pub fn read_config(path: &Path) -> Result<Config, ConfigError> {
    let contents = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Config::default()),
        Err(source) => {
            return Err(ConfigError::Read {
                path: path.display().to_string(),
                source,
            })
        }
    };

    let mut config = Config::default();
    for line in contents.lines() {
        let line = line.trim_end();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once(char::is_whitespace) else {
            continue;
        };
        let value = value.trim();
        match key {
            "email" => config.email = Some(value.to_string()),
            "password" => config.password = Some(value.to_string()),
            "host" => config.host = Some(value.to_string()),
            "auth-host" => config.auth_host = Some(value.to_string()),
            _ => {}
        }
    }
    Ok(config)
}

/// Write `config` to `path` atomically via a `.tmp` sibling. Only the
/// credential fields are persisted, matching the original's choice not
/// to round-trip a `host`/`auth-host` override back to disk.
pub fn write_config(path: &Path, config: &Config) -> Result<(), ConfigError> {
    let tmp_path = tmp_sibling(path);

    let mut file = fs::File::create(&tmp_path).map_err(|source| ConfigError::Write {
        path: tmp_path.display().to_string(),
        source,
    })?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = file.set_permissions(fs::Permissions::from_mode(0o600));
    }

    let write_err = |source| ConfigError::Write {
        path: tmp_path.display().to_string(),
        source,
    };
    if let Some(email) = &config.email {
        writeln!(file, "email {email}").map_err(write_err)?;
    }
    if let Some(password) = &config.password {
        writeln!(file, "password {password}").map_err(write_err)?;
    }
    file.flush().map_err(write_err)?;
    drop(file);

    fs::rename(&tmp_path, path).map_err(|source| ConfigError::Write {
        path: path.display().to_string(),
        source,
    })
}

fn tmp_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{name}.tmp"))
}

/// Asks the user for a credential that wasn't found in the config file.
pub trait CredentialPrompt {
    fn prompt_email(&self) -> Result<String, ConfigError>;
    fn prompt_password(&self) -> Result<String, ConfigError>;
}

/// Interactive terminal prompt backed by `dialoguer`: visible input for
/// the e-mail address, masked input for the password.
pub struct DialoguerPrompt;

impl CredentialPrompt for DialoguerPrompt {
    fn prompt_email(&self) -> Result<String, ConfigError> {
        dialoguer::Input::new()
            .with_prompt("Enter your registered e-mail address")
            .interact_text()
            .map_err(|e| ConfigError::Prompt(e.to_string()))
    }

    fn prompt_password(&self) -> Result<String, ConfigError> {
        dialoguer::Password::new()
            .with_prompt("Enter your registered password")
            .interact()
            .map_err(|e| ConfigError::Prompt(e.to_string()))
    }
}

/// Fill in whatever `config` is missing by prompting, then return the
/// completed config so the caller can persist it with [`write_config`].
pub fn fill_missing_credentials(
    mut config: Config,
    prompt: &dyn CredentialPrompt,
) -> Result<Config, ConfigError> {
    if config.email.is_none() {
        config.email = Some(prompt.prompt_email()?);
    }
    if config.password.is_none() {
        config.password = Some(prompt.prompt_password()?);
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedPrompt {
        email: &'static str,
        password: &'static str,
    }

    impl CredentialPrompt for FixedPrompt {
        fn prompt_email(&self) -> Result<String, ConfigError> {
            Ok(self.email.to_string())
        }

        fn prompt_password(&self) -> Result<String, ConfigError> {
            Ok(self.password.to_string())
        }
    }

    #[test]
    fn missing_file_reads_as_empty_config() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(".f1rc");
        let config = read_config(&path).expect("missing file is not an error");
        assert_eq!(config, Config::default());
    }

    #[test]
    fn write_then_read_round_trips_credentials() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(".f1rc");
        let config = Config {
            email: Some("driver@example.com".to_string()),
            password: Some("hunter2".to_string()),
            host: None,
            auth_host: None,
        };
        write_config(&path, &config).expect("write");
        let read_back = read_config(&path).expect("read");
        assert_eq!(read_back.email, config.email);
        assert_eq!(read_back.password, config.password);
    }

    #[test]
    fn unknown_and_comment_lines_are_ignored() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(".f1rc");
        fs::write(&path, "# comment\nhost example.com\nbogus wat\n").expect("write fixture");
        let config = read_config(&path).expect("read");
        assert_eq!(config.host.as_deref(), Some("example.com"));
    }

    #[test]
    fn fill_missing_credentials_only_prompts_for_absent_fields() {
        let config = Config {
            email: Some("driver@example.com".to_string()),
            password: None,
            host: None,
            auth_host: None,
        };
        let prompt = FixedPrompt {
            email: "unused@example.com",
            password: "hunter2",
        };
        let filled = fill_missing_credentials(config, &prompt).expect("fill");
        assert_eq!(filled.email.as_deref(), Some("driver@example.com"));
        assert_eq!(filled.password.as_deref(), Some("hunter2"));
    }
}
