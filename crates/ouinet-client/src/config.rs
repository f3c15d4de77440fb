//! CLI flags merged over an optional `ouinet-client.conf` file.
//!
//! `spec.md` §6 treats the configuration parser as an external collaborator
//! with a named interface: `--repo=PATH` (required), `--listen-on-tcp`,
//! `--injector-ep`, `--injector-ipns`, `--max-cached-age` (default 604800),
//! `--open-file-limit`. Flags passed on argv override the same key read
//! from the file; anything named on neither falls back to `Default`.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use clap::Parser;
use serde::Deserialize;

const DEFAULT_MAX_CACHED_AGE_SECS: u64 = 7 * 24 * 60 * 60;

#[derive(Debug, Parser)]
#[command(name = "ouinet-client", about = "A censorship-resistant HTTP request router")]
pub struct Args {
    /// Directory holding this node's persistent state and PID file.
    #[arg(long)]
    pub repo: Option<PathBuf>,

    #[arg(long)]
    pub listen_on_tcp: Option<SocketAddr>,

    #[arg(long)]
    pub injector_ep: Option<SocketAddr>,

    #[arg(long)]
    pub injector_ipns: Option<String>,

    #[arg(long)]
    pub max_cached_age: Option<u64>,

    #[arg(long)]
    pub open_file_limit: Option<u64>,
}

/// The on-disk `ouinet-client.conf`, every field optional so a flag can
/// always override it.
#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    repo: Option<PathBuf>,
    listen_on_tcp: Option<SocketAddr>,
    injector_ep: Option<SocketAddr>,
    injector_ipns: Option<String>,
    max_cached_age: Option<u64>,
    open_file_limit: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub repo: PathBuf,
    pub listen_on_tcp: SocketAddr,
    pub injector_ep: Option<SocketAddr>,
    pub injector_ipns: Option<String>,
    pub max_cached_age: u64,
    pub open_file_limit: Option<u64>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("--repo is required (pass it on the command line or set `repo` in the config file)")]
    MissingRepo,

    #[error("failed to read config file {path}: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },

    #[error("failed to parse config file {path}: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
}

impl Config {
    /// Builds the effective configuration: parse `args`, read
    /// `REPO/ouinet-client.conf` if `--repo` resolved and the file exists,
    /// then let every flag present in `args` win over the file.
    pub fn resolve(args: Args) -> Result<Self, ConfigError> {
        let file = match &args.repo {
            Some(repo) => read_file_config(&repo.join("ouinet-client.conf"))?,
            None => FileConfig::default(),
        };

        let repo = args.repo.or(file.repo).ok_or(ConfigError::MissingRepo)?;
        let listen_on_tcp = args
            .listen_on_tcp
            .or(file.listen_on_tcp)
            .unwrap_or_else(|| "127.0.0.1:8077".parse().expect("a hardcoded default address always parses"));

        Ok(Config {
            repo,
            listen_on_tcp,
            injector_ep: args.injector_ep.or(file.injector_ep),
            injector_ipns: args.injector_ipns.or(file.injector_ipns),
            max_cached_age: args.max_cached_age.or(file.max_cached_age).unwrap_or(DEFAULT_MAX_CACHED_AGE_SECS),
            open_file_limit: args.open_file_limit.or(file.open_file_limit),
        })
    }

    pub fn pid_file(&self) -> PathBuf {
        self.repo.join("pid")
    }
}

fn read_file_config(path: &Path) -> Result<FileConfig, ConfigError> {
    if !path.exists() {
        return Ok(FileConfig::default());
    }
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&contents).map_err(|source| ConfigError::ParseFile {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bare_args(repo: Option<PathBuf>) -> Args {
        Args {
            repo,
            listen_on_tcp: None,
            injector_ep: None,
            injector_ipns: None,
            max_cached_age: None,
            open_file_limit: None,
        }
    }

    #[test]
    fn missing_repo_is_a_configuration_error() {
        let result = Config::resolve(bare_args(None));
        assert!(matches!(result, Err(ConfigError::MissingRepo)));
    }

    #[test]
    fn defaults_fill_in_when_no_file_and_no_flags() {
        let tmp = std::env::temp_dir().join("ouinet-client-test-defaults");
        let config = Config::resolve(bare_args(Some(tmp.clone()))).unwrap();
        assert_eq!(config.repo, tmp);
        assert_eq!(config.max_cached_age, DEFAULT_MAX_CACHED_AGE_SECS);
        assert_eq!(config.listen_on_tcp, "127.0.0.1:8077".parse().unwrap());
    }

    #[test]
    fn a_flag_overrides_the_file() {
        let dir = std::env::temp_dir().join("ouinet-client-test-override");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("ouinet-client.conf"), "max_cached_age = 120\n").unwrap();

        let mut args = bare_args(Some(dir.clone()));
        args.max_cached_age = Some(99);
        let config = Config::resolve(args).unwrap();
        assert_eq!(config.max_cached_age, 99);

        let config = Config::resolve(bare_args(Some(dir))).unwrap();
        assert_eq!(config.max_cached_age, 120);
    }
}
