//! # gerrit-cl configuration
//!
//! Settings live in the `[gerrit]` table of a TOML file:
//!
//! ```toml
//! [gerrit]
//! host = "review.example.org"
//! username = "jdoe"
//! ssh_port = 29418
//! ssh_keyfile = "~/.ssh/gerrit_ed25519"
//! strict_host_key_checking = true
//! ```
//!
//! Sources, later ones overriding earlier ones:
//! 1. `~/.gerrit-cl.toml` (skipped when missing)
//! 2. the nearest `.gerrit-cl.toml` above the working directory, or the file
//!    given with `--config`; without either, the nearest `.gitreview`
//!    (`host`, `port` and `username` of its `[gerrit]` section)
//! 3. `GERRIT_HOST`, `GERRIT_USERNAME`, `GERRIT_SSH_PORT`
//! 4. command-line flags

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use ini::Ini;
use serde::Deserialize;

use gerrit_events::{ConnectionParams, HostKeyPolicy, DEFAULT_SSH_PORT};

pub const CONFIG_FILENAME: &str = ".gerrit-cl.toml";
pub const GITREVIEW_FILENAME: &str = ".gitreview";
pub const SECTION: &str = "gerrit";

pub const ENV_HOST: &str = "GERRIT_HOST";
pub const ENV_USERNAME: &str = "GERRIT_USERNAME";
pub const ENV_SSH_PORT: &str = "GERRIT_SSH_PORT";

/// Merged settings. `None` means "not set by any source yet".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GerritConfig {
    pub host: Option<String>,
    pub username: Option<String>,
    pub ssh_port: Option<u16>,
    pub ssh_keyfile: Option<PathBuf>,
    pub ssh_passphrase: Option<String>,
    pub strict_host_key_checking: Option<bool>,
}

#[derive(Deserialize)]
struct RootConfig {
    #[serde(default)]
    gerrit: Option<RawGerritConfig>,
}

#[derive(Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct RawGerritConfig {
    host: Option<String>,
    username: Option<String>,
    ssh_port: Option<u16>,
    ssh_keyfile: Option<String>,
    ssh_passphrase: Option<String>,
    strict_host_key_checking: Option<bool>,
}

impl RawGerritConfig {
    fn into_runtime_config(self, base: &Path, home: Option<&Path>) -> GerritConfig {
        GerritConfig {
            host: self.host,
            username: self.username,
            ssh_port: self.ssh_port,
            ssh_keyfile: self
                .ssh_keyfile
                .map(|value| resolve_path(base, home, &value)),
            ssh_passphrase: self.ssh_passphrase,
            strict_host_key_checking: self.strict_host_key_checking,
        }
    }
}

impl GerritConfig {
    /// Overlay every value set in `other`.
    pub fn merge(&mut self, other: GerritConfig) {
        if other.host.is_some() {
            self.host = other.host;
        }
        if other.username.is_some() {
            self.username = other.username;
        }
        if other.ssh_port.is_some() {
            self.ssh_port = other.ssh_port;
        }
        if other.ssh_keyfile.is_some() {
            self.ssh_keyfile = other.ssh_keyfile;
        }
        if other.ssh_passphrase.is_some() {
            self.ssh_passphrase = other.ssh_passphrase;
        }
        if other.strict_host_key_checking.is_some() {
            self.strict_host_key_checking = other.strict_host_key_checking;
        }
    }

    /// Overlay the `GERRIT_*` variables found through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let port = lookup(ENV_SSH_PORT)
            .map(|raw| {
                raw.trim()
                    .parse::<u16>()
                    .with_context(|| format!("{ENV_SSH_PORT}: invalid port '{raw}'"))
            })
            .transpose()?;

        self.merge(GerritConfig {
            host: lookup(ENV_HOST).filter(|v| !v.is_empty()),
            username: lookup(ENV_USERNAME).filter(|v| !v.is_empty()),
            ssh_port: port,
            ..Default::default()
        });
        Ok(())
    }

    /// Build the SSH parameters for the event stream.
    pub fn connection_params(&self) -> Result<ConnectionParams> {
        let host = self
            .host
            .clone()
            .ok_or_else(|| anyhow!("{SECTION}.host not set"))?;
        let username = self
            .username
            .clone()
            .ok_or_else(|| anyhow!("{SECTION}.username not set"))?;

        let mut params = ConnectionParams::new(strip_scheme(&host));
        params.port = self.ssh_port.unwrap_or(DEFAULT_SSH_PORT);
        params.username = Some(username);
        params.keyfile = self.ssh_keyfile.clone();
        params.passphrase = self.ssh_passphrase.clone();
        params.host_key_policy = if self.strict_host_key_checking.unwrap_or(false) {
            HostKeyPolicy::Strict
        } else {
            HostKeyPolicy::AcceptNew
        };
        Ok(params)
    }
}

/// Parse one configuration file.
pub fn load_file(path: &Path, home: Option<&Path>) -> Result<GerritConfig> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("cannot read configuration {}", path.display()))?;
    let parsed: RootConfig = toml::from_str(&contents)
        .with_context(|| format!("failed to parse configuration {}", path.display()))?;
    let Some(raw) = parsed.gerrit else {
        bail!("{}: missing section [{}]", path.display(), SECTION);
    };
    Ok(raw.into_runtime_config(path.parent().unwrap_or(Path::new(".")), home))
}

/// Read the `[gerrit]` section of a `.gitreview` file.
pub fn load_gitreview(path: &Path) -> Result<GerritConfig> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("cannot read configuration {}", path.display()))?;
    let parsed = Ini::load_from_str(&contents)
        .with_context(|| format!("failed to parse configuration {}", path.display()))?;
    let Some(section) = parsed.section(Some(SECTION)) else {
        bail!("{}: missing section [{}]", path.display(), SECTION);
    };
    let ssh_port = section
        .get("port")
        .map(|raw| {
            raw.trim()
                .parse::<u16>()
                .with_context(|| format!("{}: invalid port '{raw}'", path.display()))
        })
        .transpose()?;

    Ok(GerritConfig {
        host: section.get("host").map(str::to_string),
        username: section.get("username").map(str::to_string),
        ssh_port,
        ..Default::default()
    })
}

/// Load the global file, then the local (or explicit) one.
pub fn load_all(explicit: Option<&Path>, cwd: &Path, home: Option<&Path>) -> Result<GerritConfig> {
    let mut config = GerritConfig::default();

    let global = home.map(|dir| dir.join(CONFIG_FILENAME));
    if let Some(path) = global.as_deref().filter(|path| path.is_file()) {
        tracing::debug!("loading {}", path.display());
        config.merge(load_file(path, home)?);
    }

    let local = match explicit {
        Some(path) => Some(path.to_path_buf()),
        None => reverse_find_file(CONFIG_FILENAME, cwd, global.as_deref()),
    };
    if let Some(path) = local {
        tracing::debug!("loading {}", path.display());
        config.merge(load_file(&path, home)?);
    } else if let Some(path) = reverse_find_file(GITREVIEW_FILENAME, cwd, None) {
        tracing::debug!("loading {}", path.display());
        config.merge(load_gitreview(&path)?);
    }

    Ok(config)
}

/// Look for `filename` in `origin` and its ancestors, skipping `ignore`.
pub fn reverse_find_file(filename: &str, origin: &Path, ignore: Option<&Path>) -> Option<PathBuf> {
    origin
        .ancestors()
        .map(|dir| dir.join(filename))
        .find(|candidate| candidate.is_file() && Some(candidate.as_path()) != ignore)
}

fn resolve_path(base: &Path, home: Option<&Path>, value: &str) -> PathBuf {
    if let (Some(rest), Some(home)) = (value.strip_prefix("~/"), home) {
        return home.join(rest);
    }
    let path = Path::new(value);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

// `.gitreview`-style hosts are sometimes written as URLs.
fn strip_scheme(host: &str) -> String {
    let bare = host
        .strip_prefix("https://")
        .or_else(|| host.strip_prefix("http://"))
        .or_else(|| host.strip_prefix("ssh://"))
        .unwrap_or(host);
    bare.trim_end_matches('/').to_string()
}
