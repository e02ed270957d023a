use std::collections::HashMap;
use std::io::Read;
use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Result;
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,

    /// Hide error details from response bodies
    #[serde(default)]
    pub production: bool,
    #[serde(default = "default_compression")]
    pub compression: bool,

    /// Lock timeouts, in seconds
    #[serde(default = "default_min_lock_timeout")]
    pub min_lock_timeout: u64,
    #[serde(default)]
    pub max_lock_timeout: Option<u64>,

    #[serde(default = "default_max_xml_body")]
    pub max_xml_body: usize,

    pub auth: AuthConfig,

    #[serde(rename = "mount", default)]
    pub mounts: Vec<MountConfig>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AuthConfig {
    pub kind: AuthKind,
    #[serde(default = "default_realm")]
    pub realm: String,
    /// username -> argon2 PHC string
    #[serde(default)]
    pub users: HashMap<String, String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AuthKind {
    Static,
    Anonymous,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct MountConfig {
    pub prefix: String,
    #[serde(default)]
    pub backend: Backend,
    #[serde(default)]
    pub read_only: bool,
    /// Byte quota of the backend
    #[serde(default)]
    pub quota: Option<u64>,
    #[serde(default)]
    pub deny_anonymous_writes: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Memory,
}

impl Config {
    /// Developer setup: anonymous access to a memory tree on localhost
    pub fn dev() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0, 0, 0, 0, 1], 8087)),
            production: false,
            compression: default_compression(),
            min_lock_timeout: default_min_lock_timeout(),
            max_lock_timeout: Some(10800),
            max_xml_body: default_max_xml_body(),
            auth: AuthConfig {
                kind: AuthKind::Anonymous,
                realm: default_realm(),
                users: HashMap::new(),
            },
            mounts: vec![MountConfig {
                prefix: "/".into(),
                backend: Backend::Memory,
                read_only: false,
                quota: None,
                deny_anonymous_writes: false,
            }],
        }
    }
}

pub fn read_config(config_file: PathBuf) -> Result<Config> {
    let mut file = std::fs::OpenOptions::new()
        .read(true)
        .open(config_file.as_path())?;

    let mut config = String::new();
    file.read_to_string(&mut config)?;

    Ok(toml::from_str(&config)?)
}

fn default_compression() -> bool {
    true
}

fn default_min_lock_timeout() -> u64 {
    10
}

fn default_max_xml_body() -> usize {
    1024 * 1024
}

fn default_realm() -> String {
    "Stratus".into()
}
