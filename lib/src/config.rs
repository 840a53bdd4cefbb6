//! Defines the `Config` struct built once at process start and handed to the
//! binary store, quad assembler and resource service. It can be assembled with
//! [`Config::builder`], read from a JSON file, and overridden from the
//! environment using the same keys the Cassandra deployment has always used.

use crate::consistency::{ConsistencyLevel, ConsistencyPolicy};
use anyhow::{anyhow, Context, Result};
use derive_builder::Builder;
use serde::{Deserialize, Serialize};
use std::io::{BufReader, Write};
use std::path::Path;

/// Default maximum chunk size for binaries: 1 MiB.
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;

pub const ENV_CONTACT_ADDRESS: &str = "CASSANDRA_CONTACT_ADDRESS";
pub const ENV_CONTACT_PORT: &str = "CASSANDRA_CONTACT_PORT";
pub const ENV_KEYSPACE: &str = "CASSANDRA_KEYSPACE";
pub const ENV_MAX_CHUNK_SIZE: &str = "CASSANDRA_MAX_CHUNK_SIZE";
pub const ENV_BINARY_READ_CONSISTENCY: &str = "CASSANDRA_BINARY_READ_CONSISTENCY";
pub const ENV_BINARY_WRITE_CONSISTENCY: &str = "CASSANDRA_BINARY_WRITE_CONSISTENCY";
pub const ENV_RDF_READ_CONSISTENCY: &str = "CASSANDRA_RDF_READ_CONSISTENCY";
pub const ENV_RDF_WRITE_CONSISTENCY: &str = "CASSANDRA_RDF_WRITE_CONSISTENCY";

#[derive(Builder, Serialize, Deserialize, Debug, Clone, PartialEq)]
#[builder(default, setter(into), build_fn(validate = "Self::validate"))]
#[serde(default)]
pub struct Config {
    // contact point for the session collaborator
    pub contact_address: String,
    pub contact_port: u16,
    pub keyspace: String,
    /// Upper bound on the size of a single stored chunk, in bytes.
    pub max_chunk_size: usize,
    pub consistency: ConsistencyPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            contact_address: "localhost".to_string(),
            contact_port: 9042,
            keyspace: "trellis".to_string(),
            max_chunk_size: DEFAULT_CHUNK_SIZE,
            consistency: ConsistencyPolicy::default(),
        }
    }
}

impl ConfigBuilder {
    fn validate(&self) -> std::result::Result<(), String> {
        if self.max_chunk_size == Some(0) {
            return Err("max_chunk_size must be at least 1 byte".to_string());
        }
        Ok(())
    }
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Defaults overridden by whatever `CASSANDRA_*` variables are set.
    pub fn from_env() -> Result<Self> {
        Config::default().with_overrides(|key| std::env::var(key).ok())
    }

    /// Applies overrides looked up by environment key. Unset keys keep the
    /// current value; malformed values are an error rather than ignored.
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(address) = lookup(ENV_CONTACT_ADDRESS) {
            self.contact_address = address;
        }
        if let Some(port) = lookup(ENV_CONTACT_PORT) {
            self.contact_port = port
                .trim()
                .parse()
                .with_context(|| format!("{} is not a port: '{}'", ENV_CONTACT_PORT, port))?;
        }
        if let Some(keyspace) = lookup(ENV_KEYSPACE) {
            self.keyspace = keyspace;
        }
        if let Some(size) = lookup(ENV_MAX_CHUNK_SIZE) {
            self.max_chunk_size = size
                .trim()
                .parse()
                .with_context(|| format!("{} is not a size: '{}'", ENV_MAX_CHUNK_SIZE, size))?;
        }
        let level = |key: &str| -> Result<Option<ConsistencyLevel>> {
            lookup(key)
                .map(|v| v.parse().with_context(|| format!("bad value for {}", key)))
                .transpose()
        };
        if let Some(l) = level(ENV_BINARY_READ_CONSISTENCY)? {
            self.consistency.binary_read = l;
        }
        if let Some(l) = level(ENV_BINARY_WRITE_CONSISTENCY)? {
            self.consistency.binary_write = l;
        }
        if let Some(l) = level(ENV_RDF_READ_CONSISTENCY)? {
            self.consistency.mutable_read = l;
        }
        if let Some(l) = level(ENV_RDF_WRITE_CONSISTENCY)? {
            self.consistency.mutable_write = l;
        }
        self.check()?;
        Ok(self)
    }

    fn check(&self) -> Result<()> {
        if self.max_chunk_size == 0 {
            return Err(anyhow!("max_chunk_size must be at least 1 byte"));
        }
        Ok(())
    }

    pub fn save_to_file(&self, file: &Path) -> Result<()> {
        let config_str = serde_json::to_string_pretty(&self)?;
        let mut file = std::fs::File::create(file)?;
        file.write_all(config_str.as_bytes())?;
        Ok(())
    }

    pub fn from_file(file: &Path) -> Result<Self> {
        let file = std::fs::File::open(file)?;
        let reader = BufReader::new(file);
        let config: Config = serde_json::from_reader(reader)?;
        config.check()?;
        Ok(config)
    }

    /// Prints out the current Config in a clear and readable way for command line output.
    pub fn print(&self) {
        println!("Configuration:");
        println!("  Contact: {}:{}", self.contact_address, self.contact_port);
        println!("  Keyspace: {}", self.keyspace);
        println!("  Max Chunk Size: {}", self.max_chunk_size);
        println!("  Consistency:");
        println!("    Binary Read: {}", self.consistency.binary_read);
        println!("    Binary Write: {}", self.consistency.binary_write);
        println!("    RDF Read: {}", self.consistency.mutable_read);
        println!("    RDF Write: {}", self.consistency.mutable_write);
    }
}
