use clap::Parser;
use std::path::PathBuf;

use crate::config::{ProvisionConfig, TimeoutConfig};
use crate::models::ErasePolicy;
use crate::orchestrator::RunOptions;

#[derive(Clone, Debug, Parser)]
#[command(version, about, long_about = None)] // read from Cargo.toml
pub struct Cli {
    /// Serial port of the device, e.g. /dev/ttyUSB0 or COM3
    #[arg(value_name = "port")]
    pub port: String,

    /// Erase the whole flash before uploading
    #[arg(long = "erase")]
    pub erase: bool,

    /// Skip building and upload the artifacts of a previous build
    #[arg(long = "no-build")]
    pub no_build: bool,

    /// Configuration file (default: ./provision.toml, then the user config dir)
    #[arg(env = "CERTFLASH_CONFIG", short = 'c', long = "config", value_name = "path")]
    pub config: Option<PathBuf>,

    /// Firmware project root
    #[arg(long = "project-dir", value_name = "dir")]
    pub project_dir: Option<PathBuf>,

    /// Directory holding the certificate files
    #[arg(long = "certs-dir", value_name = "dir")]
    pub certs_dir: Option<PathBuf>,

    /// Build environment of the firmware project
    #[arg(long = "env", value_name = "name")]
    pub build_env: Option<String>,

    /// Partition profile the firmware is built with
    #[arg(long = "partition-profile", value_name = "name")]
    pub partition_profile: Option<String>,

    /// Timeout applied to every external tool invocation, in seconds
    #[arg(long = "stage-timeout-secs", value_name = "secs")]
    pub stage_timeout_secs: Option<u64>,

    /// What an erase failure does to the run
    #[arg(long = "erase-failure", value_name = "policy", value_enum)]
    pub erase_failure: Option<ErasePolicy>,

    /// Echo debug logs (including tool output) to stderr
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,
}

impl Cli {
    /// Apply command-line overrides on top of the loaded configuration.
    ///
    /// Relative directories given on the command line are relative to the
    /// current directory; [`ProvisionConfig::make_absolute`] resolves them.
    pub fn apply_overrides(&self, config: &mut ProvisionConfig) {
        if let Some(dir) = &self.project_dir {
            config.project_dir = dir.clone();
        }
        if let Some(dir) = &self.certs_dir {
            config.certs_dir = dir.clone();
        }
        if let Some(env) = &self.build_env {
            config.build_env = env.clone();
        }
        if let Some(profile) = &self.partition_profile {
            config.partition_profile = profile.clone();
        }
        if let Some(secs) = self.stage_timeout_secs {
            config.timeouts = TimeoutConfig::uniform(secs);
        }
        if let Some(policy) = self.erase_failure {
            config.erase_failure = policy;
        }
    }

    pub fn run_options(&self) -> RunOptions {
        RunOptions {
            erase: self.erase,
            skip_build: self.no_build,
        }
    }
}
