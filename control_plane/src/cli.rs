use canopy_core::instrumentation::LogFormat;
use clap::{Parser, Subcommand};
use getset::{CopyGetters, Getters};

#[derive(Subcommand, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    /// Run the control plane (default)
    Run,
    /// Print the Application CustomResourceDefinition as YAML
    Crdgen,
}

#[derive(Parser, Getters, CopyGetters, Debug)]
#[command(about = "A Kubernetes control plane for Canopy applications", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    #[getset(get_copy = "pub")]
    #[arg(default_value = "8080", env = "PORT", long = "port")]
    port: u16,

    /// Namespace to watch; all namespaces when omitted
    #[getset(get = "pub")]
    #[arg(env = "CANOPY_NAMESPACE", long = "namespace")]
    namespace: Option<String>,

    #[getset(get = "pub")]
    #[arg(env = "POD_NAME", long = "pod-name")]
    pod_name: Option<String>,

    #[getset(get_copy = "pub")]
    #[arg(default_value = "text", env = "LOG_FORMAT", long = "log-format")]
    log_format: LogFormat,
}

impl Cli {
    pub fn command(&self) -> Command {
        self.command.unwrap_or(Command::Run)
    }
}
