//! Command-line arguments of the controller.
#![deny(missing_docs)]

use std::time::Duration;

use clap::Parser;

use crate::{dispatch::GrpcConnector, reconcile::ReconcilerConfig};

/// Dispatches `GrpcCall`s to the agents of their units.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Namespace to watch, all namespaces when not set.
    #[arg(long, env = "UNITOPS_NAMESPACE")]
    pub namespace: Option<String>,

    /// Seconds between reconciliations of a call, used to check its TTL.
    #[arg(long, default_value_t = 30, env = "UNITOPS_REQUEUE_INTERVAL")]
    pub requeue_interval: u64,

    /// Seconds to wait for a connection to an agent.
    #[arg(long, default_value_t = 5, env = "UNITOPS_CONNECT_TIMEOUT")]
    pub connect_timeout: u64,

    /// Seconds an agent call may take, 0 waits forever.
    ///
    /// Backups of large databases can run for hours.
    #[arg(long, default_value_t = 0, env = "UNITOPS_REQUEST_TIMEOUT")]
    pub request_timeout: u64,

    /// Seconds after which a call claimed but never completed is marked as failed, 0 leaves
    /// such calls alone.
    #[arg(long, default_value_t = 6 * 60 * 60, env = "UNITOPS_CLAIM_TIMEOUT")]
    pub claim_timeout: u64,

    /// Reporter name of the events published on units.
    #[arg(long, default_value = "unitops-controller", env = "UNITOPS_REPORTER")]
    pub reporter: String,
}

fn seconds(value: u64) -> Option<Duration> {
    (value != 0).then(|| Duration::from_secs(value))
}

impl Args {
    /// Timeouts of agent calls.
    pub fn connector(&self) -> GrpcConnector {
        GrpcConnector {
            connect_timeout: Duration::from_secs(self.connect_timeout),
            request_timeout: seconds(self.request_timeout),
        }
    }

    /// Timing of reconciliations.
    pub fn reconciler_config(&self) -> ReconcilerConfig {
        ReconcilerConfig {
            requeue_interval: Duration::from_secs(self.requeue_interval),
            claim_timeout: seconds(self.claim_timeout),
        }
    }
}

/// Parses the command line and the `UNITOPS_*` environment.
pub fn parse_args() -> Args {
    Args::parse()
}
