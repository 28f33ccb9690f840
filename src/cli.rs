use clap::{ArgAction, Parser};
use std::path::PathBuf;

use crate::client::DEFAULT_COMPUTE_ENDPOINT;

#[derive(Parser, Debug, Clone)]
#[command(name = "node-policy-controller")]
#[command(about = "Apply a Cloud Armor security policy to the instances behind selected nodes")]
#[command(version)]
pub struct Args {
    /// The node label selector, e.g. cloud.google.com/gke-nodepool=default-pool
    #[arg(long, env = "SELECTOR", default_value = "")]
    pub selector: String,

    /// Name or URL of the security policy. Empty unsets the policy of the selected nodes
    #[arg(
        long,
        alias = "securityPolicy",
        env = "SECURITY_POLICY",
        default_value = ""
    )]
    pub security_policy: String,

    /// Project owning the instances (default: discovered from the metadata server)
    #[arg(long, env = "PROJECT_ID", value_name = "PROJECT")]
    pub project_id: Option<String>,

    /// Zone the controller runs in, used to derive the policy region
    /// (default: discovered from the metadata server)
    #[arg(long, env = "ZONE")]
    pub zone: Option<String>,

    /// Base URL of the Compute Engine API
    #[arg(long, env = "COMPUTE_ENDPOINT", default_value = DEFAULT_COMPUTE_ENDPOINT)]
    pub compute_endpoint: String,

    /// Static OAuth access token (default: minted by the metadata server)
    #[arg(long, env = "GCE_ACCESS_TOKEN", hide_env_values = true)]
    pub access_token: Option<String>,

    /// Deadline in seconds for each Kubernetes or Compute API call
    #[arg(long, default_value = "30", value_name = "SECS")]
    pub request_timeout: u64,

    /// Seconds to wait before retrying a node whose reconciliation failed
    #[arg(long, default_value = "60", value_name = "SECS")]
    pub requeue_after: u64,

    /// Bind address of the health and status server
    #[arg(long, env = "HEALTH_ADDR", default_value = "0.0.0.0:8081", value_name = "ADDR")]
    pub health_addr: String,

    /// Path to a .env file loaded before settings are resolved
    #[arg(long, value_name = "FILE")]
    pub env_file: Option<PathBuf>,

    /// Resolve and print settings without watching nodes
    #[arg(long)]
    pub dry_run: bool,

    /// Enable verbose logging output (-v, -vv, -vvv)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,
}

impl Args {
    /// Default log filter for the verbosity count
    pub fn log_filter(&self) -> &'static str {
        match self.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    }
}

// ============================================================================
// SBIO: Pure display logic (no I/O - returns formatted strings)
// ============================================================================

use crate::config::Settings;

/// Format a dry-run summary of the resolved settings.
/// Pure function - returns a formatted string.
pub fn format_dry_run(settings: &Settings) -> String {
    let mut output = String::new();

    output.push_str(&format!(
        "node-policy-controller v{} - Dry Run Mode\n\n",
        env!("CARGO_PKG_VERSION")
    ));

    output.push_str(&format!("Project:  {}\n", settings.project_id));
    output.push_str(&format!(
        "Zone:     {} (region {})\n",
        settings.zone, settings.region
    ));

    let selector = if settings.selector.is_empty() {
        "<all nodes>".to_string()
    } else {
        settings.selector.to_string()
    };
    output.push_str(&format!("Selector: {}\n", selector));

    let policy = if settings.security_policy_url.is_empty() {
        "<unset> (selected nodes will have their policy cleared)".to_string()
    } else {
        settings.security_policy_url.clone()
    };
    output.push_str(&format!("Policy:   {}\n", policy));
    output.push_str(&format!("Compute:  {}\n", settings.compute_endpoint));
    output.push_str(&format!(
        "Auth:     {}\n",
        if settings.access_token.is_some() {
            "static access token"
        } else {
            "metadata server"
        }
    ));

    output.push_str("\nValidation: PASSED\n");
    output.push_str("Ready to watch nodes. Remove --dry-run to execute.\n");

    output
}
