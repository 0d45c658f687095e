//! Command line definition

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Drive restmcp-auth strategies from the terminal
#[derive(Parser, Debug)]
#[command(name = "restmcp-demo", version, about)]
pub struct Cli {
    /// Auth configuration file (toml, yaml or json)
    #[arg(long, short = 'c', global = true, env = "RESTMCP_CONFIG", default_value = "auth.toml")]
    pub config: PathBuf,

    /// Fallback log level when RUST_LOG is unset
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    /// Emit JSON logs
    #[arg(long, global = true)]
    pub json_logs: bool,

    /// Subcommand to run
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the device authorization grant and store the token
    DeviceLogin {
        /// Provider name from the configuration
        #[arg(long, short = 'p')]
        provider: String,

        /// Session key to store the token under
        #[arg(long, short = 's', default_value = "local")]
        session: String,
    },

    /// Obtain a client credentials token (cached when still usable)
    ClientToken {
        /// Provider name from the configuration
        #[arg(long, short = 'p')]
        provider: String,

        /// Session key the token is cached under
        #[arg(long, short = 's', default_value = "service")]
        session: String,
    },

    /// Send a GET request decorated by a provider
    Call {
        /// Provider name from the configuration
        #[arg(long, short = 'p')]
        provider: String,

        /// Session key
        #[arg(long, short = 's', default_value = "local")]
        session: String,

        /// Target URL
        url: String,
    },

    /// Remove a stored token
    Logout {
        /// Provider name from the configuration
        #[arg(long, short = 'p')]
        provider: String,

        /// Session key
        #[arg(long, short = 's', default_value = "local")]
        session: String,
    },

    /// Show the claims the gate would extract from a JWT
    Inspect {
        /// Bearer token
        #[arg(env = "RESTMCP_TOKEN", hide_env_values = true)]
        token: String,
    },

    /// Evaluate the challenge gate for a token and tool
    Check {
        /// Tool name
        #[arg(long, short = 't')]
        tool: Option<String>,

        /// Bearer token; omit to see the unauthenticated challenge
        #[arg(long, env = "RESTMCP_TOKEN", hide_env_values = true)]
        token: Option<String>,
    },

    /// Print the protected resource metadata document
    Metadata,
}
