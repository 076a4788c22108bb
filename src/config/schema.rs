use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::chooser::LoadBalance;
use crate::host::{ConnectionProperties, HostRequirement, HostSpec};

use super::ConfigError;

/// Cluster-aware connection configuration
///
/// Keys follow the connection-string option names (`autoBalance`,
/// `priorityServers`, ...). `hosts` keeps configuration order; the
/// dual-cluster split depends on it.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterConfig {
    /// `host:port` entries in configuration order
    pub hosts: Vec<String>,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub database: Option<String>,
    /// Load-balancing strategy name
    #[serde(default = "default_auto_balance")]
    pub auto_balance: String,
    /// Dual-cluster split index: the first N hosts form one cluster
    #[serde(default)]
    pub priority_servers: Option<usize>,
    /// Requested probing interval (milliseconds)
    #[serde(default = "default_heartbeat_period")]
    pub heartbeat_period: u64,
    /// Staleness window for recorded host statuses
    #[serde(default = "default_host_recheck_seconds")]
    pub host_recheck_seconds: u64,
    #[serde(default = "default_target_server_type")]
    pub target_server_type: String,
    /// Route statements between a write host and read hosts
    #[serde(default)]
    pub enable_statement_load_balance: bool,
    /// Explicit write host; discovered by probing when absent
    #[serde(default)]
    pub write_data_source_address: Option<String>,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Upper bound on waiting for another connection to publish the master cluster
    #[serde(default = "default_master_cluster_wait_ms")]
    pub master_cluster_wait_ms: u64,
}

fn default_auto_balance() -> String {
    "false".to_string()
}

fn default_heartbeat_period() -> u64 {
    5000
}

fn default_host_recheck_seconds() -> u64 {
    10
}

fn default_target_server_type() -> String {
    "any".to_string()
}

fn default_connect_timeout_ms() -> u64 {
    3000
}

fn default_master_cluster_wait_ms() -> u64 {
    // 10 ms poll interval x 200 iterations
    2000
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            hosts: Vec::new(),
            user: String::new(),
            password: String::new(),
            database: None,
            auto_balance: default_auto_balance(),
            priority_servers: None,
            heartbeat_period: default_heartbeat_period(),
            host_recheck_seconds: default_host_recheck_seconds(),
            target_server_type: default_target_server_type(),
            enable_statement_load_balance: false,
            write_data_source_address: None,
            connect_timeout_ms: default_connect_timeout_ms(),
            master_cluster_wait_ms: default_master_cluster_wait_ms(),
        }
    }
}

impl ClusterConfig {
    /// Build a config from a connection-string option map
    ///
    /// Option names are matched case-insensitively. Unknown options are ignored.
    pub fn from_options<S: AsRef<str>>(
        hosts: &[S],
        options: &HashMap<String, String>,
    ) -> Result<Self, ConfigError> {
        let mut config = ClusterConfig {
            hosts: hosts.iter().map(|h| h.as_ref().to_string()).collect(),
            ..Default::default()
        };

        for (key, value) in options {
            let value = value.trim();
            match key.to_ascii_lowercase().as_str() {
                "user" => config.user = value.to_string(),
                "password" => config.password = value.to_string(),
                "database" | "dbname" => config.database = Some(value.to_string()),
                "autobalance" => config.auto_balance = value.to_string(),
                "priorityservers" => {
                    config.priority_servers = Some(parse_option(key, value)?)
                }
                "heartbeatperiod" => config.heartbeat_period = parse_option(key, value)?,
                "hostrecheckseconds" => config.host_recheck_seconds = parse_option(key, value)?,
                "targetservertype" => config.target_server_type = value.to_string(),
                "enablestatementloadbalance" => {
                    config.enable_statement_load_balance = parse_option(key, value)?
                }
                "writedatasourceaddress" => {
                    config.write_data_source_address = Some(value.to_string())
                }
                "connecttimeout" | "connecttimeoutms" => {
                    config.connect_timeout_ms = parse_option(key, value)?
                }
                "masterclusterwaitms" => config.master_cluster_wait_ms = parse_option(key, value)?,
                _ => {}
            }
        }

        Ok(config)
    }

    /// Reject configurations that cannot be used, before any connection is attempted
    pub fn validate(&self) -> Result<(), ConfigError> {
        let hosts = self.host_specs()?;
        if hosts.is_empty() {
            return Err(ConfigError::Invalid("no hosts configured".into()));
        }

        if let LoadBalance::PriorityRoundRobin(n) = self.load_balance()? {
            check_priority("autoBalance", n, hosts.len())?;
        }
        if let Some(n) = self.priority_servers {
            check_priority("priorityServers", n, hosts.len())?;
        }

        self.target_server_type()?;

        if let Some(write_host) = self.write_host()? {
            if !hosts.contains(&write_host) {
                return Err(ConfigError::Invalid(format!(
                    "writeDataSourceAddress {} is not one of the configured hosts",
                    write_host
                )));
            }
        }

        Ok(())
    }

    pub fn host_specs(&self) -> Result<Vec<HostSpec>, ConfigError> {
        self.hosts
            .iter()
            .map(|h| HostSpec::from_str(h).map_err(|e| ConfigError::Invalid(e.to_string())))
            .collect()
    }

    pub fn load_balance(&self) -> Result<LoadBalance, ConfigError> {
        self.auto_balance.parse().map_err(ConfigError::Invalid)
    }

    pub fn target_server_type(&self) -> Result<HostRequirement, ConfigError> {
        self.target_server_type.parse().map_err(ConfigError::Invalid)
    }

    pub fn write_host(&self) -> Result<Option<HostSpec>, ConfigError> {
        self.write_data_source_address
            .as_deref()
            .map(|addr| HostSpec::from_str(addr).map_err(|e| ConfigError::Invalid(e.to_string())))
            .transpose()
    }

    pub fn connection_properties(&self) -> ConnectionProperties {
        ConnectionProperties {
            user: self.user.clone(),
            password: self.password.clone(),
            database: self.database.clone(),
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            ..Default::default()
        }
    }

    pub fn heartbeat_period(&self) -> Duration {
        Duration::from_millis(self.heartbeat_period)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.host_recheck_seconds)
    }

    pub fn master_cluster_wait(&self) -> Duration {
        Duration::from_millis(self.master_cluster_wait_ms)
    }

    /// Key identifying the logical URL: configured hosts plus database
    pub fn url_key(&self) -> String {
        format!(
            "{}/{}",
            self.hosts.join(","),
            self.database.as_deref().unwrap_or_default()
        )
    }
}

fn parse_option<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .parse()
        .map_err(|_| ConfigError::Invalid(format!("Invalid value for {}: {}", key, value)))
}

fn check_priority(option: &str, n: usize, host_count: usize) -> Result<(), ConfigError> {
    if n == 0 || n >= host_count {
        return Err(ConfigError::Invalid(format!(
            "{} must satisfy 0 < N < {} (got {})",
            option, host_count, n
        )));
    }
    Ok(())
}
