use clap::Args;

/// Connection options for the schema registry.
#[derive(Debug, Clone, Args)]
pub struct RegistryOpts {
    /// Schema registry base URL
    #[arg(long, default_value = "http://localhost:8081", env = "SCHEMA_REGISTRY_URL")]
    pub registry_url: String,

    /// Basic auth username (used only together with a password)
    #[arg(long, env = "SCHEMA_REGISTRY_USERNAME")]
    pub registry_username: Option<String>,

    /// Basic auth password
    #[arg(long, env = "SCHEMA_REGISTRY_PASSWORD")]
    pub registry_password: Option<String>,

    /// Per-request timeout in seconds
    #[arg(long, default_value_t = 10)]
    pub registry_timeout_secs: u64,
}

impl Default for RegistryOpts {
    fn default() -> Self {
        Self {
            registry_url: "http://localhost:8081".to_string(),
            registry_username: None,
            registry_password: None,
            registry_timeout_secs: 10,
        }
    }
}

impl RegistryOpts {
    /// Credentials, only when both halves are configured.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (&self.registry_username, &self.registry_password) {
            (Some(user), Some(pass)) if !user.is_empty() && !pass.is_empty() => {
                Some((user.as_str(), pass.as_str()))
            }
            _ => None,
        }
    }
}
