use std::time::Duration;

use anyhow::Result;
use camino::{Utf8Path, Utf8PathBuf};
use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_inline_default::serde_inline_default;
use url::Url;

/// Name of the configuration file read from the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "hoard.toml";

#[serde_inline_default]
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
pub struct LocalConfig {
    #[serde_inline_default(Utf8PathBuf::from("data"))]
    #[schemars(with = "String")]
    /// The host directory to serve.
    pub base_dir: Utf8PathBuf,

    #[serde_inline_default(true)]
    /// Create `base_dir` at startup if it does not exist.
    pub auto_create: bool,

    #[serde_inline_default(false)]
    pub read_only: bool,

    #[serde_inline_default("/local".to_string())]
    /// Where the directory appears in the virtual filesystem.
    pub mount_point: String,
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            base_dir: Utf8PathBuf::from("data"),
            auto_create: true,
            read_only: false,
            mount_point: "/local".to_string(),
        }
    }
}

#[serde_inline_default]
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
pub struct ContentConfig {
    /// Base URL of the blob service. The content store is disabled when
    /// this is unset.
    pub endpoint: Option<Url>,

    /// Bearer token sent with every blob request.
    pub access_token: Option<String>,

    #[serde_inline_default(false)]
    pub read_only: bool,

    #[serde_inline_default(Duration::from_secs(30))]
    #[serde(with = "humantime_serde")]
    #[schemars(with = "String")]
    /// Timeout for a single blob request, e.g. `30s` or `2m`.
    pub timeout: Duration,

    #[serde_inline_default("/ipfs".to_string())]
    /// Where the store appears in the virtual filesystem.
    pub mount_point: String,
}

impl Default for ContentConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            access_token: None,
            read_only: false,
            timeout: Duration::from_secs(30),
            mount_point: "/ipfs".to_string(),
        }
    }
}

#[serde_inline_default]
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
pub struct StateConfig {
    #[serde_inline_default(Utf8PathBuf::from("hoard-state.json"))]
    #[schemars(with = "String")]
    /// JSON file holding the mount table and content index.
    pub path: Utf8PathBuf,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            path: Utf8PathBuf::from("hoard-state.json"),
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize, Clone, JsonSchema)]
pub struct Config {
    #[serde(default)]
    pub local: LocalConfig,
    #[serde(default)]
    pub content: ContentConfig,
    #[serde(default)]
    pub state: StateConfig,
}

impl Config {
    /// Load `hoard.toml` from the working directory, overlaid with
    /// `HOARD_`-prefixed environment variables.
    pub fn load() -> Result<Config> {
        Self::load_from(Utf8Path::new(DEFAULT_CONFIG_FILE))
    }

    pub fn load_from(path: &Utf8Path) -> Result<Config> {
        let config: Config = Self::figment(path).extract()?;

        Ok(config)
    }

    fn figment(path: &Utf8Path) -> Figment {
        Figment::new()
            .merge(Toml::file(path.as_std_path()))
            .merge(Env::prefixed("HOARD_").split("__"))
    }
}

#[cfg(test)]
mod tests {
    use figment::Jail;

    use super::*;

    #[test]
    fn defaults_apply_without_a_file() {
        Jail::expect_with(|_jail| {
            let config = Config::load().expect("defaults should load");

            assert_eq!(config.local.base_dir, "data");
            assert!(config.local.auto_create);
            assert_eq!(config.local.mount_point, "/local");
            assert!(config.content.endpoint.is_none());
            assert_eq!(config.content.timeout, Duration::from_secs(30));
            assert_eq!(config.content.mount_point, "/ipfs");
            assert_eq!(config.state.path, "hoard-state.json");

            Ok(())
        });
    }

    #[test]
    fn file_and_environment_are_merged() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "hoard.toml",
                r#"
                [local]
                base_dir = "/srv/hoard"
                read_only = true

                [content]
                endpoint = "http://blobs.internal:8080/"
                timeout = "5s"
                "#,
            )?;
            jail.set_env("HOARD_CONTENT__ACCESS_TOKEN", "sekrit");
            jail.set_env("HOARD_LOCAL__MOUNT_POINT", "/disk");

            let config = Config::load().expect("config should load");

            assert_eq!(config.local.base_dir, "/srv/hoard");
            assert!(config.local.read_only);
            assert_eq!(config.local.mount_point, "/disk");
            assert_eq!(
                config.content.endpoint.as_ref().map(Url::as_str),
                Some("http://blobs.internal:8080/")
            );
            assert_eq!(config.content.access_token.as_deref(), Some("sekrit"));
            assert_eq!(config.content.timeout, Duration::from_secs(5));

            Ok(())
        });
    }
}
