//! Runtime settings.
//!
//! Layered, later sources win: built-in defaults, an optional TOML file,
//! `PKIAAS__<SECTION>__<KEY>` environment variables, then the conventional
//! `CONJUR_*` variables.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub conjur: ConjurSettings,
    #[serde(default)]
    pub pki: PkiSettings,
}

/// Connection to the Conjur secret store.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConjurSettings {
    pub appliance_url: String,
    pub account: String,
    pub authn_login: String,
    pub api_key: String,
    /// Trust anchor PEM. Written on first contact when the file does not exist yet.
    pub cert_file: Option<PathBuf>,
    pub connect_timeout_secs: u64,
    pub timeout_secs: u64,
}

impl Default for ConjurSettings {
    fn default() -> Self {
        Self {
            appliance_url: String::new(),
            account: String::new(),
            authn_login: String::new(),
            api_key: String::new(),
            cert_file: None,
            connect_timeout_secs: 10,
            timeout_secs: 30,
        }
    }
}

impl std::fmt::Debug for ConjurSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConjurSettings")
            .field("appliance_url", &self.appliance_url)
            .field("account", &self.account)
            .field("authn_login", &self.authn_login)
            .field("api_key", &"<redacted>")
            .field("cert_file", &self.cert_file)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

/// Where and how the authority keeps its state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PkiSettings {
    /// Policy branch all resources live under.
    pub branch: String,
    /// Days past `ExpirationDate` before a certificate counts as expired.
    pub expiration_buffer_days: i64,
    /// Days between `thisUpdate` and `nextUpdate` of generated CRLs.
    pub crl_validity_days: i64,
}

impl Default for PkiSettings {
    fn default() -> Self {
        Self {
            branch: "pki".to_string(),
            expiration_buffer_days: 0,
            crl_validity_days: 7,
        }
    }
}

const CONJUR_OVERRIDES: [(&str, &str); 5] = [
    ("conjur.appliance_url", "CONJUR_APPLIANCE_URL"),
    ("conjur.account", "CONJUR_ACCOUNT"),
    ("conjur.authn_login", "CONJUR_AUTHN_LOGIN"),
    ("conjur.api_key", "CONJUR_AUTHN_API_KEY"),
    ("conjur.cert_file", "CONJUR_CERT_FILE"),
];

impl Settings {
    /// Loads settings from the process environment and an optional file.
    pub fn load(file: Option<&Path>) -> Result<Self> {
        Self::load_with(file, |name| std::env::var(name).ok())
    }

    /// Like [`Settings::load`], reading `CONJUR_*` variables through `lookup`.
    pub fn load_with(
        file: Option<&Path>,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let mut builder = config::Config::builder()
            .add_source(config::Config::try_from(&Settings::default())?);

        if let Some(path) = file {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("PKIAAS")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        for (key, variable) in CONJUR_OVERRIDES {
            builder = builder.set_override_option(key, lookup(variable))?;
        }

        Ok(builder.build()?.try_deserialize()?)
    }
}
