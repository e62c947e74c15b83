use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One STUN/TURN server entry as delivered by the lobby client via
/// `setIceServers`. Opaque to the adapter core; copied into every relay
/// created after it was set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IceServerConfig {
    pub url: Option<String>,
    #[serde(default)]
    pub urls: Vec<String>,
    pub username: Option<String>,
    pub credential: Option<String>,
}

impl IceServerConfig {
    /// Parse a `{url|urls[], username, credential}` object. Non-objects are
    /// rejected; missing fields default.
    pub fn from_json(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        let url = obj.get("url").and_then(Value::as_str).map(str::to_owned);
        let urls = obj
            .get("urls")
            .and_then(Value::as_array)
            .map(|a| {
                a.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_default();
        let username = obj
            .get("username")
            .and_then(Value::as_str)
            .map(str::to_owned);
        let credential = obj
            .get("credential")
            .and_then(Value::as_str)
            .map(str::to_owned);
        Some(Self {
            url,
            urls,
            username,
            credential,
        })
    }

    /// All usable URLs: `urls` when present, else the single `url`.
    pub fn all_urls(&self) -> Vec<String> {
        if !self.urls.is_empty() {
            self.urls.clone()
        } else {
            self.url.iter().cloned().collect()
        }
    }
}
