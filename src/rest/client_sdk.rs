//! Client SDK identification from the client version header

/// SDK name and version, e.g. `js1.9.2` -> (`js`, `1.9.2`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSdk {
    pub sdk: String,
    pub version: String,
}

impl ClientSdk {
    /// Parse a version string; the SDK name is the leading alphabetic part
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        let split = raw.find(|c: char| c.is_ascii_digit())?;
        let (sdk, version) = raw.split_at(split);
        if sdk.is_empty() {
            return None;
        }
        Some(Self {
            sdk: sdk.to_string(),
            version: version.to_string(),
        })
    }

    fn version_parts(&self) -> Vec<u64> {
        self.version
            .split('.')
            .map(|part| {
                part.chars()
                    .take_while(char::is_ascii_digit)
                    .collect::<String>()
                    .parse()
                    .unwrap_or(0)
            })
            .collect()
    }

    /// At least the given version of the named SDK
    pub fn is_at_least(&self, sdk: &str, min: &[u64]) -> bool {
        if self.sdk != sdk {
            return false;
        }
        let parts = self.version_parts();
        for (i, wanted) in min.iter().enumerate() {
            let have = parts.get(i).copied().unwrap_or(0);
            if have != *wanted {
                return have > *wanted;
            }
        }
        true
    }

    /// Whether the SDK understands a `{"__op": "Delete"}` in a save response.
    ///
    /// Clients without it are not told about fields a hook removed.
    pub fn supports_forward_delete(client: Option<&ClientSdk>) -> bool {
        client.map(|c| c.is_at_least("js", &[1, 9, 0])).unwrap_or(false)
    }
}
