//! Line-oriented `server.properties` codec.
//!
//! Values stay as strings; the file format is untyped `key=value` lines
//! with `#` comments. Insertion order is preserved so an edited file
//! round-trips without reshuffling.

use std::fmt::{self, Display};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerProperties {
    entries: Vec<(String, String)>,
}

impl ServerProperties {
    /// Parse file contents. Comment and blank lines are skipped, as are
    /// lines without a `=` separator.
    pub fn parse(input: &str) -> Self {
        let mut entries = Vec::new();

        for line in input.lines() {
            let line = line.trim_end();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                entries.push((key.to_string(), value.to_string()));
            }
        }

        Self { entries }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn set<K: Into<String>, V: Into<String>>(&mut self, key: K, value: V) {
        let key = key.into();
        let value = value.into();

        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Display for ServerProperties {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (key, value) in &self.entries {
            writeln!(f, "{key}={value}")?;
        }
        Ok(())
    }
}

/// Seed properties for a freshly created server.
pub fn defaults(name: &str) -> ServerProperties {
    let mut props = ServerProperties::default();
    props.set("motd", format!("A fuji Minecraft server: {name}"));
    props.set("server-port", "25565");
    props.set("max-players", "20");
    props.set("online-mode", "true");
    props.set("view-distance", "10");
    props
}
