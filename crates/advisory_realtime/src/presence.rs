use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

/// One participant key with its metas (one per open connection).
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PresenceEntry {
    pub key: String,
    pub metas: Vec<Value>,
}

/// Presence roster for a single channel.
#[derive(Debug, Clone, Default)]
pub struct PresenceSet {
    entries: BTreeMap<String, Vec<Value>>,
}

fn phx_ref(meta: &Value) -> Option<&str> {
    meta.get("phx_ref").and_then(Value::as_str)
}

fn parse_state(state: &Value) -> Result<BTreeMap<String, Vec<Value>>, String> {
    let object = match state {
        Value::Object(object) => object,
        Value::Null => return Ok(BTreeMap::new()),
        _ => return Err("presence state is not an object".to_string()),
    };

    object
        .iter()
        .map(|(key, entry)| {
            let metas = entry
                .get("metas")
                .and_then(Value::as_array)
                .ok_or_else(|| format!("presence entry {key} has no metas"))?;
            Ok::<_, String>((key.clone(), metas.clone()))
        })
        .collect()
}

impl PresenceSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the roster with a full `presence_state` snapshot. Keys with
    /// no open connection are left out.
    pub fn sync(&mut self, state: &Value) -> Result<(), String> {
        self.entries = parse_state(state)?
            .into_iter()
            .filter(|(_, metas)| !metas.is_empty())
            .collect();
        Ok(())
    }

    /// Applies a `presence_diff`, returning the joined and left entries.
    pub fn apply_diff(
        &mut self,
        diff: &Value,
    ) -> Result<(Vec<PresenceEntry>, Vec<PresenceEntry>), String> {
        let joins = parse_state(diff.get("joins").unwrap_or(&Value::Null))?;
        let leaves = parse_state(diff.get("leaves").unwrap_or(&Value::Null))?;

        let mut joined = Vec::with_capacity(joins.len());
        for (key, metas) in joins {
            if metas.is_empty() {
                continue;
            }
            let current = self.entries.entry(key.clone()).or_default();
            for meta in &metas {
                match phx_ref(meta) {
                    Some(reference) => current.retain(|existing| phx_ref(existing) != Some(reference)),
                    None => current.retain(|existing| existing != meta),
                }
                current.push(meta.clone());
            }
            joined.push(PresenceEntry { key, metas });
        }

        let mut left = Vec::with_capacity(leaves.len());
        for (key, metas) in leaves {
            if let Some(current) = self.entries.get_mut(&key) {
                current.retain(|existing| {
                    !metas.iter().any(|meta| match (phx_ref(meta), phx_ref(existing)) {
                        (Some(gone), Some(present)) => gone == present,
                        _ => meta == existing,
                    })
                });
                if current.is_empty() {
                    self.entries.remove(&key);
                }
            }
            left.push(PresenceEntry { key, metas });
        }

        Ok((joined, left))
    }

    pub fn entries(&self) -> Vec<PresenceEntry> {
        self.entries
            .iter()
            .map(|(key, metas)| PresenceEntry {
                key: key.clone(),
                metas: metas.clone(),
            })
            .collect()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
