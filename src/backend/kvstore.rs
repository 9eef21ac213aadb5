//! Embedded key-value engine
//!
//! A flat keyspace of typed structures (strings, hashes, sorted sets) with
//! glob-style key enumeration, mirroring the command surface of a
//! production key-value store. The key-value adapter composes its own key
//! shapes on top; this engine knows nothing about paths or fragments.

use super::EngineError;
use parking_lot::RwLock;
use std::collections::BTreeMap;

enum KvValue {
    Str(String),
    Hash(BTreeMap<String, String>),
    /// member -> score
    Zset(BTreeMap<String, i64>),
}

impl KvValue {
    fn type_name(&self) -> &'static str {
        match self {
            KvValue::Str(_) => "string",
            KvValue::Hash(_) => "hash",
            KvValue::Zset(_) => "zset",
        }
    }
}

/// Glob match where `*` spans any run of characters.
fn glob_match(pattern: &str, input: &str) -> bool {
    fn rec(pattern: &[u8], input: &[u8]) -> bool {
        match pattern.split_first() {
            None => input.is_empty(),
            Some((b'*', rest)) => {
                (0..=input.len()).any(|skip| rec(rest, &input[skip..]))
            }
            Some((c, rest)) => match input.split_first() {
                Some((head, input_rest)) => c == head && rec(rest, input_rest),
                None => false,
            },
        }
    }
    rec(pattern.as_bytes(), input.as_bytes())
}

/// One embedded engine instance, shared behind an `Arc` by all adapters
/// connected to its endpoint.
pub struct KvEngine {
    endpoint: String,
    data: RwLock<BTreeMap<String, KvValue>>,
}

impl KvEngine {
    pub fn new(endpoint: &str) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            data: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Type of the structure at `key`, or "none"
    pub fn type_of(&self, key: &str) -> &'static str {
        self.data
            .read()
            .get(key)
            .map(KvValue::type_name)
            .unwrap_or("none")
    }

    pub fn set(&self, key: &str, value: &str) {
        self.data
            .write()
            .insert(key.to_string(), KvValue::Str(value.to_string()));
    }

    pub fn get(&self, key: &str) -> Option<String> {
        match self.data.read().get(key) {
            Some(KvValue::Str(v)) => Some(v.clone()),
            _ => None,
        }
    }

    /// All keys matching a glob pattern, sorted
    pub fn keys(&self, pattern: &str) -> Vec<String> {
        self.data
            .read()
            .keys()
            .filter(|key| glob_match(pattern, key))
            .cloned()
            .collect()
    }

    /// Delete whole keys; returns how many existed
    pub fn del(&self, keys: &[String]) -> usize {
        let mut data = self.data.write();
        keys.iter().filter(|key| data.remove(*key).is_some()).count()
    }

    // ── Hashes ───────────────────────────────────────────────────────

    pub fn hset(&self, key: &str, entries: &[(String, String)]) -> Result<(), EngineError> {
        let mut data = self.data.write();
        let value = data
            .entry(key.to_string())
            .or_insert_with(|| KvValue::Hash(BTreeMap::new()));
        match value {
            KvValue::Hash(hash) => {
                for (field, value) in entries {
                    hash.insert(field.clone(), value.clone());
                }
                Ok(())
            }
            _ => Err(EngineError::WrongType { key: key.to_string(), expected: "hash" }),
        }
    }

    pub fn hget(&self, key: &str, field: &str) -> Option<String> {
        match self.data.read().get(key) {
            Some(KvValue::Hash(hash)) => hash.get(field).cloned(),
            _ => None,
        }
    }

    pub fn hgetall(&self, key: &str) -> BTreeMap<String, String> {
        match self.data.read().get(key) {
            Some(KvValue::Hash(hash)) => hash.clone(),
            _ => BTreeMap::new(),
        }
    }

    pub fn hdel(&self, key: &str, fields: &[String]) -> usize {
        let mut data = self.data.write();
        match data.get_mut(key) {
            Some(KvValue::Hash(hash)) => {
                let removed = fields.iter().filter(|f| hash.remove(*f).is_some()).count();
                if hash.is_empty() {
                    data.remove(key);
                }
                removed
            }
            _ => 0,
        }
    }

    pub fn hlen(&self, key: &str) -> usize {
        match self.data.read().get(key) {
            Some(KvValue::Hash(hash)) => hash.len(),
            _ => 0,
        }
    }

    // ── Sorted sets ──────────────────────────────────────────────────

    pub fn zadd(&self, key: &str, entries: &[(String, i64)]) -> Result<(), EngineError> {
        let mut data = self.data.write();
        let value = data
            .entry(key.to_string())
            .or_insert_with(|| KvValue::Zset(BTreeMap::new()));
        match value {
            KvValue::Zset(zset) => {
                for (member, score) in entries {
                    zset.insert(member.clone(), *score);
                }
                Ok(())
            }
            _ => Err(EngineError::WrongType { key: key.to_string(), expected: "zset" }),
        }
    }

    /// Members with `min <= score <= max`, ordered by score then member
    pub fn zrange_by_score(&self, key: &str, min: i64, max: i64) -> Vec<String> {
        match self.data.read().get(key) {
            Some(KvValue::Zset(zset)) => {
                let mut members: Vec<(&i64, &String)> = zset
                    .iter()
                    .filter(|(_, score)| **score >= min && **score <= max)
                    .map(|(member, score)| (score, member))
                    .collect();
                members.sort();
                members.into_iter().map(|(_, member)| member.clone()).collect()
            }
            _ => Vec::new(),
        }
    }

    pub fn zremrange_by_score(&self, key: &str, min: i64, max: i64) -> usize {
        let mut data = self.data.write();
        match data.get_mut(key) {
            Some(KvValue::Zset(zset)) => {
                let before = zset.len();
                zset.retain(|_, score| *score < min || *score > max);
                let removed = before - zset.len();
                if zset.is_empty() {
                    data.remove(key);
                }
                removed
            }
            _ => 0,
        }
    }

    pub fn zcard(&self, key: &str) -> usize {
        match self.data.read().get(key) {
            Some(KvValue::Zset(zset)) => zset.len(),
            _ => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_glob_match() {
        assert!(glob_match("keys:u:*", "keys:u:root.a"));
        assert!(glob_match("*", "anything"));
        assert!(glob_match("a*c", "abc"));
        assert!(glob_match("a*c", "ac"));
        assert!(!glob_match("a*c", "abd"));
        assert!(!glob_match("abc", "ab"));
    }

    #[test]
    fn test_hash_round_trip() {
        let engine = KvEngine::new("memory://kv");
        engine
            .hset("values:u:p", &[("100".into(), "1.5".into()), ("200".into(), "2.5".into())])
            .unwrap();
        assert_eq!(engine.hget("values:u:p", "100"), Some("1.5".to_string()));
        assert_eq!(engine.hlen("values:u:p"), 2);
        assert_eq!(engine.hdel("values:u:p", &["100".to_string()]), 1);
        assert_eq!(engine.hlen("values:u:p"), 1);
    }

    #[test]
    fn test_zset_range_scan() {
        let engine = KvEngine::new("memory://kv");
        engine
            .zadd(
                "keys:u:p",
                &[("100".into(), 100), ("200".into(), 200), ("300".into(), 300)],
            )
            .unwrap();
        assert_eq!(engine.zrange_by_score("keys:u:p", 100, 200), vec!["100", "200"]);
        assert_eq!(engine.zremrange_by_score("keys:u:p", 0, 150), 1);
        assert_eq!(engine.zcard("keys:u:p"), 2);
    }

    #[test]
    fn test_wrong_type_rejected() {
        let engine = KvEngine::new("memory://kv");
        engine.zadd("k", &[("1".into(), 1)]).unwrap();
        assert!(matches!(
            engine.hset("k", &[("a".into(), "b".into())]),
            Err(EngineError::WrongType { .. })
        ));
        assert_eq!(engine.type_of("k"), "zset");
        assert_eq!(engine.type_of("missing"), "none");
    }

    #[test]
    fn test_keys_and_del() {
        let engine = KvEngine::new("memory://kv");
        engine.set("a:1", "x");
        engine.set("a:2", "y");
        engine.set("b:1", "z");
        assert_eq!(engine.keys("a:*"), vec!["a:1", "a:2"]);
        assert_eq!(engine.del(&["a:1".to_string(), "a:2".to_string()]), 2);
        assert_eq!(engine.keys("a:*"), Vec::<String>::new());
    }

    #[test]
    fn test_empty_structures_are_reaped() {
        let engine = KvEngine::new("memory://kv");
        engine.hset("h", &[("f".into(), "v".into())]).unwrap();
        engine.hdel("h", &["f".to_string()]);
        assert_eq!(engine.type_of("h"), "none");
    }
}
