//! Helpers for editing the in-memory configuration tree.

use toml::{Table, Value};

use plughost_core::{AppError, AppResult};

/// Splits a dotted key into its segments, rejecting empty segments.
pub fn split_key(key: &str) -> AppResult<Vec<String>> {
    let segments: Vec<String> = key.split('.').map(str::to_string).collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(AppError::configuration(format!("Invalid key '{key}'")));
    }
    Ok(segments)
}

/// Sets `value` at `keys`, creating intermediate tables as needed.
///
/// Fails if an intermediate key already holds a non-table value.
pub fn set_path(tree: &mut Table, keys: &[String], value: Value) -> AppResult<()> {
    let Some((last, parents)) = keys.split_last() else {
        return Err(AppError::configuration("Empty key path"));
    };

    let mut table = tree;
    for key in parents {
        let entry = table
            .entry(key.clone())
            .or_insert(Value::Table(Table::new()));
        table = match entry {
            Value::Table(inner) => inner,
            other => {
                return Err(AppError::configuration(format!(
                    "Key '{key}' holds a {} and cannot contain '{last}'",
                    other.type_str()
                )));
            }
        };
    }

    table.insert(last.clone(), value);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(path: &[&str]) -> Vec<String> {
        path.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_set_creates_tables() {
        let mut tree = Table::new();
        set_path(&mut tree, &keys(&["audit", "a", "b"]), Value::Integer(5)).unwrap();

        let rendered = toml::to_string(&tree).unwrap();
        let reparsed: Table = rendered.parse().unwrap();
        assert_eq!(reparsed["audit"]["a"]["b"].as_integer(), Some(5));
    }

    #[test]
    fn test_set_overwrites_leaf() {
        let mut tree: Table = "[audit]\nlevel = 1\nname = \"x\"\n".parse().unwrap();
        set_path(&mut tree, &keys(&["audit", "level"]), Value::Integer(3)).unwrap();

        assert_eq!(tree["audit"]["level"].as_integer(), Some(3));
        assert_eq!(tree["audit"]["name"].as_str(), Some("x"));
    }

    #[test]
    fn test_set_through_scalar_fails() {
        let mut tree: Table = "[audit]\nlevel = 1\n".parse().unwrap();
        let err = set_path(&mut tree, &keys(&["audit", "level", "x"]), Value::Boolean(true))
            .unwrap_err();
        assert!(err.message.contains("level"));
        assert_eq!(tree["audit"]["level"].as_integer(), Some(1));
    }

    #[test]
    fn test_split_key() {
        assert_eq!(split_key("a.b").unwrap(), keys(&["a", "b"]));
        assert!(split_key("a..b").is_err());
        assert!(split_key("").is_err());
    }
}
