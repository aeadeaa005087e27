//! Config mutations applied to a copy of a file's body

use std::fmt;
use toml::Value;
use toml_edit::{Array, DocumentMut, InlineTable, Item, Table, TableLike, Value as EditValue};

/// A proposed change to every selected config file
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    /// Set a dotted field path (e.g. `auth.token`, `proxies.0.localPort`)
    SetField { path: String, value: Value },
    /// Replace the whole body
    Replace { body: String },
}

impl Mutation {
    /// Build a field mutation, reading `raw` as a TOML literal when it is one
    /// (integer, float, boolean, array, quoted string) and as a bare string otherwise.
    pub fn set_field(path: impl Into<String>, raw: &str) -> Self {
        Self::SetField {
            path: path.into(),
            value: parse_value(raw),
        }
    }

    pub fn replace(body: impl Into<String>) -> Self {
        Self::Replace { body: body.into() }
    }

    /// Apply the mutation to `body`, returning the new body.
    ///
    /// Field updates touch only the target value; comments, key order and
    /// layout elsewhere in the file are kept.
    ///
    /// The error is a human-readable reason; callers record it against the
    /// file rather than aborting.
    pub fn apply(&self, body: &str) -> Result<String, String> {
        match self {
            Self::Replace { body } => Ok(body.clone()),
            Self::SetField { path, value } => {
                let mut doc: DocumentMut = body
                    .parse()
                    .map_err(|e: toml_edit::TomlError| format!("cannot parse TOML: {}", e.message()))?;
                set_path(&mut doc, path, to_edit_value(value))?;
                Ok(doc.to_string())
            }
        }
    }
}

impl fmt::Display for Mutation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SetField { path, value } => write!(f, "set {path} = {value}"),
            Self::Replace { body } => write!(f, "replace body ({} bytes)", body.len()),
        }
    }
}

fn parse_value(raw: &str) -> Value {
    let wrapped = format!("value = {raw}");
    match wrapped.parse::<toml::Table>().ok().and_then(|mut t| t.remove("value")) {
        Some(value @ (Value::Integer(_) | Value::Float(_) | Value::Boolean(_) | Value::Array(_) | Value::String(_))) => value,
        _ => Value::String(raw.to_string()),
    }
}

fn set_path(doc: &mut DocumentMut, path: &str, value: EditValue) -> Result<(), String> {
    let segments: Vec<&str> = path.split('.').map(str::trim).collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(format!("invalid field path '{path}'"));
    }
    set_in_table(doc.as_table_mut(), false, &segments, "", value)
}

/// Set `segments` below `table`, creating missing tables. `at` is the dotted
/// path of `table` itself, empty for the document root.
fn set_in_table(
    table: &mut dyn TableLike,
    inline: bool,
    segments: &[&str],
    at: &str,
    value: EditValue,
) -> Result<(), String> {
    let Some((key, rest)) = segments.split_first() else {
        return Err(format!("invalid field path '{at}'"));
    };
    let here = if at.is_empty() { (*key).to_string() } else { format!("{at}.{key}") };

    if rest.is_empty() {
        match table.get_mut(key) {
            Some(Item::Value(existing)) => {
                // Keep the comments and spacing around the old value
                let decor = existing.decor().clone();
                *existing = value;
                *existing.decor_mut() = decor;
            }
            _ => {
                table.insert(key, Item::Value(value));
            }
        }
        return Ok(());
    }

    if !table.contains_key(key) {
        let child = if inline {
            Item::Value(EditValue::InlineTable(InlineTable::new()))
        } else {
            let mut created = Table::new();
            created.set_implicit(true);
            Item::Table(created)
        };
        table.insert(key, child);
    }

    let child = table
        .get_mut(key)
        .ok_or_else(|| format!("{here} could not be created"))?;
    set_in_item(child, rest, &here, value)
}

fn set_in_item(item: &mut Item, segments: &[&str], at: &str, value: EditValue) -> Result<(), String> {
    match item {
        Item::Table(table) => set_in_table(table, false, segments, at, value),
        Item::ArrayOfTables(tables) => {
            let (index, rest) = array_index(segments, at)?;
            if rest.is_empty() {
                return Err(format!("{at}.{index} is a table"));
            }
            let table = tables
                .get_mut(index)
                .ok_or_else(|| format!("{at} has no element {index}"))?;
            set_in_table(table, false, rest, &format!("{at}.{index}"), value)
        }
        Item::Value(inner) => set_in_value(inner, segments, at, value),
        Item::None => Err(format!("{at} is not a table")),
    }
}

fn set_in_value(current: &mut EditValue, segments: &[&str], at: &str, value: EditValue) -> Result<(), String> {
    match current {
        EditValue::InlineTable(table) => set_in_table(table, true, segments, at, value),
        EditValue::Array(items) => {
            let (index, rest) = array_index(segments, at)?;
            let slot = items
                .get_mut(index)
                .ok_or_else(|| format!("{at} has no element {index}"))?;
            if rest.is_empty() {
                let decor = slot.decor().clone();
                *slot = value;
                *slot.decor_mut() = decor;
                return Ok(());
            }
            set_in_value(slot, rest, &format!("{at}.{index}"), value)
        }
        _ => Err(format!("{at} is not a table")),
    }
}

fn array_index<'s>(segments: &'s [&'s str], at: &str) -> Result<(usize, &'s [&'s str]), String> {
    let Some((segment, rest)) = segments.split_first() else {
        return Err(format!("invalid field path '{at}'"));
    };
    let index = segment
        .parse()
        .map_err(|_| format!("{at} is an array; '{segment}' is not an index"))?;
    Ok((index, rest))
}

/// Carry a parsed literal over to the format-preserving document model
fn to_edit_value(value: &Value) -> EditValue {
    match value {
        Value::String(s) => s.as_str().into(),
        Value::Integer(i) => (*i).into(),
        Value::Float(f) => (*f).into(),
        Value::Boolean(b) => (*b).into(),
        Value::Datetime(dt) => dt
            .to_string()
            .parse::<EditValue>()
            .unwrap_or_else(|_| dt.to_string().into()),
        Value::Array(items) => items.iter().map(to_edit_value).collect::<Array>().into(),
        Value::Table(table) => table
            .iter()
            .map(|(k, v)| (k.as_str(), to_edit_value(v)))
            .collect::<InlineTable>()
            .into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CLIENT: &str = r#"
serverAddr = "203.0.113.10"
serverPort = 7000

[auth]
token = "old"

[[proxies]]
name = "ssh"
type = "tcp"
localPort = 22
"#;

    fn parsed(body: &str) -> toml::Table {
        body.parse().unwrap()
    }

    #[test]
    fn test_set_existing_nested_field() {
        let out = Mutation::set_field("auth.token", "s3cret").apply(CLIENT).unwrap();
        let doc = parsed(&out);
        assert_eq!(doc["auth"]["token"].as_str(), Some("s3cret"));
        assert_eq!(doc["serverPort"].as_integer(), Some(7000));
    }

    #[test]
    fn test_set_top_level_integer() {
        let out = Mutation::set_field("serverPort", "7100").apply(CLIENT).unwrap();
        assert_eq!(parsed(&out)["serverPort"].as_integer(), Some(7100));
    }

    #[test]
    fn test_creates_missing_tables() {
        let out = Mutation::set_field("transport.tls.enable", "true").apply(CLIENT).unwrap();
        assert_eq!(parsed(&out)["transport"]["tls"]["enable"].as_bool(), Some(true));
    }

    #[test]
    fn test_array_index_path() {
        let out = Mutation::set_field("proxies.0.localPort", "2222").apply(CLIENT).unwrap();
        assert_eq!(parsed(&out)["proxies"][0]["localPort"].as_integer(), Some(2222));

        let err = Mutation::set_field("proxies.4.localPort", "1").apply(CLIENT).unwrap_err();
        assert!(err.contains("no element 4"));
    }

    #[test]
    fn test_comments_and_key_order_survive() {
        let body = r#"# EU edge node, managed by ops
serverPort = 7000
serverAddr = "203.0.113.10"

[auth]
token = "old" # rotated quarterly
"#;
        let out = Mutation::set_field("auth.token", "new").apply(body).unwrap();
        assert_eq!(out, body.replace("\"old\"", "\"new\""));
    }

    #[test]
    fn test_new_nested_table_is_appended() {
        let out = Mutation::set_field("transport.tls.enable", "true").apply(CLIENT).unwrap();
        let proxies = out.find("[[proxies]]").unwrap();
        let tls = out.find("[transport.tls]\nenable = true").unwrap();
        assert!(proxies < tls, "{out}");
        assert!(out.contains("[auth]\ntoken = \"old\""), "{out}");
    }

    #[test]
    fn test_inline_array_element() {
        let body = "ports = [7000, 7001] # public\n";
        let out = Mutation::set_field("ports.1", "7101").apply(body).unwrap();
        assert_eq!(out, "ports = [7000, 7101] # public\n");
    }

    #[test]
    fn test_scalar_in_the_way() {
        let err = Mutation::set_field("serverAddr.host", "x").apply(CLIENT).unwrap_err();
        assert!(err.contains("serverAddr is not a table"), "{err}");
    }

    #[test]
    fn test_unparseable_body_is_reason_not_panic() {
        let err = Mutation::set_field("auth.token", "x").apply("serverAddr = ").unwrap_err();
        assert!(err.starts_with("cannot parse TOML"));
    }

    #[test]
    fn test_value_literals() {
        assert_eq!(parse_value("42"), Value::Integer(42));
        assert_eq!(parse_value("false"), Value::Boolean(false));
        assert_eq!(parse_value("\"quoted\""), Value::String("quoted".into()));
        assert_eq!(parse_value("1.2.3.4"), Value::String("1.2.3.4".into()));
        assert_eq!(parse_value("plain token"), Value::String("plain token".into()));
    }

    #[test]
    fn test_invalid_path() {
        assert!(Mutation::set_field("auth..token", "x").apply(CLIENT).is_err());
    }

    #[test]
    fn test_replace_ignores_original() {
        let out = Mutation::replace("bindPort = 7000\n").apply("garbage [[[").unwrap();
        assert_eq!(out, "bindPort = 7000\n");
    }
}
