//! Minimal JSON path resolution: `$.a.b.c`, `$.a[0].b`, `$["a"]["b"]`.
//!
//! Covers the subset the task config format actually uses. No filters,
//! wildcards, or recursive descent.

use serde_json::Value;

#[derive(Debug, PartialEq, Eq)]
enum Segment {
    Key(String),
    Index(usize),
}

/// Resolve `path` against `value`, returning `None` if any segment fails to
/// traverse (missing key, out-of-range index, or traversal through a
/// non-object/non-array). Never panics.
pub fn resolve<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let segments = parse(path)?;
    let mut current = value;
    for seg in segments {
        current = match (&seg, current) {
            (Segment::Key(k), Value::Object(map)) => map.get(k)?,
            (Segment::Index(i), Value::Array(arr)) => arr.get(*i)?,
            _ => return None,
        };
    }
    Some(current)
}

fn parse(path: &str) -> Option<Vec<Segment>> {
    let path = path.strip_prefix('$').unwrap_or(path);
    let mut segments = Vec::new();
    let mut chars = path.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            '.' => {
                chars.next();
            }
            '[' => {
                chars.next();
                let mut token = String::new();
                let mut quoted = false;
                if chars.peek() == Some(&'"') || chars.peek() == Some(&'\'') {
                    quoted = true;
                    chars.next();
                }
                for c2 in chars.by_ref() {
                    if (quoted && (c2 == '"' || c2 == '\'')) || (!quoted && c2 == ']') {
                        break;
                    }
                    token.push(c2);
                }
                if quoted {
                    // consume the closing ']'
                    while chars.peek() != Some(&']') && chars.peek().is_some() {
                        chars.next();
                    }
                    chars.next();
                    segments.push(Segment::Key(token));
                } else if let Ok(idx) = token.parse::<usize>() {
                    segments.push(Segment::Index(idx));
                } else {
                    return None;
                }
            }
            _ => {
                let mut token = String::new();
                while let Some(&c2) = chars.peek() {
                    if c2 == '.' || c2 == '[' {
                        break;
                    }
                    token.push(c2);
                    chars.next();
                }
                if token.is_empty() {
                    return None;
                }
                segments.push(Segment::Key(token));
            }
        }
    }

    Some(segments)
}

/// Stringify a resolved JSON value the way the evaluator compares it against
/// `json_path_value`. Strings are unquoted; other scalars use their JSON
/// literal form (`true`/`false`/`null`, numbers as written).
pub fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_owned(),
        Value::Bool(b) => b.to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn resolves_dot_path() {
        let v = json!({"slideshow": {"author": "Yours Truly"}});
        let r = resolve(&v, "$.slideshow.author").unwrap();
        assert_eq!(stringify(r), "Yours Truly");
    }

    #[test]
    fn resolves_bracket_index() {
        let v = json!({"a": [{"b": 1}, {"b": 2}]});
        let r = resolve(&v, "$.a[1].b").unwrap();
        assert_eq!(stringify(r), "2");
    }

    #[test]
    fn resolves_quoted_bracket_key() {
        let v = json!({"a": {"b": "x"}});
        let r = resolve(&v, "$[\"a\"][\"b\"]").unwrap();
        assert_eq!(stringify(r), "x");
    }

    #[test]
    fn missing_key_yields_none() {
        let v = json!({"a": 1});
        assert!(resolve(&v, "$.b").is_none());
    }

    #[test]
    fn index_out_of_range_yields_none() {
        let v = json!({"a": [1]});
        assert!(resolve(&v, "$.a[5]").is_none());
    }

    #[test]
    fn traversal_through_scalar_yields_none() {
        let v = json!({"a": 1});
        assert!(resolve(&v, "$.a.b").is_none());
    }

    #[test]
    fn null_stringifies_to_literal() {
        let v = json!({"a": null});
        let r = resolve(&v, "$.a").unwrap();
        assert_eq!(stringify(r), "null");
    }
}
