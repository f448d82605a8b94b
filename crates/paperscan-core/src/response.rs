//! Turning a model's answer into [`PaperFields`].
//!
//! The model is asked for a JSON object with `author`, `year`, `title` and
//! `abstract`. JSON mode normally guarantees a bare object, so a direct parse
//! is the primary path. When a provider wraps the object in prose, the first
//! balanced `{...}` span is parsed instead and the fallback is logged.

use serde_json::{Map, Value};
use thiserror::Error;

use crate::{NOT_FOUND, PaperFields, or_not_found};

/// Maximum characters of a bad response echoed into the log.
const LOG_EXCERPT_CHARS: usize = 500;

/// Which strategy produced the parsed object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParsePath {
    Direct,
    Fallback,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ParseError {
    #[error("response is not valid JSON: {0}")]
    NotJson(String),
    #[error("response JSON is a {0}, not an object")]
    NotObject(&'static str),
}

/// Parse `text` into fields, reporting which path succeeded.
pub fn parse_response(text: &str) -> Result<(PaperFields, ParsePath), ParseError> {
    match serde_json::from_str::<Value>(text.trim()) {
        Ok(Value::Object(map)) => Ok((fields_from_object(&map), ParsePath::Direct)),
        Ok(other) => Err(ParseError::NotObject(kind(&other))),
        Err(direct_err) => match find_object_span(text)
            .and_then(|span| serde_json::from_str::<Value>(span).ok())
        {
            Some(Value::Object(map)) => Ok((fields_from_object(&map), ParsePath::Fallback)),
            _ => Err(ParseError::NotJson(direct_err.to_string())),
        },
    }
}

/// Parse `text` into fields, substituting the empty-sentinel record on failure.
pub fn fields_from_response(text: &str) -> PaperFields {
    match parse_response(text) {
        Ok((fields, ParsePath::Direct)) => {
            tracing::debug!("parsed response as bare JSON");
            fields
        }
        Ok((fields, ParsePath::Fallback)) => {
            tracing::warn!(
                excerpt = excerpt(text, LOG_EXCERPT_CHARS),
                "response was not bare JSON; recovered object from surrounding text"
            );
            fields
        }
        Err(e) => {
            tracing::error!(
                error = %e,
                excerpt = excerpt(text, LOG_EXCERPT_CHARS),
                "could not parse model response"
            );
            PaperFields::not_found()
        }
    }
}

fn fields_from_object(map: &Map<String, Value>) -> PaperFields {
    PaperFields {
        author: coerce(map.get("author")),
        year: coerce(map.get("year")),
        title: coerce(map.get("title")),
        abstract_text: coerce(map.get("abstract")),
    }
}

/// Render a JSON value as a trimmed string; null, absent and blank become [`NOT_FOUND`].
fn coerce(value: Option<&Value>) -> String {
    let raw = match value {
        None | Some(Value::Null) => return NOT_FOUND.to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(items)) => items
            .iter()
            .filter(|v| !v.is_null())
            .map(|v| coerce(Some(v)))
            .filter(|s| s != NOT_FOUND)
            .collect::<Vec<_>>()
            .join(", "),
        Some(other) => other.to_string(),
    };
    or_not_found(raw)
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Locate the first balanced `{...}` span, ignoring braces inside strings.
fn find_object_span(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in text[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + c.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    None
}

/// The first `max_chars` characters of `s`.
pub fn excerpt(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_json_yields_sentinel() {
        assert_eq!(fields_from_response("not a json"), PaperFields::not_found());
    }

    #[test]
    fn missing_keys_default_and_numbers_coerce() {
        let fields = fields_from_response(r#"{"author":"A. Smith","year":2020}"#);
        assert_eq!(fields.author, "A. Smith");
        assert_eq!(fields.year, "2020");
        assert_eq!(fields.title, NOT_FOUND);
        assert_eq!(fields.abstract_text, NOT_FOUND);
    }

    #[test]
    fn values_are_trimmed_and_null_defaults() {
        let (fields, path) = parse_response(
            r#"{"author":"  J. Doe ","year":null,"title":"\n A Title\t","abstract":""}"#,
        )
        .unwrap();
        assert_eq!(path, ParsePath::Direct);
        assert_eq!(fields.author, "J. Doe");
        assert_eq!(fields.year, NOT_FOUND);
        assert_eq!(fields.title, "A Title");
        assert_eq!(fields.abstract_text, NOT_FOUND);
    }

    #[test]
    fn author_list_is_joined() {
        let (fields, _) = parse_response(r#"{"author":["Ada Lovelace","Alan Turing"]}"#).unwrap();
        assert_eq!(fields.author, "Ada Lovelace, Alan Turing");
    }

    #[test]
    fn non_object_json_is_error() {
        assert_eq!(
            parse_response("[1, 2, 3]"),
            Err(ParseError::NotObject("array"))
        );
        assert_eq!(fields_from_response("\"just a string\""), PaperFields::not_found());
    }

    #[test]
    fn object_inside_prose_uses_fallback() {
        let text = "Sure! Here is the data:\n```json\n{\"title\": \"Deep {Nets}\", \"year\": \"1999\"}\n```";
        let (fields, path) = parse_response(text).unwrap();
        assert_eq!(path, ParsePath::Fallback);
        assert_eq!(fields.title, "Deep {Nets}");
        assert_eq!(fields.year, "1999");
    }

    #[test]
    fn unbalanced_braces_are_error() {
        assert!(matches!(
            parse_response("prefix {\"title\": \"x\""),
            Err(ParseError::NotJson(_))
        ));
    }

    #[test]
    fn span_ignores_escaped_quotes() {
        let text = r#"noise {"title": "a \"quoted\" }"} trailing"#;
        assert_eq!(
            find_object_span(text),
            Some(r#"{"title": "a \"quoted\" }"}"#)
        );
    }

    #[test]
    fn excerpt_respects_char_boundaries() {
        assert_eq!(excerpt("héllo", 2), "hé");
        assert_eq!(excerpt("abc", 10), "abc");
    }
}
