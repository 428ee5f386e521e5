// Entry Point Domain Model
//
// A loaded code module exposes a registry of named entry points. Selection
// is an explicit rule over parameter shapes rather than export order.

use serde_json::Value;
use std::fmt;

/// Parameter shape accepted by an entry point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamShape {
    /// No parameter
    None,
    /// One structured JSON element
    Element,
    /// One raw JSON document
    Document,
    /// One UTF-8 string
    Text,
}

impl ParamShape {
    /// Priority order when a payload is present
    pub const PAYLOAD_PRIORITY: [ParamShape; 4] = [
        ParamShape::Element,
        ParamShape::Document,
        ParamShape::Text,
        ParamShape::None,
    ];

    /// Encode the payload for this shape (None for zero-parameter entries)
    pub fn encode(self, payload: Option<&Value>) -> Result<Option<Vec<u8>>, serde_json::Error> {
        let Some(payload) = payload else {
            return Ok(None);
        };

        match self {
            ParamShape::None => Ok(None),
            ParamShape::Element | ParamShape::Document => serde_json::to_vec(payload).map(Some),
            ParamShape::Text => match payload {
                Value::String(s) => Ok(Some(s.as_bytes().to_vec())),
                other => serde_json::to_vec(other).map(Some),
            },
        }
    }
}

impl fmt::Display for ParamShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamShape::None => write!(f, "none"),
            ParamShape::Element => write!(f, "element"),
            ParamShape::Document => write!(f, "document"),
            ParamShape::Text => write!(f, "text"),
        }
    }
}

/// How an entry point is bound to its module
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Receiver {
    /// Callable without constructing module state
    Static,
    /// Needs module state; `constructible` is false when no parameterless
    /// constructor exists
    Instance { constructible: bool },
}

impl Receiver {
    pub fn is_callable(self) -> bool {
        match self {
            Receiver::Static => true,
            Receiver::Instance { constructible } => constructible,
        }
    }
}

/// One invocable entry point exposed by a loaded module
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryPoint {
    /// Exported symbol
    pub export: String,
    /// Name callers use to address it
    pub name: String,
    pub shape: ParamShape,
    pub receiver: Receiver,
}

/// Pick the entry point to invoke for `name`
///
/// With a payload: element > document > text > zero-parameter.
/// Without a payload: zero-parameter only. Candidates whose receiver cannot
/// be constructed are skipped.
pub fn select_entry_point<'a>(
    candidates: &'a [EntryPoint],
    name: &str,
    has_payload: bool,
) -> Option<&'a EntryPoint> {
    let order: &[ParamShape] = if has_payload {
        &ParamShape::PAYLOAD_PRIORITY
    } else {
        &[ParamShape::None]
    };

    order.iter().find_map(|shape| {
        candidates
            .iter()
            .find(|c| c.name == name && c.shape == *shape && c.receiver.is_callable())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(name: &str, shape: ParamShape) -> EntryPoint {
        EntryPoint {
            export: format!("{}${}", name, shape),
            name: name.to_string(),
            shape,
            receiver: Receiver::Static,
        }
    }

    #[test]
    fn test_prefers_element_over_others() {
        let candidates = vec![
            entry("run", ParamShape::None),
            entry("run", ParamShape::Text),
            entry("run", ParamShape::Document),
            entry("run", ParamShape::Element),
        ];
        let picked = select_entry_point(&candidates, "run", true).unwrap();
        assert_eq!(picked.shape, ParamShape::Element);
    }

    #[test]
    fn test_falls_through_priority() {
        let candidates = vec![entry("run", ParamShape::None), entry("run", ParamShape::Text)];
        let picked = select_entry_point(&candidates, "run", true).unwrap();
        assert_eq!(picked.shape, ParamShape::Text);

        let candidates = vec![entry("run", ParamShape::None)];
        let picked = select_entry_point(&candidates, "run", true).unwrap();
        assert_eq!(picked.shape, ParamShape::None);
    }

    #[test]
    fn test_no_payload_needs_zero_parameter() {
        let candidates = vec![entry("run", ParamShape::Element)];
        assert!(select_entry_point(&candidates, "run", false).is_none());

        let candidates = vec![entry("run", ParamShape::Element), entry("run", ParamShape::None)];
        let picked = select_entry_point(&candidates, "run", false).unwrap();
        assert_eq!(picked.shape, ParamShape::None);
    }

    #[test]
    fn test_name_must_match_exactly() {
        let candidates = vec![entry("Run", ParamShape::None), entry("run2", ParamShape::None)];
        assert!(select_entry_point(&candidates, "run", false).is_none());
    }

    #[test]
    fn test_skips_unconstructible_instance() {
        let mut element = entry("run", ParamShape::Element);
        element.receiver = Receiver::Instance {
            constructible: false,
        };
        let candidates = vec![element, entry("run", ParamShape::Text)];
        let picked = select_entry_point(&candidates, "run", true).unwrap();
        assert_eq!(picked.shape, ParamShape::Text);
    }

    #[test]
    fn test_text_encoding_uses_string_value() {
        let bytes = ParamShape::Text.encode(Some(&json!("hello"))).unwrap();
        assert_eq!(bytes.unwrap(), b"hello");

        let bytes = ParamShape::Text.encode(Some(&json!({"a": 1}))).unwrap();
        assert_eq!(bytes.unwrap(), br#"{"a":1}"#);
    }

    #[test]
    fn test_zero_parameter_encodes_nothing() {
        assert!(ParamShape::None.encode(Some(&json!(1))).unwrap().is_none());
        assert!(ParamShape::Element.encode(None).unwrap().is_none());
    }
}
