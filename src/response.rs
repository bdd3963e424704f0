use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::fmt;

/// One step into the response tree: an object key or an array index.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathElement {
    Key(String),
    Index(usize),
}

impl fmt::Display for PathElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathElement::Key(k) => write!(f, "{}", k),
            PathElement::Index(i) => write!(f, "{}", i),
        }
    }
}

/// Location of a value inside the response tree, serialized as the
/// GraphQL `path` array (strings for fields, integers for list indices).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Path(pub Vec<PathElement>);

impl Path {
    pub fn empty() -> Self {
        Path(Vec::new())
    }

    pub fn from_keys<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Path(keys.into_iter().map(|k| PathElement::Key(k.into())).collect())
    }

    pub fn child(&self, key: &str) -> Self {
        let mut elements = self.0.clone();
        elements.push(PathElement::Key(key.to_string()));
        Path(elements)
    }

    pub fn index(&self, i: usize) -> Self {
        let mut elements = self.0.clone();
        elements.push(PathElement::Index(i));
        Path(elements)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, PathElement> {
        self.0.iter()
    }

    pub fn to_json(&self) -> Value {
        Value::Array(
            self.0
                .iter()
                .map(|e| match e {
                    PathElement::Key(k) => Value::String(k.clone()),
                    PathElement::Index(i) => json!(i),
                })
                .collect(),
        )
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for element in &self.0 {
            if !first {
                write!(f, ".")?;
            }
            write!(f, "{}", element)?;
            first = false;
        }
        Ok(())
    }
}

/// A single entry in the response `errors` array.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GraphQLError {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Map<String, Value>>,
}

impl GraphQLError {
    pub fn new(message: impl Into<String>) -> Self {
        GraphQLError {
            message: message.into(),
            path: None,
            extensions: None,
        }
    }

    pub fn at_path(message: impl Into<String>, path: &Path) -> Self {
        GraphQLError {
            message: message.into(),
            path: Some(path.to_json()),
            extensions: None,
        }
    }

    pub fn with_code(mut self, code: &str) -> Self {
        let extensions = self.extensions.get_or_insert_with(Map::new);
        extensions.insert("code".to_string(), Value::String(code.to_string()));
        self
    }
}

/// The JSON body returned to the client: `data` plus any errors gathered
/// while planning and executing. Partial failures leave `data` populated
/// with nulls at the failed paths, per the GraphQL partial-response
/// contract.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GraphQLResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub errors: Vec<GraphQLError>,
}

impl GraphQLResponse {
    pub fn from_error(error: GraphQLError) -> Self {
        GraphQLResponse {
            data: Some(Value::Null),
            errors: vec![error],
        }
    }
}
