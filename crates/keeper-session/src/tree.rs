//! Minimal hierarchical value tree holding session variables.
//!
//! A tree is a root [`Node`] of type object. Containers keep their children
//! in insertion order. Object keys compare case-insensitively and carry a
//! precomputed hash that is persisted alongside the key.
//!
//! Paths address nodes from the root: segments are separated by `/` or `.`,
//! a leading separator is ignored, `name[2]` indexes into an array and a
//! trailing separator addresses the child named `index`.

use std::fmt;

/// Rotating string hash shared by object keys and the cache index.
pub(crate) fn rotating_hash(bytes: &[u8], fold_case: bool) -> u32 {
    bytes.iter().fold(0u32, |hash, &b| {
        let b = if fold_case { b.to_ascii_lowercase() } else { b };
        let hash = hash.wrapping_add(b as u32);
        hash.wrapping_sub(hash.rotate_left(13))
    })
}

/// Case-insensitive hash of an object key.
pub fn key_hash(key: &str) -> u32 {
    rotating_hash(key.as_bytes(), true)
}

/// Persisted type tag of a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Tag {
    Null = 0,
    Bool = 1,
    Int = 2,
    Double = 3,
    String = 4,
    Blob = 5,
    Array = 6,
    Object = 7,
    Timestamp = 8,
}

impl Tag {
    pub fn from_u32(raw: u32) -> Option<Self> {
        Some(match raw {
            0 => Tag::Null,
            1 => Tag::Bool,
            2 => Tag::Int,
            3 => Tag::Double,
            4 => Tag::String,
            5 => Tag::Blob,
            6 => Tag::Array,
            7 => Tag::Object,
            8 => Tag::Timestamp,
            _ => return None,
        })
    }

    pub fn is_container(self) -> bool {
        matches!(self, Tag::Array | Tag::Object)
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Tag::Null => "null",
            Tag::Bool => "bool",
            Tag::Int => "int",
            Tag::Double => "double",
            Tag::String => "string",
            Tag::Blob => "blob",
            Tag::Array => "array",
            Tag::Object => "object",
            Tag::Timestamp => "timestamp",
        };
        f.write_str(name)
    }
}

/// A typed value.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Double(f64),
    String(String),
    Blob(Vec<u8>),
    /// Seconds since the epoch plus an optional display format.
    Timestamp { secs: i64, format: Option<String> },
    Array(Vec<Node>),
    Object(Vec<Node>),
}

impl Value {
    pub fn tag(&self) -> Tag {
        match self {
            Value::Null => Tag::Null,
            Value::Bool(_) => Tag::Bool,
            Value::Int(_) => Tag::Int,
            Value::Double(_) => Tag::Double,
            Value::String(_) => Tag::String,
            Value::Blob(_) => Tag::Blob,
            Value::Timestamp { .. } => Tag::Timestamp,
            Value::Array(_) => Tag::Array,
            Value::Object(_) => Tag::Object,
        }
    }

    /// Empty value of the given type.
    pub fn empty(tag: Tag) -> Self {
        match tag {
            Tag::Null => Value::Null,
            Tag::Bool => Value::Bool(false),
            Tag::Int => Value::Int(0),
            Tag::Double => Value::Double(0.0),
            Tag::String => Value::String(String::new()),
            Tag::Blob => Value::Blob(Vec::new()),
            Tag::Timestamp => Value::Timestamp {
                secs: 0,
                format: None,
            },
            Tag::Array => Value::Array(Vec::new()),
            Tag::Object => Value::Object(Vec::new()),
        }
    }
}

/// A keyed or unkeyed node in the tree.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Node {
    key: Option<String>,
    hash: u32,
    pub value: Value,
}

enum Step<'a> {
    Key(&'a str),
    Index(usize),
}

fn parse_path(path: &str) -> Option<Vec<Step<'_>>> {
    let is_sep = |c: char| c == '/' || c == '.';
    let trimmed = path.trim_start_matches(is_sep);
    let mut steps = Vec::new();

    for segment in trimmed.split(is_sep).filter(|s| !s.is_empty()) {
        let (name, mut rest) = match segment.find('[') {
            Some(pos) => segment.split_at(pos),
            None => (segment, ""),
        };
        if !name.is_empty() {
            steps.push(Step::Key(name));
        }
        while let Some(open) = rest.strip_prefix('[') {
            let close = open.find(']')?;
            let digits = &open[..close];
            let index = if digits.is_empty() {
                0
            } else {
                digits.parse().ok()?
            };
            steps.push(Step::Index(index));
            rest = &open[close + 1..];
        }
        if !rest.is_empty() {
            return None;
        }
    }

    if !trimmed.is_empty() && trimmed.ends_with(is_sep) {
        steps.push(Step::Key("index"));
    }
    Some(steps)
}

impl Node {
    /// An empty root object.
    pub fn root() -> Self {
        Self::new(None, Value::Object(Vec::new()))
    }

    pub fn new(key: Option<&str>, value: Value) -> Self {
        match key {
            Some(k) => Self::with_hash(Some(k.to_string()), key_hash(k), value),
            None => Self::with_hash(None, 0, value),
        }
    }

    /// Build a node with a hash read from storage rather than recomputed.
    pub(crate) fn with_hash(key: Option<String>, hash: u32, value: Value) -> Self {
        Self { key, hash, value }
    }

    pub fn keyed(key: &str, value: Value) -> Self {
        Self::new(Some(key), value)
    }

    pub fn unkeyed(value: Value) -> Self {
        Self::new(None, value)
    }

    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    pub fn key_hash(&self) -> u32 {
        self.hash
    }

    pub fn tag(&self) -> Tag {
        self.value.tag()
    }

    pub fn set_key(&mut self, key: Option<&str>) {
        self.hash = key.map(key_hash).unwrap_or(0);
        self.key = key.map(str::to_string);
    }

    pub fn children(&self) -> Option<&[Node]> {
        match &self.value {
            Value::Array(c) | Value::Object(c) => Some(c),
            _ => None,
        }
    }

    pub fn children_mut(&mut self) -> Option<&mut Vec<Node>> {
        match &mut self.value {
            Value::Array(c) | Value::Object(c) => Some(c),
            _ => None,
        }
    }

    /// Append a child to a container. Returns false if this is not one.
    pub fn push(&mut self, child: Node) -> bool {
        match self.children_mut() {
            Some(c) => {
                c.push(child);
                true
            }
            None => false,
        }
    }

    fn position(children: &[Node], key: &str) -> Option<usize> {
        let hash = key_hash(key);
        children.iter().position(|n| {
            n.hash == hash && n.key.as_deref().is_some_and(|k| k.eq_ignore_ascii_case(key))
        })
    }

    /// Child of an object by key.
    pub fn child(&self, key: &str) -> Option<&Node> {
        match &self.value {
            Value::Object(c) => Self::position(c, key).map(|i| &c[i]),
            _ => None,
        }
    }

    /// Find or append the object child named `key`.
    ///
    /// A node that is not an object is turned into an empty one first.
    pub fn upsert(&mut self, key: &str) -> &mut Node {
        if !matches!(self.value, Value::Object(_)) {
            self.value = Value::Object(Vec::new());
        }
        let Value::Object(children) = &mut self.value else {
            unreachable!("value was just made an object");
        };
        match Self::position(children, key) {
            Some(i) => &mut children[i],
            None => {
                children.push(Node::keyed(key, Value::Null));
                let last = children.len() - 1;
                &mut children[last]
            }
        }
    }

    /// Node at `path`, or None if any step is missing or mistyped.
    pub fn get(&self, path: &str) -> Option<&Node> {
        let mut node = self;
        for step in parse_path(path)? {
            node = match step {
                Step::Key(k) => node.child(k)?,
                Step::Index(i) => match &node.value {
                    Value::Array(c) => c.get(i)?,
                    _ => return None,
                },
            };
        }
        Some(node)
    }

    /// Node at `path`, creating intermediate objects as needed.
    ///
    /// Index steps must address existing array elements. The empty path is
    /// rejected so the root always stays an object.
    pub fn get_or_create(&mut self, path: &str) -> Option<&mut Node> {
        let steps = parse_path(path)?;
        if steps.is_empty() {
            return None;
        }
        let mut node = self;
        for step in steps {
            node = match step {
                Step::Key(k) => node.upsert(k),
                Step::Index(i) => match &mut node.value {
                    Value::Array(c) => c.get_mut(i)?,
                    _ => return None,
                },
            };
        }
        Some(node)
    }

    /// Detach and return the node at `path`.
    pub fn remove(&mut self, path: &str) -> Option<Node> {
        let mut steps = parse_path(path)?;
        let last = steps.pop()?;
        let mut parent = self;
        for step in steps {
            parent = match step {
                Step::Key(k) => match &mut parent.value {
                    Value::Object(c) => {
                        let i = Self::position(c, k)?;
                        &mut c[i]
                    }
                    _ => return None,
                },
                Step::Index(i) => match &mut parent.value {
                    Value::Array(c) => c.get_mut(i)?,
                    _ => return None,
                },
            };
        }
        match (last, &mut parent.value) {
            (Step::Key(k), Value::Object(c)) => {
                let i = Self::position(c, k)?;
                Some(c.remove(i))
            }
            (Step::Index(i), Value::Array(c)) if i < c.len() => Some(c.remove(i)),
            _ => None,
        }
    }

    pub fn get_bool(&self, path: &str) -> Option<bool> {
        match self.get(path)?.value {
            Value::Bool(v) => Some(v),
            _ => None,
        }
    }

    pub fn get_int(&self, path: &str) -> Option<i64> {
        match self.get(path)?.value {
            Value::Int(v) => Some(v),
            _ => None,
        }
    }

    pub fn get_double(&self, path: &str) -> Option<f64> {
        match self.get(path)?.value {
            Value::Double(v) => Some(v),
            _ => None,
        }
    }

    pub fn get_str(&self, path: &str) -> Option<&str> {
        match &self.get(path)?.value {
            Value::String(v) => Some(v),
            _ => None,
        }
    }

    pub fn get_blob(&self, path: &str) -> Option<&[u8]> {
        match &self.get(path)?.value {
            Value::Blob(v) => Some(v),
            _ => None,
        }
    }

    pub fn get_timestamp(&self, path: &str) -> Option<(i64, Option<&str>)> {
        match &self.get(path)?.value {
            Value::Timestamp { secs, format } => Some((*secs, format.as_deref())),
            _ => None,
        }
    }

    /// Assign `value` at `path`. Returns false if the path cannot be created.
    pub fn set(&mut self, path: &str, value: Value) -> bool {
        match self.get_or_create(path) {
            Some(node) => {
                node.value = value;
                true
            }
            None => false,
        }
    }

    /// Drop all children of the root, keeping its allocation.
    pub fn clear(&mut self) {
        match &mut self.value {
            Value::Object(c) => c.clear(),
            _ => self.value = Value::Object(Vec::new()),
        }
        self.key = None;
        self.hash = 0;
    }

    /// Render the subtree as JSON for inspection.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as Json;
        match &self.value {
            Value::Null => Json::Null,
            Value::Bool(v) => Json::Bool(*v),
            Value::Int(v) => Json::from(*v),
            Value::Double(v) => serde_json::Number::from_f64(*v)
                .map(Json::Number)
                .unwrap_or(Json::Null),
            Value::String(v) => Json::String(v.clone()),
            Value::Blob(v) => Json::String(String::from_utf8_lossy(v).into_owned()),
            Value::Timestamp { secs, .. } => chrono::DateTime::from_timestamp(*secs, 0)
                .map(|dt| Json::String(dt.to_rfc3339()))
                .unwrap_or_else(|| Json::from(*secs)),
            Value::Array(c) => Json::Array(c.iter().map(Node::to_json).collect()),
            Value::Object(c) => Json::Object(
                c.iter()
                    .filter_map(|n| n.key().map(|k| (k.to_string(), n.to_json())))
                    .collect(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_hash_ignores_case() {
        assert_eq!(key_hash("UserName"), key_hash("username"));
        assert_ne!(key_hash("a"), key_hash("b"));
        assert_eq!(rotating_hash(b"", false), 0);
    }

    #[test]
    fn test_set_and_get_nested() {
        let mut root = Node::root();
        assert!(root.set("/user/name", Value::String("ada".into())));
        assert!(root.set("user.age", Value::Int(36)));
        assert!(root.set("flags/admin", Value::Bool(true)));

        assert_eq!(root.get_str("user/name"), Some("ada"));
        assert_eq!(root.get_int("/user/age"), Some(36));
        assert_eq!(root.get_bool("flags.admin"), Some(true));
        assert_eq!(root.get_int("USER/AGE"), Some(36));
        // wrong type
        assert_eq!(root.get_bool("user/age"), None);
        // walking through a scalar
        assert!(root.get("user/age/deeper").is_none());
    }

    #[test]
    fn test_set_replaces_in_place() {
        let mut root = Node::root();
        root.set("a", Value::Int(1));
        root.set("b", Value::Int(2));
        root.set("A", Value::Int(3));

        let keys: Vec<_> = root.children().unwrap().iter().map(|n| n.key()).collect();
        assert_eq!(keys, vec![Some("a"), Some("b")]);
        assert_eq!(root.get_int("a"), Some(3));
    }

    #[test]
    fn test_array_indexing() {
        let mut root = Node::root();
        let list = Value::Array(vec![
            Node::unkeyed(Value::Int(10)),
            Node::unkeyed(Value::Object(vec![Node::keyed("x", Value::Bool(true))])),
        ]);
        root.set("list", list);

        assert_eq!(root.get_int("list[0]"), Some(10));
        assert_eq!(root.get_bool("list[1]/x"), Some(true));
        assert_eq!(root.get_int("list[]"), Some(10));
        assert!(root.get("list[5]").is_none());
        assert!(root.get("list[x]").is_none());

        assert!(root.set("list[0]", Value::Int(11)));
        assert_eq!(root.get_int("list[0]"), Some(11));
        assert!(!root.set("list[9]", Value::Int(1)));
    }

    #[test]
    fn test_trailing_separator_addresses_index() {
        let mut root = Node::root();
        root.set("page/", Value::String("home".into()));
        assert_eq!(root.get_str("page/index"), Some("home"));
        assert_eq!(root.get_str("page/"), Some("home"));
    }

    #[test]
    fn test_empty_path() {
        let mut root = Node::root();
        assert!(!root.set("", Value::Int(1)));
        assert!(!root.set("///", Value::Int(1)));
        assert!(matches!(root.get("").map(|n| n.tag()), Some(Tag::Object)));
    }

    #[test]
    fn test_remove() {
        let mut root = Node::root();
        root.set("a/b", Value::Int(1));
        root.set("a/c", Value::Int(2));

        let removed = root.remove("a/b").unwrap();
        assert_eq!(removed.value, Value::Int(1));
        assert!(root.get("a/b").is_none());
        assert_eq!(root.get_int("a/c"), Some(2));
        assert!(root.remove("a/missing").is_none());
    }

    #[test]
    fn test_to_json() {
        let mut root = Node::root();
        root.set("n", Value::Int(5));
        root.set("s", Value::String("x".into()));
        root.set("when", Value::Timestamp { secs: 0, format: None });
        let json = root.to_json();
        assert_eq!(json["n"], 5);
        assert_eq!(json["s"], "x");
        assert_eq!(json["when"], "1970-01-01T00:00:00+00:00");
    }

    #[test]
    fn test_clear_keeps_root_object() {
        let mut root = Node::root();
        root.set("a", Value::Int(1));
        root.clear();
        assert_eq!(root.children().unwrap().len(), 0);
        assert_eq!(root.tag(), Tag::Object);
    }
}
