//! Scheme-tagged field sets extracted from an `Authorization` header.

/// Ordered field map tagged with the scheme that produced it.
///
/// Field names compare case-insensitively. When a name is inserted twice the first
/// value is kept and the later one is ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    scheme: String,
    fields: Vec<(String, String)>,
}

impl Credentials {
    pub fn new(scheme: &str) -> Self {
        Credentials {
            scheme: scheme.to_string(),
            fields: Vec::new(),
        }
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// Look up a field by case-insensitive name
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Insert unless the name is already present. Returns false for a duplicate.
    pub(crate) fn insert_first(&mut self, name: &str, value: String) -> bool {
        if self.contains(name) {
            return false;
        }
        self.fields.push((name.to_string(), value));
        true
    }

    /// Insert or overwrite; used by the builder, which owns the accumulation phase.
    pub(crate) fn set(&mut self, name: &str, value: String) {
        match self
            .fields
            .iter_mut()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
        {
            Some(slot) => slot.1 = value,
            None => self.fields.push((name.to_string(), value)),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Outcome of running a scheme's header parser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedHeader {
    /// The header belongs to another scheme, or is too malformed to use.
    NoMatch,
    Credentials(Credentials),
}

impl From<Option<Credentials>> for ParsedHeader {
    fn from(o: Option<Credentials>) -> Self {
        match o {
            Some(c) if !c.is_empty() => ParsedHeader::Credentials(c),
            _ => ParsedHeader::NoMatch,
        }
    }
}

/// Strip `scheme` from the front of a header value, case-insensitively.
///
/// Returns the remainder (trimmed) only when the scheme is followed by whitespace
/// or ends the value.
pub fn strip_scheme<'a>(header: &'a str, scheme: &str) -> Option<&'a str> {
    let header = header.trim_start();
    let prefix = header.get(..scheme.len())?;
    if !prefix.eq_ignore_ascii_case(scheme) {
        return None;
    }
    let rest = &header[scheme.len()..];
    match rest.chars().next() {
        None => Some(rest),
        Some(c) if c.is_whitespace() => Some(rest.trim()),
        Some(_) => None,
    }
}
