//! Distinguished name parsing

/// Attributes of an X.500 subject such as `CN=www.example.com,O=Example\, Inc.`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubjectName {
    attributes: Vec<(String, String)>,
}

impl SubjectName {
    /// Parse a comma (or semicolon) separated DN
    ///
    /// Backslash escapes and double-quoted values are honoured. Components without
    /// `=` are ignored.
    pub fn parse(subject: &str) -> Self {
        let mut attributes = Vec::new();
        for component in split_components(subject) {
            if let Some((key, value)) = component.split_once('=') {
                let key = key.trim().to_ascii_uppercase();
                let value = unquote(value.trim());
                if !key.is_empty() {
                    attributes.push((key, value));
                }
            }
        }
        Self { attributes }
    }

    /// Last value of an attribute; keys are case-insensitive
    pub fn last(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .rev()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
            .filter(|v| !v.is_empty())
    }

    pub fn common_name(&self) -> Option<&str> {
        self.last("CN")
    }

    pub fn organization(&self) -> Option<&str> {
        self.last("O")
    }

    /// E or EMAILADDRESS
    pub fn email(&self) -> Option<&str> {
        self.last("E").or_else(|| self.last("EMAILADDRESS"))
    }
}

fn split_components(subject: &str) -> Vec<String> {
    let mut components = Vec::new();
    let mut current = String::new();
    let mut chars = subject.chars();
    let mut quoted = false;

    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                current.push(c);
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            '"' => {
                quoted = !quoted;
                current.push(c);
            }
            ',' | ';' | '+' if !quoted => {
                components.push(std::mem::take(&mut current));
            }
            _ => current.push(c),
        }
    }
    if !current.trim().is_empty() {
        components.push(current);
    }
    components
}

fn unquote(value: &str) -> String {
    let value = value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value);

    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}
