use http::HeaderMap;

use crate::FetchxResult;
use crate::util::{parse_header_name, parse_header_value};

const DEFAULT_USER_AGENT: &str = concat!("fetchx/", env!("CARGO_PKG_VERSION"));

/// Headers every request starts from. Seed values may override these by
/// re-setting the same key, but cannot remove them.
const DEFAULT_HEADERS: [(&str, &str); 2] = [
    ("user-agent", DEFAULT_USER_AGENT),
    ("accept-encoding", "gzip, deflate"),
];

/// An ordered, case-insensitive header store with unique keys.
///
/// Names are not validated here; conversion to typed headers happens at the
/// transport boundary via [`HeaderContainer::to_header_map`], and that is
/// where invalid names or values surface as errors.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HeaderContainer {
    entries: Vec<(String, String)>,
}

impl HeaderContainer {
    pub fn new() -> Self {
        Self::from_seed(std::iter::empty::<(&str, &str)>())
    }

    pub fn from_seed<I, K, V>(seed: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut container = Self {
            entries: Vec::new(),
        };
        for (name, value) in DEFAULT_HEADERS {
            container.set(name, value);
        }
        for (name, value) in seed {
            container.set(name, value);
        }
        container
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.position(&name) {
            Some(index) => self.entries[index].1 = value,
            None => self.entries.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.position(name)
            .map(|index| self.entries[index].1.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    pub fn remove(&mut self, name: &str) -> bool {
        match self.position(name) {
            Some(index) => {
                self.entries.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn set_authorization(&mut self, token: impl Into<String>) {
        self.set("authorization", token);
    }

    pub fn set_authorization_named(&mut self, header_name: impl Into<String>, token: impl Into<String>) {
        self.set(header_name, token);
    }

    pub fn entries(&self) -> &[(String, String)] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Exports the store as typed headers for the transport primitive.
    pub fn to_header_map(&self) -> FetchxResult<HeaderMap> {
        let mut headers = HeaderMap::with_capacity(self.entries.len());
        for (name, value) in &self.entries {
            let name = parse_header_name(name)?;
            let value = parse_header_value(name.as_str(), value)?;
            headers.insert(name, value);
        }
        Ok(headers)
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|(existing, _)| existing.eq_ignore_ascii_case(name))
    }
}
