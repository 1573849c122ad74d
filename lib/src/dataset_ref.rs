// Copyright 2022 The Keel Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![expect(missing_docs)]

//! Human-readable dataset aliases.
//!
//! String form: `username/name[@profile_id][/ipfs/<path>]`. Parsing and
//! formatting are inverse bijections over well-formed refs.

use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// An alias naming one dataset, optionally pinned to a profile id and a
/// content path.
///
/// The profile id is an annotation riding along for display; the derived
/// key id stays the canonical author identity everywhere else.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct DatasetRef {
    pub username: String,
    pub name: String,
    /// Optional profile id annotation; empty when absent.
    #[serde(default)]
    pub profile_id: String,
    /// Optional content path (`/ipfs/...`); empty when absent.
    #[serde(default)]
    pub path: String,
}

impl DatasetRef {
    pub fn new(username: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            name: name.into(),
            profile_id: String::new(),
            path: String::new(),
        }
    }

    /// The `username/name` head of the alias, without annotations.
    pub fn alias(&self) -> String {
        format!("{}/{}", self.username, self.name)
    }

    /// True when username and name match, annotations aside.
    pub fn same_dataset(&self, other: &Self) -> bool {
        self.username == other.username && self.name == other.name
    }
}

impl fmt::Display for DatasetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.username, self.name)?;
        if !self.profile_id.is_empty() {
            write!(f, "@{}", self.profile_id)?;
        }
        if !self.path.is_empty() {
            write!(f, "{}", self.path)?;
        }
        Ok(())
    }
}

pub(crate) fn valid_component(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

impl FromStr for DatasetRef {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || Error::BadRequest(format!("invalid dataset ref {s:?}"));

        let (head, path) = match s.find("/ipfs/") {
            Some(index) => (&s[..index], &s[index..]),
            None => (s, ""),
        };
        let (username, rest) = head.split_once('/').ok_or_else(bad)?;
        let (name, profile_id) = match rest.split_once('@') {
            Some((name, profile_id)) if !profile_id.is_empty() => (name, profile_id),
            Some(_) => return Err(bad()),
            None => (rest, ""),
        };
        if !valid_component(username) || !valid_component(name) {
            return Err(bad());
        }
        if !profile_id.is_empty() && !valid_component(profile_id) {
            return Err(bad());
        }
        Ok(Self {
            username: username.to_string(),
            name: name.to_string(),
            profile_id: profile_id.to_string(),
            path: path.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use test_case::test_case;

    use super::*;

    #[test_case("b5/world_bank_population"; "bare alias")]
    #[test_case("b5/world_bank_population@QmProfile"; "with profile id")]
    #[test_case("b5/world_bank_population/ipfs/QmVersion"; "with path")]
    #[test_case("b5/world_bank_population@QmProfile/ipfs/QmVersion/extra"; "with everything")]
    fn test_parse_format_round_trip(s: &str) {
        let parsed: DatasetRef = s.parse().unwrap();
        assert_eq!(parsed.to_string(), s);
        let reparsed: DatasetRef = parsed.to_string().parse().unwrap();
        assert_eq!(reparsed, parsed);
    }

    #[test]
    fn test_parse_fields() {
        let parsed: DatasetRef = "b5/pop@QmProfile/ipfs/QmVersion".parse().unwrap();
        assert_eq!(parsed.username, "b5");
        assert_eq!(parsed.name, "pop");
        assert_eq!(parsed.profile_id, "QmProfile");
        assert_eq!(parsed.path, "/ipfs/QmVersion");
        assert_eq!(parsed.alias(), "b5/pop");
    }

    #[test_case(""; "empty")]
    #[test_case("no_slash"; "missing name")]
    #[test_case("/name"; "empty username")]
    #[test_case("user/"; "empty name")]
    #[test_case("user/name@"; "empty profile id")]
    #[test_case("user/na me"; "whitespace")]
    #[test_case("user/name/extra"; "trailing segment")]
    fn test_parse_rejects(s: &str) {
        assert_matches!(s.parse::<DatasetRef>(), Err(Error::BadRequest(_)));
    }
}
