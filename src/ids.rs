use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// Header used to propagate request identifiers across services.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Strongly typed request identifier backed by ULID.
///
/// One is minted for every [`RequestContext`](crate::context::RequestContext);
/// the pipeline stamps it on error bodies and the request-id middleware echoes
/// it on responses.
#[derive(Clone, Copy, Eq, PartialEq, Hash, Debug)]
pub struct RequestId(pub ulid::Ulid);

impl RequestId {
    #[must_use]
    pub fn new() -> Self {
        Self(ulid::Ulid::new())
    }

    /// Parse a caller-supplied `x-request-id` value. Anything that is not a
    /// ULID is ignored.
    #[must_use]
    pub fn from_header(header_value: &str) -> Option<Self> {
        header_value.trim().parse::<RequestId>().ok()
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for RequestId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RequestId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let id = ulid::Ulid::from_string(s)?;
        Ok(RequestId(id))
    }
}

impl Serialize for RequestId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for RequestId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse::<RequestId>()
            .map_err(|_| serde::de::Error::custom("invalid request id"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_header_reuses_valid_ulid() {
        let id = RequestId::new();
        assert_eq!(RequestId::from_header(&format!(" {id} ")), Some(id));
    }

    #[test]
    fn test_from_header_ignores_garbage() {
        assert_eq!(RequestId::from_header("not-a-ulid"), None);
        assert_eq!(RequestId::from_header(""), None);
    }

    #[test]
    fn test_serde_as_string() {
        let id = RequestId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{id}\""));
        let back: RequestId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
