use serde::{Deserialize, Serialize};

/// Relationship type as reported by the relationships endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub enum RelationshipKind {
    Friend,
    Blocked,
    IncomingRequest,
    OutgoingRequest,
    Implicit,
    Other(u8),
}

impl From<u8> for RelationshipKind {
    fn from(value: u8) -> Self {
        match value {
            1 => RelationshipKind::Friend,
            2 => RelationshipKind::Blocked,
            3 => RelationshipKind::IncomingRequest,
            4 => RelationshipKind::OutgoingRequest,
            5 => RelationshipKind::Implicit,
            other => RelationshipKind::Other(other),
        }
    }
}

impl From<RelationshipKind> for u8 {
    fn from(kind: RelationshipKind) -> Self {
        match kind {
            RelationshipKind::Friend => 1,
            RelationshipKind::Blocked => 2,
            RelationshipKind::IncomingRequest => 3,
            RelationshipKind::OutgoingRequest => 4,
            RelationshipKind::Implicit => 5,
            RelationshipKind::Other(other) => other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub global_name: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub discriminator: Option<String>,
}

impl UserProfile {
    pub fn new(id: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            username: username.into(),
            global_name: None,
            avatar: None,
            discriminator: None,
        }
    }
}

/// One entry of the authenticated user's relationship list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: RelationshipKind,
    pub user: UserProfile,
    #[serde(default)]
    pub nickname: Option<String>,
}

impl Relationship {
    pub fn is_friend(&self) -> bool {
        self.kind == RelationshipKind::Friend
    }
}

/// A mutual friend returned by the per-user relationships endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NeighborRef {
    pub id: String,
    #[serde(default)]
    pub username: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Guild {
    pub id: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutualGuild {
    pub id: String,
    #[serde(default)]
    pub nick: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ProfileResponse {
    #[serde(default)]
    pub mutual_guilds: Vec<MutualGuild>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relationship_kind_from_wire() {
        let json = r#"[
            {"id": "1", "type": 1, "user": {"id": "1", "username": "alice"}},
            {"id": "2", "type": 2, "user": {"id": "2", "username": "bob"}},
            {"id": "3", "type": 9, "user": {"id": "3", "username": "carol"}}
        ]"#;
        let relationships: Vec<Relationship> = serde_json::from_str(json).unwrap();

        assert_eq!(relationships[0].kind, RelationshipKind::Friend);
        assert!(relationships[0].is_friend());
        assert_eq!(relationships[1].kind, RelationshipKind::Blocked);
        assert_eq!(relationships[2].kind, RelationshipKind::Other(9));
        assert!(!relationships[2].is_friend());
    }

    #[test]
    fn test_profile_fields_default_when_missing() {
        let user: UserProfile = serde_json::from_str(r#"{"id": "42"}"#).unwrap();
        assert_eq!(user.id, "42");
        assert!(user.username.is_empty());
        assert!(user.avatar.is_none());
    }
}
