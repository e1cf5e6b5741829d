use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{canonical, crypto::Hash, time::TimestampMillis};

#[derive(Debug, Error)]
pub enum GroupError {
    #[error("A group requires at least one member")]
    NoMembers,

    #[error(transparent)]
    Serde(#[from] serde_json::Error),
}

// One party in a private group: the signing identity and the node that
// receives the payloads for it
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Member {
    pub identity: String,
    pub node: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupDefinition {
    pub namespace: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub members: Vec<Member>,
}

impl GroupDefinition {
    // The member list is an ordered set: sorting and de-duplicating before
    // hashing makes identical groups collapse to one id
    pub fn normalize(&mut self) {
        self.members.sort();
        self.members.dedup();
    }

    pub fn hash(&self) -> Result<Hash, serde_json::Error> {
        canonical::canonical_hash(self)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub hash: Hash,
    pub definition: GroupDefinition,
    pub created: TimestampMillis,
}

impl Group {
    pub fn new(mut definition: GroupDefinition, created: TimestampMillis) -> Result<Self, GroupError> {
        definition.normalize();
        if definition.members.is_empty() {
            return Err(GroupError::NoMembers);
        }
        let hash = definition.hash()?;
        Ok(Self {
            hash,
            definition,
            created,
        })
    }

    pub fn nodes(&self) -> impl Iterator<Item = &str> {
        let mut seen = Vec::new();
        self.definition.members.iter().filter_map(move |member| {
            if seen.contains(&member.node) {
                None
            } else {
                seen.push(member.node.clone());
                Some(member.node.as_str())
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(identity: &str, node: &str) -> Member {
        Member {
            identity: identity.into(),
            node: node.into(),
        }
    }

    #[test]
    fn test_identical_groups_share_hash() {
        let a = Group::new(
            GroupDefinition {
                namespace: "ns1".into(),
                name: None,
                members: vec![member("org/bob", "node-b"), member("org/alice", "node-a")],
            },
            1,
        )
        .unwrap();
        let b = Group::new(
            GroupDefinition {
                namespace: "ns1".into(),
                name: None,
                members: vec![
                    member("org/alice", "node-a"),
                    member("org/bob", "node-b"),
                    member("org/bob", "node-b"),
                ],
            },
            2,
        )
        .unwrap();
        assert_eq!(a.hash, b.hash);
    }

    #[test]
    fn test_empty_group_rejected() {
        let result = Group::new(
            GroupDefinition {
                namespace: "ns1".into(),
                name: None,
                members: Vec::new(),
            },
            1,
        );
        assert!(matches!(result, Err(GroupError::NoMembers)));
    }

    #[test]
    fn test_nodes_deduplicated() {
        let group = Group::new(
            GroupDefinition {
                namespace: "ns1".into(),
                name: Some("traders".into()),
                members: vec![
                    member("org/alice", "node-a"),
                    member("org/alice2", "node-a"),
                    member("org/bob", "node-b"),
                ],
            },
            1,
        )
        .unwrap();
        let nodes: Vec<&str> = group.nodes().collect();
        assert_eq!(nodes, vec!["node-a", "node-b"]);
    }
}
