//! `Link` — typed edge between two entries. See `spec.md` §3, §4.6.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Relation {
    Related,
    Supersedes,
    DerivedFrom,
    Contradicts,
}

impl Relation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Relation::Related => "related",
            Relation::Supersedes => "supersedes",
            Relation::DerivedFrom => "derived_from",
            Relation::Contradicts => "contradicts",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "related" => Relation::Related,
            "supersedes" => Relation::Supersedes,
            "derived_from" => Relation::DerivedFrom,
            "contradicts" => Relation::Contradicts,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Link {
    pub source_id: String,
    pub target_id: String,
    pub relation: Relation,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
}
