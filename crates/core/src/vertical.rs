//! Corpus verticals
//!
//! A vertical is a named partition of the corpus, mapped 1:1 to an external
//! vector-store collection.

use serde::{Deserialize, Serialize};

/// Document vertical
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Vertical {
    /// Acts, rules, regulations
    Legal,
    /// Government orders
    Go,
    /// Court judgments, case law
    Judicial,
    /// UDISE, statistical reports
    Data,
    /// Policy schemes and programs
    Schemes,
}

impl Vertical {
    pub const ALL: [Vertical; 5] = [
        Vertical::Legal,
        Vertical::Go,
        Vertical::Judicial,
        Vertical::Data,
        Vertical::Schemes,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Vertical::Legal => "legal",
            Vertical::Go => "go",
            Vertical::Judicial => "judicial",
            Vertical::Data => "data",
            Vertical::Schemes => "schemes",
        }
    }

    pub fn parse(s: &str) -> Option<Vertical> {
        match s {
            "legal" => Some(Vertical::Legal),
            "go" => Some(Vertical::Go),
            "judicial" => Some(Vertical::Judicial),
            "data" => Some(Vertical::Data),
            "schemes" => Some(Vertical::Schemes),
            _ => None,
        }
    }

    /// Vector-store collection backing this vertical
    pub fn collection_name(&self) -> &'static str {
        match self {
            Vertical::Legal => "ap_legal_documents",
            Vertical::Go => "ap_government_orders",
            Vertical::Judicial => "ap_judicial_documents",
            Vertical::Data => "ap_data_reports",
            Vertical::Schemes => "ap_schemes",
        }
    }

    /// Reverse mapping from a collection name
    pub fn from_collection(collection: &str) -> Option<Vertical> {
        Vertical::ALL
            .iter()
            .copied()
            .find(|v| v.collection_name() == collection)
    }

    /// Fixed search priority; lower is searched first
    pub fn priority(&self) -> u8 {
        match self {
            Vertical::Legal => 1,
            Vertical::Go => 2,
            Vertical::Judicial => 3,
            Vertical::Schemes => 4,
            Vertical::Data => 5,
        }
    }
}
