use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// One embedded chunk as stored in a collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentPoint {
    pub id: String,
    pub vector: Vec<f32>,
    pub payload: PointPayload,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointPayload {
    pub project_id: String,
    pub path: String,
    pub content_signature: String,
    pub chunk_index: usize,
    pub total_chunks: usize,
    pub language: String,
    /// Unix seconds
    pub indexed_at: u64,
    /// Branches in which this point is suppressed
    #[serde(default)]
    pub hidden_branches: BTreeSet<String>,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub start_line: usize,
    #[serde(default)]
    pub end_line: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_commit: Option<String>,
}

impl ContentPoint {
    #[must_use]
    pub fn is_visible_in(&self, branch: &str) -> bool {
        !self.payload.hidden_branches.contains(branch)
    }
}

/// Conjunctive payload filter. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointFilter {
    pub path: Option<String>,
    pub content_signature: Option<String>,
    pub visible_in: Option<String>,
    pub hidden_in: Option<String>,
}

impl PointFilter {
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn for_path(path: impl Into<String>) -> Self {
        Self {
            path: Some(path.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_signature(mut self, signature: impl Into<String>) -> Self {
        self.content_signature = Some(signature.into());
        self
    }

    #[must_use]
    pub fn visible_in(mut self, branch: impl Into<String>) -> Self {
        self.visible_in = Some(branch.into());
        self
    }

    #[must_use]
    pub fn hidden_in(mut self, branch: impl Into<String>) -> Self {
        self.hidden_in = Some(branch.into());
        self
    }

    #[must_use]
    pub fn matches(&self, point: &ContentPoint) -> bool {
        let payload = &point.payload;
        if self.path.as_deref().is_some_and(|p| p != payload.path) {
            return false;
        }
        if self
            .content_signature
            .as_deref()
            .is_some_and(|s| s != payload.content_signature)
        {
            return false;
        }
        if self
            .visible_in
            .as_deref()
            .is_some_and(|b| payload.hidden_branches.contains(b))
        {
            return false;
        }
        if self
            .hidden_in
            .as_deref()
            .is_some_and(|b| !payload.hidden_branches.contains(b))
        {
            return false;
        }
        true
    }
}

/// Payload-only update of a single point's visibility
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisibilityUpdate {
    pub id: String,
    pub hidden_branches: BTreeSet<String>,
    /// Refreshes `indexed_at` when content is reused instead of re-embedded
    pub indexed_at: Option<u64>,
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn point(id: &str, path: &str, signature: &str, chunk: usize, total: usize) -> ContentPoint {
        ContentPoint {
            id: id.to_string(),
            vector: vec![1.0, 0.0, 0.0],
            payload: PointPayload {
                project_id: "proj".to_string(),
                path: path.to_string(),
                content_signature: signature.to_string(),
                chunk_index: chunk,
                total_chunks: total,
                language: "rust".to_string(),
                indexed_at: 100,
                hidden_branches: BTreeSet::new(),
                text: format!("chunk {chunk}"),
                start_line: 1,
                end_line: 1,
                git_branch: None,
                git_commit: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::point;
    use super::*;

    #[test]
    fn filter_combines_fields() {
        let mut p = point("1", "src/a.rs", "sig-a", 0, 1);
        p.payload.hidden_branches.insert("feature".to_string());

        assert!(PointFilter::for_path("src/a.rs").matches(&p));
        assert!(!PointFilter::for_path("src/b.rs").matches(&p));
        assert!(PointFilter::for_path("src/a.rs")
            .with_signature("sig-a")
            .matches(&p));
        assert!(!PointFilter::all().with_signature("sig-b").matches(&p));
        assert!(PointFilter::all().visible_in("main").matches(&p));
        assert!(!PointFilter::all().visible_in("feature").matches(&p));
        assert!(PointFilter::all().hidden_in("feature").matches(&p));
    }

    #[test]
    fn payload_without_hidden_branches_deserializes_visible() {
        let json = r#"{"id":"x","vector":[0.5],"payload":{"project_id":"p","path":"a.py",
            "content_signature":"s","chunk_index":0,"total_chunks":1,"language":"python",
            "indexed_at":1}}"#;
        let p: ContentPoint = serde_json::from_str(json).unwrap();
        assert!(p.payload.hidden_branches.is_empty());
        assert!(p.is_visible_in("main"));
    }
}
