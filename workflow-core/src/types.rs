//! ABOUTME: Identifier newtypes and the structural type-tag system
//! ABOUTME: used for branch/continue routing without runtime reflection

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identifies a workflow definition. Non-empty by construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkflowId(String);

impl WorkflowId {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        assert!(!id.is_empty(), "workflow id must not be empty");
        Self(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkflowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies a step node within a workflow's graph.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StepId(String);

impl StepId {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        assert!(!id.is_empty(), "step id must not be empty");
        Self(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies one execution (instance) of a workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A structural type tag standing in for the source system's runtime
/// class hierarchy. Steps declare the tags they produce/consume;
/// values carry the tag of their own type plus, most-specific first,
/// the tags of every supertype they satisfy. The router never walks a
/// real class hierarchy — it walks this declared ancestor list.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TypeTag(String);

impl TypeTag {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The tag matching any declared successor; used by steps whose
    /// output type is not meaningfully specialized.
    pub fn any() -> Self {
        Self::new("Any")
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TypeTag {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// A value tagged with its own type plus its ancestor chain, most
/// specific first. The router's "most specific supertype" rule walks
/// `ancestors` in order and stops at the first tag a successor
/// declares in its `nextClasses`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypedValue {
    pub tag: TypeTag,
    pub ancestors: Vec<TypeTag>,
    pub value: serde_json::Value,
}

impl TypedValue {
    pub fn new(tag: impl Into<TypeTag>, value: serde_json::Value) -> Self {
        let tag = tag.into();
        Self {
            ancestors: vec![tag.clone(), TypeTag::any()],
            tag,
            value,
        }
    }

    /// Attach additional supertypes, most specific first, before the
    /// implicit trailing `Any`.
    pub fn with_supertypes(mut self, supertypes: impl IntoIterator<Item = TypeTag>) -> Self {
        let any = self.ancestors.pop(); // drop trailing Any
        self.ancestors.extend(supertypes);
        if let Some(any) = any {
            self.ancestors.push(any);
        }
        self
    }

    /// The most specific tag in `candidates` that appears in this
    /// value's ancestor chain, with its position (lower is more
    /// specific). Used by the router to resolve ties deterministically.
    pub fn most_specific_match<'a>(
        &self,
        candidates: impl IntoIterator<Item = &'a TypeTag>,
    ) -> Option<(&'a TypeTag, usize)> {
        let mut best: Option<(&TypeTag, usize)> = None;
        for candidate in candidates {
            if let Some(rank) = self.ancestors.iter().position(|a| a == candidate) {
                if best.map(|(_, best_rank)| rank < best_rank).unwrap_or(true) {
                    best = Some((candidate, rank));
                }
            }
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn most_specific_match_prefers_declared_type_over_any() {
        let value = TypedValue::new("UserInput", serde_json::json!({"name": "ada"}))
            .with_supertypes(vec![TypeTag::new("Input")]);
        let candidates = vec![TypeTag::any(), TypeTag::new("UserInput")];
        let (matched, rank) = value.most_specific_match(candidates.iter()).unwrap();
        assert_eq!(matched.as_str(), "UserInput");
        assert_eq!(rank, 0);
    }

    #[test]
    fn most_specific_match_falls_back_to_any() {
        let value = TypedValue::new("UserInput", serde_json::json!(null));
        let candidates = vec![TypeTag::any()];
        let (matched, _) = value.most_specific_match(candidates.iter()).unwrap();
        assert_eq!(matched, &TypeTag::any());
    }

    #[test]
    fn run_id_round_trips_through_uuid() {
        let id = RunId::new();
        let round_tripped = RunId::from_uuid(id.as_uuid());
        assert_eq!(id, round_tripped);
    }
}

#[cfg(test)]
mod property_tests {
    use super::*;
    use proptest::prelude::*;

    prop_compose! {
        fn arb_tag_name()(name in "[a-zA-Z][a-zA-Z0-9_]{0,31}") -> String {
            name
        }
    }

    proptest! {
        /// Whatever tags are attached, `TypedValue::new` always leaves
        /// `Any` as the last, lowest-priority ancestor.
        #[test]
        fn any_is_always_the_trailing_ancestor(
            own in arb_tag_name(),
            supertypes in prop::collection::vec(arb_tag_name(), 0..5),
        ) {
            let value = TypedValue::new(own, serde_json::json!(null))
                .with_supertypes(supertypes.into_iter().map(TypeTag::new));
            prop_assert_eq!(value.ancestors.last(), Some(&TypeTag::any()));
        }

        /// `most_specific_match` never returns a rank past the end of
        /// the ancestor chain it was given.
        #[test]
        fn most_specific_match_rank_is_in_bounds(
            own in arb_tag_name(),
            supertypes in prop::collection::vec(arb_tag_name(), 0..5),
        ) {
            let supertypes: Vec<TypeTag> = supertypes.into_iter().map(TypeTag::new).collect();
            let value = TypedValue::new(own, serde_json::json!(null))
                .with_supertypes(supertypes.clone());
            let candidates: Vec<TypeTag> = supertypes.into_iter().chain(std::iter::once(TypeTag::any())).collect();
            if let Some((_, rank)) = value.most_specific_match(candidates.iter()) {
                prop_assert!(rank < value.ancestors.len());
            }
        }
    }
}
