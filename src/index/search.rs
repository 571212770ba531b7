//! Query side of the index
//!
//! A [`SearchPattern`] computes its range-scan bound with the codec's
//! `best_*_prefix` functions and then filters the decoded candidates, since
//! the bound stops at the first wildcard and ignores case.

use tracing::trace;

use super::storage::IndexStorage;
use crate::codec::{
    self, Category, DecodedKey, LimitTo, MatchMode, Role, SearchFor, wildcard_match,
};

/// What to look for in an index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchPattern {
    pub search_for: SearchFor,
    pub limit_to: LimitTo,
    /// Unqualified name; `None` matches every name
    pub name: Option<String>,
    /// Enclosing scopes, outermost first; empty matches any scope
    pub qualifiers: Vec<String>,
    pub match_mode: MatchMode,
    pub case_sensitive: bool,
}

/// One matching index entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchMatch {
    pub key: String,
    pub element: DecodedKey,
    pub documents: Vec<String>,
}

impl SearchPattern {
    pub fn new(search_for: SearchFor, name: impl Into<String>) -> Self {
        Self {
            search_for,
            limit_to: LimitTo::AllOccurrences,
            name: Some(name.into()),
            qualifiers: Vec::new(),
            match_mode: MatchMode::Exact,
            case_sensitive: true,
        }
    }

    /// Every element of a family
    pub fn any(search_for: SearchFor) -> Self {
        Self {
            name: None,
            ..Self::new(search_for, "")
        }
    }

    pub fn limit_to(mut self, limit_to: LimitTo) -> Self {
        self.limit_to = limit_to;
        self
    }

    pub fn qualifiers<I, S>(mut self, qualifiers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.qualifiers = qualifiers.into_iter().map(Into::into).collect();
        self
    }

    pub fn match_mode(mut self, match_mode: MatchMode) -> Self {
        self.match_mode = match_mode;
        self
    }

    pub fn case_sensitive(mut self, case_sensitive: bool) -> Self {
        self.case_sensitive = case_sensitive;
        self
    }

    /// Literal bound for the range scan; `None` when nothing can match
    pub fn scan_prefix(&self) -> Option<String> {
        let name = self.name.as_deref();
        let qualifiers = &self.qualifiers;
        let (mode, case) = (self.match_mode, self.case_sensitive);
        let prefix = match self.search_for {
            SearchFor::Namespace => {
                codec::best_namespace_prefix(self.limit_to, name, qualifiers, mode, case)
            }
            SearchFor::Variable => {
                codec::best_variable_prefix(self.limit_to, name, qualifiers, mode, case)
            }
            SearchFor::Field => codec::best_field_prefix(self.limit_to, name, qualifiers, mode, case),
            SearchFor::Enumerator => {
                codec::best_enumerator_prefix(self.limit_to, name, qualifiers, mode, case)
            }
            SearchFor::Method => {
                codec::best_method_prefix(self.limit_to, name, qualifiers, mode, case)
            }
            SearchFor::Function => codec::best_function_prefix(self.limit_to, name, mode, case),
            SearchFor::Macro => codec::best_macro_prefix(self.limit_to, name, mode, case)?,
            SearchFor::Include => codec::best_include_prefix(self.limit_to, name, mode, case)?,
            type_search => codec::best_type_prefix(
                type_search,
                self.limit_to,
                name,
                qualifiers,
                mode,
                case,
            ),
        };
        Some(prefix)
    }

    fn accepts_category(&self, category: Category) -> bool {
        let family = match self.search_for {
            SearchFor::Namespace => [Category::NamespaceDecl, Category::NamespaceRef],
            SearchFor::Field => [Category::FieldDecl, Category::FieldRef],
            SearchFor::Enumerator => [Category::EnumtorDecl, Category::EnumtorRef],
            SearchFor::Method => [Category::MethodDecl, Category::MethodRef],
            SearchFor::Function => [Category::FunctionDecl, Category::FunctionRef],
            SearchFor::Macro => [Category::MacroDecl, Category::MacroDecl],
            SearchFor::Include => [Category::IncludeRef, Category::IncludeRef],
            _ => [Category::TypeDecl, Category::TypeRef],
        };
        if !family.contains(&category) {
            return false;
        }
        match self.limit_to {
            LimitTo::Declarations => category.role() == Role::Declaration,
            LimitTo::References => category.role() == Role::Reference,
            LimitTo::Definitions | LimitTo::AllOccurrences => true,
        }
    }

    fn matches_segment(&self, pattern: &str, segment: &str, open_ended: bool) -> bool {
        match self.match_mode {
            MatchMode::Pattern => wildcard_match(pattern, segment, self.case_sensitive),
            MatchMode::Prefix if open_ended => {
                if self.case_sensitive {
                    segment.starts_with(pattern)
                } else {
                    segment.to_lowercase().starts_with(&pattern.to_lowercase())
                }
            }
            _ => {
                if self.case_sensitive {
                    segment == pattern
                } else {
                    segment.to_lowercase() == pattern.to_lowercase()
                }
            }
        }
    }

    /// Whether a decoded entry satisfies every part of the pattern
    pub fn matches(&self, element: &DecodedKey) -> bool {
        if !self.accepts_category(element.category) {
            return false;
        }
        if element.category.has_kind() && !self.search_for.accepts_kind(element.kind) {
            return false;
        }
        if let Some(name) = &self.name
            && !self.matches_segment(name, element.name(), true)
        {
            return false;
        }
        if self.qualifiers.is_empty() {
            return true;
        }
        let stored = element.qualifiers();
        stored.len() == self.qualifiers.len()
            && self
                .qualifiers
                .iter()
                .zip(stored)
                .all(|(pattern, segment)| self.matches_segment(pattern, segment, false))
    }
}

/// Run a search against storage the caller has already locked for reading
pub fn search(storage: &dyn IndexStorage, pattern: &SearchPattern) -> Vec<SearchMatch> {
    let Some(prefix) = pattern.scan_prefix() else {
        return Vec::new();
    };

    let candidates = storage.query_entries(&prefix);
    trace!(
        "Search prefix '{}' produced {} candidates",
        prefix,
        candidates.len()
    );

    candidates
        .into_iter()
        .filter_map(|entry| {
            let element = codec::decode(&entry.key).ok()?;
            pattern.matches(&element).then_some(SearchMatch {
                key: entry.key,
                element,
                documents: entry.documents,
            })
        })
        .collect()
}
