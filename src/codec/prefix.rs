//! Literal range-scan prefixes for index queries
//!
//! Keys are stored as `category[kind/]name/q_n/.../q_1`, so the longest
//! literal prefix a query can promise is the category, the kind letter, the
//! literal head of the name and then as many literal qualifiers as can be
//! appended innermost-first. Everything past the first wildcard is left to
//! the post-filter.

use super::pattern::split_literal;
use super::{
    ENUMTOR_ALL, ENUMTOR_DECL, ENUMTOR_REF, FIELD_ALL, FIELD_DECL, FIELD_REF, FUNCTION_ALL,
    FUNCTION_DECL, FUNCTION_REF, INCLUDE_REF, MACRO_DECL, METHOD_ALL, METHOD_DECL, METHOD_REF,
    NAMESPACE_ALL, NAMESPACE_DECL, NAMESPACE_REF, NO_ENUMTOR_DEFS, SEPARATOR, TYPE_ALL, TYPE_DECL,
    TYPE_REF, TypeKind,
};

/// How the query name is compared against stored names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatchMode {
    /// The name must match exactly
    #[default]
    Exact,
    /// Stored names must start with the query name
    Prefix,
    /// `*`, `?` and backslash escapes are interpreted
    Pattern,
}

/// Which occurrences a search is limited to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LimitTo {
    Declarations,
    References,
    Definitions,
    #[default]
    AllOccurrences,
}

/// Element family a search looks for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchFor {
    /// Any type-kind entry
    Type,
    /// Classes and structs together
    ClassStruct,
    Class,
    Struct,
    Union,
    Enum,
    Typedef,
    Derived,
    Friend,
    FwdClass,
    FwdStruct,
    FwdUnion,
    Namespace,
    Variable,
    Field,
    Enumerator,
    Method,
    Function,
    Macro,
    Include,
}

impl SearchFor {
    /// The single kind letter this search pins down, if any
    pub fn type_kind(self) -> Option<TypeKind> {
        match self {
            SearchFor::Class => Some(TypeKind::Class),
            SearchFor::Struct => Some(TypeKind::Struct),
            SearchFor::Union => Some(TypeKind::Union),
            SearchFor::Enum => Some(TypeKind::Enum),
            SearchFor::Typedef => Some(TypeKind::Typedef),
            SearchFor::Derived => Some(TypeKind::Derived),
            SearchFor::Friend => Some(TypeKind::Friend),
            SearchFor::FwdClass => Some(TypeKind::FwdClass),
            SearchFor::FwdStruct => Some(TypeKind::FwdStruct),
            SearchFor::FwdUnion => Some(TypeKind::FwdUnion),
            SearchFor::Variable => Some(TypeKind::Var),
            _ => None,
        }
    }

    /// Whether a stored kind letter satisfies this search
    pub fn accepts_kind(self, kind: Option<TypeKind>) -> bool {
        match self {
            SearchFor::Type => kind.is_some(),
            SearchFor::ClassStruct => {
                matches!(kind, Some(TypeKind::Class) | Some(TypeKind::Struct))
            }
            _ => match self.type_kind() {
                Some(expected) => kind == Some(expected),
                None => kind.is_none(),
            },
        }
    }
}

/// Compute the longest literal prefix shared by every key a query can match
///
/// `qualifiers` are the enclosing scopes in declaration order (outermost
/// first). When the query is case-insensitive the name cannot bound the scan
/// because keys are stored case-sensitively, so only the category and kind
/// letter are returned.
pub fn best_prefix<S: AsRef<str>>(
    category: &str,
    kind: Option<TypeKind>,
    name: Option<&str>,
    qualifiers: &[S],
    mode: MatchMode,
    case_sensitive: bool,
) -> String {
    let mut prefix = String::from(category);
    if let Some(kind) = kind {
        prefix.push(kind.letter());
        prefix.push(SEPARATOR);
    }

    let Some(name) = name.filter(|_| case_sensitive) else {
        return prefix;
    };

    let (literal, open_ended) = literal_part(name, mode);
    if literal.is_empty() {
        return prefix;
    }
    prefix.push_str(&literal);
    if open_ended {
        return prefix;
    }

    for qualifier in qualifiers.iter().rev().map(AsRef::as_ref) {
        if qualifier.is_empty() {
            continue;
        }
        let (literal, open_ended) = literal_part(qualifier, mode);
        prefix.push(SEPARATOR);
        prefix.push_str(&literal);
        if open_ended {
            break;
        }
    }

    prefix
}

/// Literal text of one name segment and whether anything may follow it
fn literal_part(segment: &str, mode: MatchMode) -> (String, bool) {
    match mode {
        MatchMode::Exact => (segment.to_string(), false),
        MatchMode::Prefix => (segment.to_string(), true),
        MatchMode::Pattern => {
            let split = split_literal(segment);
            (split.literal, split.has_wildcard)
        }
    }
}

fn decl_or_ref(limit_to: LimitTo, decl: &'static str, reference: &'static str) -> Option<&'static str> {
    match limit_to {
        LimitTo::Declarations => Some(decl),
        LimitTo::References => Some(reference),
        LimitTo::Definitions | LimitTo::AllOccurrences => None,
    }
}

/// Prefix for type searches
///
/// Searches that do not pin a kind letter (any type, class-or-struct) can only
/// be bounded by the category.
pub fn best_type_prefix<S: AsRef<str>>(
    search_for: SearchFor,
    limit_to: LimitTo,
    name: Option<&str>,
    qualifiers: &[S],
    mode: MatchMode,
    case_sensitive: bool,
) -> String {
    let Some(category) = decl_or_ref(limit_to, TYPE_DECL, TYPE_REF) else {
        return TYPE_ALL.to_string();
    };
    match search_for.type_kind() {
        Some(kind) if search_for != SearchFor::Variable => {
            best_prefix(category, Some(kind), name, qualifiers, mode, case_sensitive)
        }
        _ => category.to_string(),
    }
}

pub fn best_namespace_prefix<S: AsRef<str>>(
    limit_to: LimitTo,
    name: Option<&str>,
    qualifiers: &[S],
    mode: MatchMode,
    case_sensitive: bool,
) -> String {
    match decl_or_ref(limit_to, NAMESPACE_DECL, NAMESPACE_REF) {
        Some(category) => best_prefix(category, None, name, qualifiers, mode, case_sensitive),
        None => NAMESPACE_ALL.to_string(),
    }
}

/// Variables are stored as type entries with the `V` kind letter
pub fn best_variable_prefix<S: AsRef<str>>(
    limit_to: LimitTo,
    name: Option<&str>,
    qualifiers: &[S],
    mode: MatchMode,
    case_sensitive: bool,
) -> String {
    match decl_or_ref(limit_to, TYPE_DECL, TYPE_REF) {
        Some(category) => best_prefix(
            category,
            Some(TypeKind::Var),
            name,
            qualifiers,
            mode,
            case_sensitive,
        ),
        None => TYPE_ALL.to_string(),
    }
}

pub fn best_field_prefix<S: AsRef<str>>(
    limit_to: LimitTo,
    name: Option<&str>,
    qualifiers: &[S],
    mode: MatchMode,
    case_sensitive: bool,
) -> String {
    match decl_or_ref(limit_to, FIELD_DECL, FIELD_REF) {
        Some(category) => best_prefix(category, None, name, qualifiers, mode, case_sensitive),
        None => FIELD_ALL.to_string(),
    }
}

/// Enumerators have no definitions, so that limit yields a prefix no key has
pub fn best_enumerator_prefix<S: AsRef<str>>(
    limit_to: LimitTo,
    name: Option<&str>,
    qualifiers: &[S],
    mode: MatchMode,
    case_sensitive: bool,
) -> String {
    match limit_to {
        LimitTo::Declarations => {
            best_prefix(ENUMTOR_DECL, None, name, qualifiers, mode, case_sensitive)
        }
        LimitTo::References => {
            best_prefix(ENUMTOR_REF, None, name, qualifiers, mode, case_sensitive)
        }
        LimitTo::AllOccurrences => ENUMTOR_ALL.to_string(),
        LimitTo::Definitions => NO_ENUMTOR_DEFS.to_string(),
    }
}

pub fn best_method_prefix<S: AsRef<str>>(
    limit_to: LimitTo,
    name: Option<&str>,
    qualifiers: &[S],
    mode: MatchMode,
    case_sensitive: bool,
) -> String {
    match decl_or_ref(limit_to, METHOD_DECL, METHOD_REF) {
        Some(category) => best_prefix(category, None, name, qualifiers, mode, case_sensitive),
        None => METHOD_ALL.to_string(),
    }
}

/// Functions are free, so no qualifiers take part in the prefix
pub fn best_function_prefix(
    limit_to: LimitTo,
    name: Option<&str>,
    mode: MatchMode,
    case_sensitive: bool,
) -> String {
    match decl_or_ref(limit_to, FUNCTION_DECL, FUNCTION_REF) {
        Some(category) => best_prefix::<&str>(category, None, name, &[], mode, case_sensitive),
        None => FUNCTION_ALL.to_string(),
    }
}

/// Only macro declarations are indexed
pub fn best_macro_prefix(
    limit_to: LimitTo,
    name: Option<&str>,
    mode: MatchMode,
    case_sensitive: bool,
) -> Option<String> {
    (limit_to == LimitTo::Declarations)
        .then(|| best_prefix::<&str>(MACRO_DECL, None, name, &[], mode, case_sensitive))
}

/// Only include references are indexed
pub fn best_include_prefix(
    limit_to: LimitTo,
    name: Option<&str>,
    mode: MatchMode,
    case_sensitive: bool,
) -> Option<String> {
    (limit_to == LimitTo::References)
        .then(|| best_prefix::<&str>(INCLUDE_REF, None, name, &[], mode, case_sensitive))
}
