//! Index key encoding
//!
//! Every declaration or reference stored in an index is represented by a single
//! key string of the form
//!
//! ```text
//! <category>[<kind-letter>/]<leaf-name>(/<qualifier>)*
//! ```
//!
//! where the qualifier chain lists the enclosing scopes innermost-first. The
//! textual layout is the storage contract: every encoder must produce
//! byte-identical keys for the same logical entry, and queries depend on the
//! ordering to compute range-scan bounds (see [`prefix`]).
//!
//! - `pattern`: escape-aware wildcard tokenizer and matcher
//! - `prefix`: literal range-scan prefixes for exact, prefix and wildcard queries

pub mod pattern;
pub mod prefix;

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use pattern::{LiteralPrefix, split_literal, wildcard_match};
pub use prefix::{
    LimitTo, MatchMode, SearchFor, best_enumerator_prefix, best_field_prefix,
    best_function_prefix, best_include_prefix, best_macro_prefix, best_method_prefix,
    best_namespace_prefix, best_prefix, best_type_prefix, best_variable_prefix,
};

/// Reserved separator between the category, kind letter and name segments
pub const SEPARATOR: char = '/';

// ============================================================================
// Category Tokens
// ============================================================================

pub const TYPE_DECL: &str = "typeDecl/";
pub const TYPE_REF: &str = "typeRef/";
pub const NAMESPACE_DECL: &str = "namespaceDecl/";
pub const NAMESPACE_REF: &str = "namespaceRef/";
pub const FIELD_DECL: &str = "fieldDecl/";
pub const FIELD_REF: &str = "fieldRef/";
pub const ENUMTOR_DECL: &str = "enumtorDecl/";
pub const ENUMTOR_REF: &str = "enumtorRef/";
pub const METHOD_DECL: &str = "methodDecl/";
pub const METHOD_REF: &str = "methodRef/";
pub const FUNCTION_DECL: &str = "functionDecl/";
pub const FUNCTION_REF: &str = "functionRef/";
pub const MACRO_DECL: &str = "macroDecl/";
pub const INCLUDE_REF: &str = "includeRef/";

// "No restriction" sentinels, matching declarations and references alike
pub const TYPE_ALL: &str = "type";
pub const NAMESPACE_ALL: &str = "namespace";
pub const FIELD_ALL: &str = "field";
pub const ENUMTOR_ALL: &str = "enumtor";
pub const METHOD_ALL: &str = "method";
pub const FUNCTION_ALL: &str = "function";

/// Returned for enumerator definition searches; no key can start with it
pub const NO_ENUMTOR_DEFS: &str = "noEnumtorDefs";

// ============================================================================
// Errors
// ============================================================================

/// Errors produced while encoding or decoding index keys
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("Cannot encode an empty qualified name")]
    EmptyName,

    #[error("{kind:?} entries cannot be encoded as {role:?}")]
    UnsupportedRole { kind: ElementKind, role: Role },

    #[error("Unknown key category in '{0}'")]
    UnknownCategory(String),

    #[error("Type key without a kind letter: '{0}'")]
    MissingKind(String),

    #[error("Unknown kind letter '{0}'")]
    UnknownKind(char),
}

// ============================================================================
// Element Kinds and Roles
// ============================================================================

/// Whether an entry records a declaration or a use of an element
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Declaration,
    Reference,
}

/// Sub-kinds of the type category, each stored as a single letter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypeKind {
    Class,
    Struct,
    Union,
    Enum,
    Var,
    Typedef,
    Derived,
    Friend,
    FwdClass,
    FwdStruct,
    FwdUnion,
}

impl TypeKind {
    pub const ALL: [TypeKind; 11] = [
        TypeKind::Class,
        TypeKind::Struct,
        TypeKind::Union,
        TypeKind::Enum,
        TypeKind::Var,
        TypeKind::Typedef,
        TypeKind::Derived,
        TypeKind::Friend,
        TypeKind::FwdClass,
        TypeKind::FwdStruct,
        TypeKind::FwdUnion,
    ];

    /// The kind letter written after the type category token
    pub const fn letter(self) -> char {
        match self {
            TypeKind::Class => 'C',
            TypeKind::Struct => 'S',
            TypeKind::Union => 'U',
            TypeKind::Enum => 'E',
            TypeKind::Var => 'V',
            TypeKind::Typedef => 'T',
            TypeKind::Derived => 'D',
            TypeKind::Friend => 'F',
            TypeKind::FwdClass => 'G',
            TypeKind::FwdStruct => 'H',
            TypeKind::FwdUnion => 'I',
        }
    }

    pub fn from_letter(letter: char) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.letter() == letter)
    }
}

/// Element family of an index entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ElementKind {
    Type(TypeKind),
    Namespace,
    Field,
    Enumerator,
    Method,
    Function,
    Macro,
    Include,
}

/// Category token selected from an element kind and a role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    TypeDecl,
    TypeRef,
    NamespaceDecl,
    NamespaceRef,
    FieldDecl,
    FieldRef,
    EnumtorDecl,
    EnumtorRef,
    MethodDecl,
    MethodRef,
    FunctionDecl,
    FunctionRef,
    MacroDecl,
    IncludeRef,
}

impl Category {
    pub const ALL: [Category; 14] = [
        Category::TypeDecl,
        Category::TypeRef,
        Category::NamespaceDecl,
        Category::NamespaceRef,
        Category::FieldDecl,
        Category::FieldRef,
        Category::EnumtorDecl,
        Category::EnumtorRef,
        Category::MethodDecl,
        Category::MethodRef,
        Category::FunctionDecl,
        Category::FunctionRef,
        Category::MacroDecl,
        Category::IncludeRef,
    ];

    /// Fixed token, including its trailing separator
    pub const fn token(self) -> &'static str {
        match self {
            Category::TypeDecl => TYPE_DECL,
            Category::TypeRef => TYPE_REF,
            Category::NamespaceDecl => NAMESPACE_DECL,
            Category::NamespaceRef => NAMESPACE_REF,
            Category::FieldDecl => FIELD_DECL,
            Category::FieldRef => FIELD_REF,
            Category::EnumtorDecl => ENUMTOR_DECL,
            Category::EnumtorRef => ENUMTOR_REF,
            Category::MethodDecl => METHOD_DECL,
            Category::MethodRef => METHOD_REF,
            Category::FunctionDecl => FUNCTION_DECL,
            Category::FunctionRef => FUNCTION_REF,
            Category::MacroDecl => MACRO_DECL,
            Category::IncludeRef => INCLUDE_REF,
        }
    }

    /// Whether keys of this category carry a kind letter
    pub const fn has_kind(self) -> bool {
        matches!(self, Category::TypeDecl | Category::TypeRef)
    }

    pub const fn role(self) -> Role {
        match self {
            Category::TypeDecl
            | Category::NamespaceDecl
            | Category::FieldDecl
            | Category::EnumtorDecl
            | Category::MethodDecl
            | Category::FunctionDecl
            | Category::MacroDecl => Role::Declaration,
            _ => Role::Reference,
        }
    }

    /// Select the category for an element kind and role
    pub fn for_element(kind: ElementKind, role: Role) -> Result<Self, CodecError> {
        let category = match (kind, role) {
            (ElementKind::Type(_), Role::Declaration) => Category::TypeDecl,
            (ElementKind::Type(_), Role::Reference) => Category::TypeRef,
            (ElementKind::Namespace, Role::Declaration) => Category::NamespaceDecl,
            (ElementKind::Namespace, Role::Reference) => Category::NamespaceRef,
            (ElementKind::Field, Role::Declaration) => Category::FieldDecl,
            (ElementKind::Field, Role::Reference) => Category::FieldRef,
            (ElementKind::Enumerator, Role::Declaration) => Category::EnumtorDecl,
            (ElementKind::Enumerator, Role::Reference) => Category::EnumtorRef,
            (ElementKind::Method, Role::Declaration) => Category::MethodDecl,
            (ElementKind::Method, Role::Reference) => Category::MethodRef,
            (ElementKind::Function, Role::Declaration) => Category::FunctionDecl,
            (ElementKind::Function, Role::Reference) => Category::FunctionRef,
            (ElementKind::Macro, Role::Declaration) => Category::MacroDecl,
            (ElementKind::Include, Role::Reference) => Category::IncludeRef,
            (kind, role) => return Err(CodecError::UnsupportedRole { kind, role }),
        };
        Ok(category)
    }

    /// Find the category a key starts with, returning the remainder of the key
    pub fn split_key(key: &str) -> Option<(Self, &str)> {
        Self::ALL
            .into_iter()
            .find_map(|category| key.strip_prefix(category.token()).map(|rest| (category, rest)))
    }
}

// ============================================================================
// Index Keys
// ============================================================================

/// An encoded index entry
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IndexKey(String);

impl IndexKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl AsRef<str> for IndexKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IndexKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Structured builder for a key: category, optional kind and the qualified
/// name in declaration order (outermost first)
#[derive(Debug, Clone)]
pub struct KeyBuilder<'a> {
    category: Category,
    kind: Option<TypeKind>,
    segments: Vec<&'a str>,
}

impl<'a> KeyBuilder<'a> {
    pub fn new(category: Category) -> Self {
        Self {
            category,
            kind: None,
            segments: Vec::new(),
        }
    }

    pub fn kind(mut self, kind: TypeKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn segments<S: AsRef<str>>(mut self, qualified_name: &'a [S]) -> Self {
        self.segments
            .extend(qualified_name.iter().map(|segment| segment.as_ref()));
        self
    }

    /// Exact length in bytes of the serialized key
    pub fn encoded_len(&self) -> usize {
        let kind_len = if self.kind.is_some() { 2 } else { 0 };
        let names: usize = self.segments.iter().map(|segment| segment.len()).sum();
        let separators = self.segments.len().saturating_sub(1);
        self.category.token().len() + kind_len + names + separators
    }

    /// Serialize the key: leaf name first, then the qualifiers innermost-first
    pub fn build(self) -> Result<IndexKey, CodecError> {
        let Some((leaf, qualifiers)) = self.segments.split_last() else {
            return Err(CodecError::EmptyName);
        };

        let expected_len = self.encoded_len();
        let mut key = String::with_capacity(expected_len);
        key.push_str(self.category.token());
        if let Some(kind) = self.kind {
            key.push(kind.letter());
            key.push(SEPARATOR);
        }
        key.push_str(leaf);
        for qualifier in qualifiers.iter().rev() {
            key.push(SEPARATOR);
            key.push_str(qualifier);
        }

        debug_assert_eq!(key.len(), expected_len);
        Ok(IndexKey(key))
    }
}

/// Encode a qualified name (outermost first) of the given kind and role
pub fn encode<S: AsRef<str>>(
    qualified_name: &[S],
    kind: ElementKind,
    role: Role,
) -> Result<IndexKey, CodecError> {
    let category = Category::for_element(kind, role)?;
    let mut builder = KeyBuilder::new(category).segments(qualified_name);
    if let ElementKind::Type(type_kind) = kind {
        builder = builder.kind(type_kind);
    }
    builder.build()
}

// ============================================================================
// Decoding
// ============================================================================

/// A key split back into its parts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedKey {
    pub category: Category,
    pub kind: Option<TypeKind>,
    /// Qualified name in declaration order (outermost first)
    pub qualified_name: Vec<String>,
}

impl DecodedKey {
    /// The innermost (unqualified) name
    pub fn name(&self) -> &str {
        self.qualified_name.last().map(String::as_str).unwrap_or("")
    }

    /// Enclosing scopes, outermost first
    pub fn qualifiers(&self) -> &[String] {
        match self.qualified_name.split_last() {
            Some((_, qualifiers)) => qualifiers,
            None => &[],
        }
    }

    pub fn role(&self) -> Role {
        self.category.role()
    }

    /// `A::B::name` rendering for display
    pub fn display_name(&self) -> String {
        self.qualified_name.join("::")
    }
}

/// Decode a key produced by [`encode`]
///
/// Names that themselves contain the separator cannot be told apart from
/// qualifiers; such keys decode into more segments than were encoded.
pub fn decode(key: &str) -> Result<DecodedKey, CodecError> {
    let (category, mut rest) =
        Category::split_key(key).ok_or_else(|| CodecError::UnknownCategory(key.to_string()))?;

    let mut kind = None;
    if category.has_kind() {
        let mut chars = rest.chars();
        let letter = chars
            .next()
            .ok_or_else(|| CodecError::MissingKind(key.to_string()))?;
        if chars.next() != Some(SEPARATOR) {
            return Err(CodecError::MissingKind(key.to_string()));
        }
        kind = Some(TypeKind::from_letter(letter).ok_or(CodecError::UnknownKind(letter))?);
        rest = &rest[letter.len_utf8() + SEPARATOR.len_utf8()..];
    }

    let mut qualified_name: Vec<String> = rest.split(SEPARATOR).map(str::to_string).collect();
    qualified_name.reverse();

    Ok(DecodedKey {
        category,
        kind,
        qualified_name,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_class_declaration() {
        let key = encode(
            &["NS", "Outer", "Foo"],
            ElementKind::Type(TypeKind::Class),
            Role::Declaration,
        )
        .unwrap();
        assert_eq!(key.as_str(), "typeDecl/C/Foo/Outer/NS");
    }

    #[test]
    fn test_encode_reverses_qualifiers() {
        let name = ["a", "b", "c", "d"];
        let key = encode(&name, ElementKind::Method, Role::Reference).unwrap();

        let rest = key.as_str().strip_prefix(METHOD_REF).unwrap();
        let parts: Vec<&str> = rest.split(SEPARATOR).collect();
        assert_eq!(parts, vec!["d", "c", "b", "a"]);
    }

    #[test]
    fn test_encode_every_type_kind_starts_with_token() {
        for kind in TypeKind::ALL {
            let key = encode(&["X", "y"], ElementKind::Type(kind), Role::Declaration).unwrap();
            let expected = format!("{TYPE_DECL}{}/y/X", kind.letter());
            assert_eq!(key.as_str(), expected);
        }
    }

    #[test]
    fn test_encode_untyped_categories() {
        let cases = [
            (ElementKind::Namespace, Role::Declaration, "namespaceDecl/B/A"),
            (ElementKind::Namespace, Role::Reference, "namespaceRef/B/A"),
            (ElementKind::Field, Role::Declaration, "fieldDecl/B/A"),
            (ElementKind::Enumerator, Role::Reference, "enumtorRef/B/A"),
            (ElementKind::Function, Role::Declaration, "functionDecl/B/A"),
            (ElementKind::Method, Role::Declaration, "methodDecl/B/A"),
        ];
        for (kind, role, expected) in cases {
            assert_eq!(encode(&["A", "B"], kind, role).unwrap().as_str(), expected);
        }
    }

    #[test]
    fn test_encode_single_segment() {
        let key = encode(&["MAX"], ElementKind::Macro, Role::Declaration).unwrap();
        assert_eq!(key.as_str(), "macroDecl/MAX");

        let key = encode(&["/usr/include/stdio.h"], ElementKind::Include, Role::Reference).unwrap();
        assert_eq!(key.as_str(), "includeRef//usr/include/stdio.h");
    }

    #[test]
    fn test_encode_rejects_empty_and_unsupported() {
        let empty: [&str; 0] = [];
        assert_eq!(
            encode(&empty, ElementKind::Function, Role::Declaration),
            Err(CodecError::EmptyName)
        );
        assert!(matches!(
            encode(&["M"], ElementKind::Macro, Role::Reference),
            Err(CodecError::UnsupportedRole { .. })
        ));
        assert!(matches!(
            encode(&["x.h"], ElementKind::Include, Role::Declaration),
            Err(CodecError::UnsupportedRole { .. })
        ));
    }

    #[test]
    fn test_encoded_len_matches_output() {
        let name = ["std", "vector", "push_back"];
        let builder = KeyBuilder::new(Category::TypeRef)
            .kind(TypeKind::Var)
            .segments(&name);
        let expected = builder.encoded_len();
        let key = builder.build().unwrap();
        assert_eq!(key.as_str().len(), expected);
    }

    #[test]
    fn test_decode_restores_declaration_order() {
        let name = ["NS", "Outer", "Foo"];
        let key = encode(&name, ElementKind::Type(TypeKind::Struct), Role::Reference).unwrap();
        let decoded = decode(key.as_str()).unwrap();

        assert_eq!(decoded.category, Category::TypeRef);
        assert_eq!(decoded.kind, Some(TypeKind::Struct));
        assert_eq!(decoded.qualified_name, vec!["NS", "Outer", "Foo"]);
        assert_eq!(decoded.name(), "Foo");
        assert_eq!(decoded.qualifiers(), &["NS".to_string(), "Outer".to_string()]);
        assert_eq!(decoded.role(), Role::Reference);
        assert_eq!(decoded.display_name(), "NS::Outer::Foo");
    }

    #[test]
    fn test_decode_errors() {
        assert!(matches!(decode("bogus/x"), Err(CodecError::UnknownCategory(_))));
        assert!(matches!(decode("typeDecl/"), Err(CodecError::MissingKind(_))));
        assert!(matches!(decode("typeDecl/Cx"), Err(CodecError::MissingKind(_))));
        assert_eq!(decode("typeDecl/Z/x"), Err(CodecError::UnknownKind('Z')));
    }

    #[test]
    fn test_kind_letters_round_trip() {
        for kind in TypeKind::ALL {
            assert_eq!(TypeKind::from_letter(kind.letter()), Some(kind));
        }
        assert_eq!(TypeKind::from_letter('Q'), None);
    }
}
