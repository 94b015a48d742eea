//! Loading declarations from directories of JSON files.
//!
//! Each `*.json` file holds one declaration, named after the file stem:
//!
//! - collection declarations take the camelCase stem (`blog-posts.json` -> `blogPosts`),
//! - custom types take the PascalCase stem (`postal-code.json` -> `PostalCode`).
//!
//! Other files are ignored. Entries are returned sorted by name.

use std::{
    fs,
    path::{Path, PathBuf},
};

use serde_json::Value;

use crate::{
    error::{DocumentStoreError, DocumentStoreResult},
    types::TypeLibrary,
};

/// Reads collection declarations from a directory.
#[derive(Debug, Clone)]
pub struct DefinitionLoader {
    dir: PathBuf,
}

impl DefinitionLoader {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Every declaration in the directory as `(collection name, JSON)`.
    pub fn load(&self) -> DocumentStoreResult<Vec<(String, Value)>> {
        read_dir_json(&self.dir, camel_case)
    }
}

/// Reads custom type declarations from a directory into a [`TypeLibrary`].
#[derive(Debug, Clone)]
pub struct TypeLoader {
    dir: PathBuf,
}

impl TypeLoader {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Registers every type in the directory, returning the registered names.
    ///
    /// A type may use another loaded type as its base regardless of file order.
    ///
    /// # Errors
    ///
    /// Fails with the registration error of the first type whose base never resolves.
    pub fn load_into(&self, library: &TypeLibrary) -> DocumentStoreResult<Vec<String>> {
        let mut pending = read_dir_json(&self.dir, pascal_case)?;
        let mut loaded = Vec::with_capacity(pending.len());

        while !pending.is_empty() {
            let before = pending.len();
            let mut failure = None;

            pending.retain(|(name, declaration)| match library.define(name.clone(), declaration) {
                Ok(()) => {
                    loaded.push(name.clone());
                    false
                }
                Err(err) => {
                    failure.get_or_insert(err);
                    true
                }
            });

            if pending.len() == before {
                if let Some(err) = failure {
                    return Err(err);
                }
            }
        }

        loaded.sort();
        Ok(loaded)
    }
}

fn read_dir_json(dir: &Path, rename: fn(&str) -> String) -> DocumentStoreResult<Vec<(String, Value)>> {
    let entries = fs::read_dir(dir).map_err(|err| {
        DocumentStoreError::Initialization(format!("cannot read {}: {err}", dir.display()))
    })?;

    let mut declarations = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) else {
            continue;
        };

        let json = serde_json::from_str(&fs::read_to_string(&path)?).map_err(|err| {
            DocumentStoreError::Initialization(format!("cannot parse {}: {err}", path.display()))
        })?;

        declarations.push((rename(stem), json));
    }

    declarations.sort_by(|(a, _), (b, _)| a.cmp(b));
    Ok(declarations)
}

/// `blog-posts` -> `blogPosts`, `test_collection_2` -> `testCollection2`.
pub fn camel_case(stem: &str) -> String {
    let mut out = String::with_capacity(stem.len());
    let mut chars = stem.chars().peekable();

    while let Some(c) = chars.next() {
        match (c, chars.peek()) {
            ('-' | '_', Some(next)) if next.is_ascii_lowercase() || next.is_ascii_digit() => {
                out.push(next.to_ascii_uppercase());
                chars.next();
            }
            _ => out.push(c),
        }
    }

    out
}

/// `postal-code` -> `PostalCode`.
pub fn pascal_case(stem: &str) -> String {
    let camel = camel_case(stem);
    let mut chars = camel.chars();

    match chars.next() {
        Some(first) if first.is_ascii_lowercase() => first.to_ascii_uppercase().to_string() + chars.as_str(),
        _ => camel,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn collection_names_are_camel_cased() {
        assert_eq!(camel_case("posts"), "posts");
        assert_eq!(camel_case("blog-posts"), "blogPosts");
        assert_eq!(camel_case("test_collection_2"), "testCollection2");
        assert_eq!(camel_case("trailing-"), "trailing-");
    }

    #[test]
    fn type_names_are_pascal_cased() {
        assert_eq!(pascal_case("email"), "Email");
        assert_eq!(pascal_case("test-type"), "TestType");
        assert_eq!(pascal_case("test_type2"), "TestType2");
        assert_eq!(pascal_case("Already"), "Already");
    }

    #[test]
    fn missing_directory_is_an_initialization_error() {
        let err = DefinitionLoader::new("/nonexistent/vellum/collections")
            .load()
            .unwrap_err();

        assert!(matches!(err, DocumentStoreError::Initialization(_)));
    }
}
