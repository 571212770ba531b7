//! Include traversal context for one indexed document

use std::path::{Path, PathBuf};

/// Open includes plus every file visited while indexing one document
#[derive(Debug)]
pub struct IncludeStack {
    open: Vec<PathBuf>,
    traversed: Vec<PathBuf>,
}

impl IncludeStack {
    /// Start at the main document, which is always the first traversed file
    pub fn new(document: &Path) -> Self {
        Self {
            open: Vec::new(),
            traversed: vec![document.to_path_buf()],
        }
    }

    pub fn push_include(&mut self, path: &Path) {
        self.open.push(path.to_path_buf());
        if !self.traversed.iter().any(|seen| seen == path) {
            self.traversed.push(path.to_path_buf());
        }
    }

    pub fn pop_include(&mut self) -> Option<PathBuf> {
        self.open.pop()
    }

    /// Innermost open include
    pub fn peek_include(&self) -> Option<&Path> {
        self.open.last().map(PathBuf::as_path)
    }

    pub fn depth(&self) -> usize {
        self.open.len()
    }

    /// Main document followed by every header entered, without duplicates
    pub fn traversed(&self) -> &[PathBuf] {
        &self.traversed
    }

    pub fn into_traversed(self) -> Vec<PathBuf> {
        self.traversed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_traversed_keeps_first_visit_order() {
        let mut stack = IncludeStack::new(Path::new("/p/a.cpp"));
        stack.push_include(Path::new("/p/a.h"));
        stack.push_include(Path::new("/p/b.h"));
        assert_eq!(stack.peek_include(), Some(Path::new("/p/b.h")));
        assert_eq!(stack.depth(), 2);
        stack.pop_include();
        stack.pop_include();
        stack.push_include(Path::new("/p/b.h"));
        stack.pop_include();

        assert_eq!(
            stack.traversed(),
            &[
                PathBuf::from("/p/a.cpp"),
                PathBuf::from("/p/a.h"),
                PathBuf::from("/p/b.h"),
            ]
        );
        assert!(stack.peek_include().is_none());
        assert!(stack.pop_include().is_none());
    }
}
