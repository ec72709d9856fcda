//! File Tree Cache.
//!
//! Nodes live in a flat arena keyed by path; each node lists its children's
//! paths. Expansion state is a separate path set so it survives a full
//! replacement of the arena.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use tracing::{debug, warn};

use crate::backend::FileNode;
use crate::error::{AppError, Result};
use crate::utils::{file_name, is_same_or_descendant, parent_path, rebase_path};

#[derive(Clone, Debug)]
struct TreeEntry {
    name: String,
    is_directory: bool,
    children: Vec<String>,
}

#[derive(Clone, Debug, Default)]
pub struct FileTreeCache {
    nodes: HashMap<String, TreeEntry>,
    roots: Vec<String>,
    expanded: HashSet<String>,
    loaded: bool,
}

impl FileTreeCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// True once a snapshot has been applied.
    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.nodes.contains_key(path)
    }

    pub fn children(&self, path: &str) -> Option<&[String]> {
        self.nodes.get(path).map(|n| n.children.as_slice())
    }

    /// Replace the whole cache with a fresh listing.
    ///
    /// The listing is validated before anything is touched, so a malformed
    /// snapshot leaves the previous cache in place.
    pub fn replace(&mut self, listing: Vec<FileNode>, prune_missing_expanded: bool) -> Result<()> {
        let mut nodes = HashMap::new();
        let mut roots = Vec::with_capacity(listing.len());
        let mut stack: Vec<(FileNode, Option<String>)> =
            listing.into_iter().rev().map(|n| (n, None)).collect();

        while let Some((node, parent)) = stack.pop() {
            if let Some(parent) = &parent
                && !is_same_or_descendant(&node.path, parent)
            {
                return Err(AppError::ValidationError(format!(
                    "'{}' is listed under '{}'",
                    node.path, parent
                )));
            }
            if nodes.contains_key(&node.path) {
                return Err(AppError::ValidationError(format!(
                    "'{}' appears twice in the listing",
                    node.path
                )));
            }

            let children = node.children.unwrap_or_default();
            let entry = TreeEntry {
                name: node.name,
                is_directory: node.is_directory,
                children: children.iter().map(|c| c.path.clone()).collect(),
            };
            if parent.is_none() {
                roots.push(node.path.clone());
            }
            for child in children.into_iter().rev() {
                stack.push((child, Some(node.path.clone())));
            }
            nodes.insert(node.path, entry);
        }

        if prune_missing_expanded {
            self.expanded
                .retain(|p| nodes.get(p).is_some_and(|n| n.is_directory));
        }
        self.nodes = nodes;
        self.roots = roots;
        self.loaded = true;
        debug!(
            "Tree cache replaced: {} nodes, {} expanded",
            self.nodes.len(),
            self.expanded.len()
        );
        Ok(())
    }

    /// Flip the expansion of `path`; returns whether it is now expanded.
    pub fn toggle_folder(&mut self, path: &str) -> bool {
        if self.expanded.remove(path) {
            false
        } else {
            self.expanded.insert(path.to_string());
            true
        }
    }

    pub fn is_expanded(&self, path: &str) -> bool {
        self.expanded.contains(path)
    }

    /// Expanded paths in sorted order.
    pub fn expanded(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.expanded.iter().cloned().collect();
        paths.sort();
        paths
    }

    /// Insert a confirmed new entry. Returns `false` if it was already cached
    /// or its parent is not part of the cache.
    pub fn insert(&mut self, path: &str, is_directory: bool) -> bool {
        if self.nodes.contains_key(path) {
            return false;
        }
        let siblings = match parent_path(path) {
            None => &mut self.roots,
            Some(parent) => match self.nodes.get_mut(parent) {
                Some(entry) if entry.is_directory => &mut entry.children,
                _ => {
                    warn!("Parent of '{}' is not cached; waiting for refresh", path);
                    return false;
                }
            },
        };
        siblings.push(path.to_string());
        self.nodes.insert(
            path.to_string(),
            TreeEntry {
                name: file_name(path).to_string(),
                is_directory,
                children: Vec::new(),
            },
        );
        self.sort_siblings(parent_path(path).map(str::to_string));
        true
    }

    /// Remove `path` and everything below it. Returns the removed paths.
    pub fn remove(&mut self, path: &str) -> Vec<String> {
        if !self.nodes.contains_key(path) {
            return Vec::new();
        }
        let removed = self.subtree(path);
        for p in &removed {
            self.nodes.remove(p);
        }
        self.detach_from_parent(path);
        self.expanded.retain(|p| !is_same_or_descendant(p, path));
        removed
    }

    /// Move `old_path` (and its subtree) to `new_path`.
    ///
    /// Returns `Ok(false)` when `old_path` is not cached, which makes a repeated
    /// confirmation a no-op.
    pub fn rename(&mut self, old_path: &str, new_path: &str) -> Result<bool> {
        if !self.nodes.contains_key(old_path) {
            return Ok(false);
        }
        if self.nodes.contains_key(new_path) {
            return Err(AppError::Conflict(new_path.to_string()));
        }
        let new_parent = parent_path(new_path).map(str::to_string);
        if let Some(parent) = &new_parent
            && !self.nodes.get(parent).is_some_and(|n| n.is_directory)
        {
            warn!(
                "Rename target parent '{}' is not cached; dropping '{}'",
                parent, old_path
            );
            self.remove(old_path);
            return Ok(true);
        }

        let moved = self.subtree(old_path);
        for path in &moved {
            if let Some(mut entry) = self.nodes.remove(path) {
                for child in entry.children.iter_mut() {
                    *child = rebase_path(child, old_path, new_path);
                }
                if path == old_path {
                    entry.name = file_name(new_path).to_string();
                }
                self.nodes
                    .insert(rebase_path(path, old_path, new_path), entry);
            }
        }
        self.detach_from_parent(old_path);
        match &new_parent {
            None => self.roots.push(new_path.to_string()),
            Some(parent) => {
                if let Some(entry) = self.nodes.get_mut(parent) {
                    entry.children.push(new_path.to_string());
                }
            }
        }
        self.sort_siblings(new_parent);

        self.expanded = self
            .expanded
            .drain()
            .map(|p| {
                if is_same_or_descendant(&p, old_path) {
                    rebase_path(&p, old_path, new_path)
                } else {
                    p
                }
            })
            .collect();
        Ok(true)
    }

    /// Rebuild the nested listing for the view.
    pub fn to_nodes(&self) -> Vec<FileNode> {
        self.roots.iter().filter_map(|p| self.build_node(p)).collect()
    }

    fn build_node(&self, path: &str) -> Option<FileNode> {
        let entry = self.nodes.get(path)?;
        Some(FileNode {
            path: path.to_string(),
            name: entry.name.clone(),
            is_directory: entry.is_directory,
            children: entry.is_directory.then(|| {
                entry
                    .children
                    .iter()
                    .filter_map(|c| self.build_node(c))
                    .collect()
            }),
        })
    }

    fn subtree(&self, path: &str) -> Vec<String> {
        let mut out = Vec::new();
        let mut queue = vec![path.to_string()];
        while let Some(current) = queue.pop() {
            if let Some(entry) = self.nodes.get(&current) {
                queue.extend(entry.children.iter().cloned());
            }
            out.push(current);
        }
        out
    }

    fn detach_from_parent(&mut self, path: &str) {
        match parent_path(path) {
            None => self.roots.retain(|p| p != path),
            Some(parent) => {
                if let Some(entry) = self.nodes.get_mut(parent) {
                    entry.children.retain(|p| p != path);
                }
            }
        }
    }

    fn sort_siblings(&mut self, parent: Option<String>) {
        let mut siblings = match &parent {
            None => std::mem::take(&mut self.roots),
            Some(p) => match self.nodes.get_mut(p) {
                Some(entry) => std::mem::take(&mut entry.children),
                None => return,
            },
        };
        siblings.sort_by(|a, b| {
            let a_dir = self.nodes.get(a).is_some_and(|n| n.is_directory);
            let b_dir = self.nodes.get(b).is_some_and(|n| n.is_directory);
            match (a_dir, b_dir) {
                (true, false) => Ordering::Less,
                (false, true) => Ordering::Greater,
                _ => file_name(a).cmp(file_name(b)),
            }
        });
        match &parent {
            None => self.roots = siblings,
            Some(p) => {
                if let Some(entry) = self.nodes.get_mut(p) {
                    entry.children = siblings;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<FileNode> {
        vec![
            FileNode::directory(
                "/src",
                vec![
                    FileNode::file("/src/a.ts"),
                    FileNode::directory("/src/lib", vec![FileNode::file("/src/lib/b.ts")]),
                ],
            ),
            FileNode::file("/README.md"),
        ]
    }

    fn loaded() -> FileTreeCache {
        let mut cache = FileTreeCache::new();
        cache.replace(sample(), true).unwrap();
        cache
    }

    #[test]
    fn replace_builds_arena_and_round_trips_listing() {
        let cache = loaded();
        assert!(cache.is_loaded());
        assert_eq!(cache.len(), 5);
        assert_eq!(cache.to_nodes(), sample());
    }

    #[test]
    fn malformed_listing_keeps_previous_cache() {
        let mut cache = loaded();
        let bad = vec![FileNode::directory(
            "/src",
            vec![FileNode::file("/other/a.ts")],
        )];
        assert!(matches!(
            cache.replace(bad, true),
            Err(AppError::ValidationError(_))
        ));
        assert_eq!(cache.to_nodes(), sample());

        let dup = vec![FileNode::file("/x"), FileNode::file("/x")];
        assert!(cache.replace(dup, true).is_err());
        assert!(cache.contains("/src/lib/b.ts"));
    }

    #[test]
    fn expansion_survives_replacement_by_path() {
        let mut cache = loaded();
        assert!(cache.toggle_folder("/src"));
        cache.replace(sample(), true).unwrap();
        assert!(cache.is_expanded("/src"));
        assert!(!cache.toggle_folder("/src"));
        assert!(!cache.is_expanded("/src"));
    }

    #[test]
    fn pruning_drops_vanished_folders() {
        let mut cache = loaded();
        cache.toggle_folder("/src/lib");
        cache
            .replace(vec![FileNode::directory("/src", vec![])], true)
            .unwrap();
        assert!(!cache.is_expanded("/src/lib"));

        let mut keep = loaded();
        keep.toggle_folder("/src/lib");
        keep.replace(vec![], false).unwrap();
        assert!(keep.is_expanded("/src/lib"));
    }

    #[test]
    fn insert_places_directories_first() {
        let mut cache = loaded();
        assert!(cache.insert("/src/0.ts", false));
        assert!(cache.insert("/src/zdir", true));
        assert_eq!(
            cache.children("/src").unwrap(),
            &["/src/lib", "/src/zdir", "/src/0.ts", "/src/a.ts"]
        );
        assert!(!cache.insert("/src/a.ts", false));
        assert!(!cache.insert("/missing/x.ts", false));
    }

    #[test]
    fn remove_takes_whole_subtree_and_expansion() {
        let mut cache = loaded();
        cache.toggle_folder("/src/lib");
        let mut removed = cache.remove("/src");
        removed.sort();
        assert_eq!(removed, vec!["/src", "/src/a.ts", "/src/lib", "/src/lib/b.ts"]);
        assert!(cache.expanded().is_empty());
        assert_eq!(cache.to_nodes(), vec![FileNode::file("/README.md")]);
        assert!(cache.remove("/src").is_empty());
    }

    #[test]
    fn rename_directory_relocates_descendants() {
        let mut cache = loaded();
        cache.toggle_folder("/src/lib");
        assert!(cache.rename("/src/lib", "/src/core").unwrap());
        assert!(cache.contains("/src/core/b.ts"));
        assert!(!cache.contains("/src/lib/b.ts"));
        assert!(cache.is_expanded("/src/core"));
        assert_eq!(cache.children("/src/core").unwrap(), &["/src/core/b.ts"]);
        // repeated confirmation is a no-op
        assert!(!cache.rename("/src/lib", "/src/core").unwrap());
    }

    #[test]
    fn rename_onto_existing_path_conflicts() {
        let mut cache = loaded();
        assert!(matches!(
            cache.rename("/src/a.ts", "/README.md"),
            Err(AppError::Conflict(_))
        ));
        assert!(cache.contains("/src/a.ts"));
    }

    #[test]
    fn rename_across_directories() {
        let mut cache = loaded();
        assert!(cache.rename("/README.md", "/src/README.md").unwrap());
        assert_eq!(
            cache.children("/src").unwrap(),
            &["/src/lib", "/src/README.md", "/src/a.ts"]
        );
        assert_eq!(cache.to_nodes().len(), 1);
    }
}
