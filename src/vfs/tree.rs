//! An in-process directory tree keyed by backend path.
//!
//! [`MemoryFs`](super::MemoryFs) stores file bytes in it directly, while
//! [`ContentStore`](super::ContentStore) stores content hashes and keeps the
//! bytes remotely. Either way the tree is what gives names to files.

use std::{collections::BTreeMap, time::SystemTime};

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

use super::{DirEntry, Error, Metadata, WriteFlags, path};

/// Whatever a tree stores per file.
pub(super) trait Payload: Clone {
    fn size(&self) -> u64;
}

impl Payload for Vec<u8> {
    fn size(&self) -> u64 {
        self.len() as u64
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(super) enum Node<T> {
    File { content: T, modified: SystemTime },
    Directory { modified: SystemTime },
}

impl<T: Payload> Node<T> {
    fn metadata(&self) -> Metadata {
        match self {
            Node::File { content, modified } => Metadata::file(content.size(), Some(*modified)),
            Node::Directory { modified } => Metadata::directory(Some(*modified)),
        }
    }

    fn is_dir(&self) -> bool {
        matches!(self, Node::Directory { .. })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub(super) struct Tree<T> {
    nodes: BTreeMap<Utf8PathBuf, Node<T>>,
}

impl<T: Payload> Default for Tree<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Payload> Tree<T> {
    pub fn new() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert(
            Utf8PathBuf::from("/"),
            Node::Directory {
                modified: SystemTime::now(),
            },
        );

        Self { nodes }
    }

    pub fn exists(&self, path: &Utf8Path) -> bool {
        self.nodes.contains_key(path)
    }

    pub fn stat(&self, path: &Utf8Path) -> Result<Metadata, Error> {
        self.nodes
            .get(path)
            .map(Node::metadata)
            .ok_or_else(|| Error::NotFound(path.to_owned()))
    }

    pub fn file(&self, path: &Utf8Path) -> Result<&T, Error> {
        match self.nodes.get(path) {
            Some(Node::File { content, .. }) => Ok(content),
            Some(Node::Directory { .. }) => Err(Error::IsADirectory(path.to_owned())),
            None => Err(Error::NotFound(path.to_owned())),
        }
    }

    pub fn list(&self, dir: &Utf8Path) -> Result<Vec<DirEntry>, Error> {
        match self.nodes.get(dir) {
            Some(Node::Directory { .. }) => {}
            Some(Node::File { .. }) => return Err(Error::NotADirectory(dir.to_owned())),
            None => return Err(Error::NotFound(dir.to_owned())),
        }

        let entries = self
            .children(dir)
            .filter_map(|(path, node)| {
                path::file_name(path).map(|name| DirEntry {
                    name: name.to_string(),
                    metadata: node.metadata(),
                })
            })
            .collect();

        Ok(entries)
    }

    /// Check that a file may be written at `path` under `flags`, returning
    /// its current contents if there are any.
    pub fn check_write(&self, path: &Utf8Path, flags: WriteFlags) -> Result<Option<&T>, Error> {
        self.check_parent(path)?;

        match self.nodes.get(path) {
            Some(Node::Directory { .. }) => Err(Error::IsADirectory(path.to_owned())),
            Some(Node::File { .. }) if flags.contains(WriteFlags::EXCLUSIVE) => {
                Err(Error::AlreadyExists(path.to_string()))
            }
            Some(Node::File { content, .. }) => Ok(Some(content)),
            None if !flags.intersects(WriteFlags::CREATE | WriteFlags::EXCLUSIVE) => {
                Err(Error::NotFound(path.to_owned()))
            }
            None => Ok(None),
        }
    }

    pub fn put_file(&mut self, path: &Utf8Path, content: T) {
        self.nodes.insert(
            path.to_owned(),
            Node::File {
                content,
                modified: SystemTime::now(),
            },
        );
    }

    pub fn mkdir(&mut self, dir: &Utf8Path, recursive: bool) -> Result<(), Error> {
        match self.nodes.get(dir) {
            Some(Node::Directory { .. }) if recursive => return Ok(()),
            Some(_) => return Err(Error::AlreadyExists(dir.to_string())),
            None => {}
        }

        if recursive {
            let mut missing = vec![dir.to_owned()];
            let mut cursor = path::parent(dir);

            while let Some(ancestor) = cursor {
                match self.nodes.get(&ancestor) {
                    Some(Node::Directory { .. }) => break,
                    Some(Node::File { .. }) => return Err(Error::NotADirectory(ancestor)),
                    None => {
                        cursor = path::parent(&ancestor);
                        missing.push(ancestor);
                    }
                }
            }

            let modified = SystemTime::now();
            for dir in missing.into_iter().rev() {
                self.nodes.insert(dir, Node::Directory { modified });
            }
        } else {
            self.check_parent(dir)?;
            self.nodes.insert(
                dir.to_owned(),
                Node::Directory {
                    modified: SystemTime::now(),
                },
            );
        }

        Ok(())
    }

    pub fn remove_file(&mut self, path: &Utf8Path) -> Result<T, Error> {
        match self.nodes.get(path) {
            Some(Node::File { .. }) => {}
            Some(Node::Directory { .. }) => return Err(Error::IsADirectory(path.to_owned())),
            None => return Err(Error::NotFound(path.to_owned())),
        }

        match self.nodes.remove(path) {
            Some(Node::File { content, .. }) => Ok(content),
            _ => Err(Error::NotFound(path.to_owned())),
        }
    }

    /// Remove a directory, returning the payloads of every file removed
    /// with it.
    pub fn remove_dir(&mut self, dir: &Utf8Path, recursive: bool) -> Result<Vec<T>, Error> {
        match self.nodes.get(dir) {
            Some(Node::Directory { .. }) => {}
            Some(Node::File { .. }) => return Err(Error::NotADirectory(dir.to_owned())),
            None => return Err(Error::NotFound(dir.to_owned())),
        }

        if dir == "/" {
            return Err(Error::invalid_argument("cannot remove the backend root"));
        }

        let descendants = self.descendants(dir);
        if !descendants.is_empty() && !recursive {
            return Err(Error::DirectoryNotEmpty(dir.to_owned()));
        }

        let mut removed = Vec::new();
        for path in descendants.into_iter().chain([dir.to_owned()]) {
            if let Some(Node::File { content, .. }) = self.nodes.remove(&path) {
                removed.push(content);
            }
        }

        Ok(removed)
    }

    /// Move `from` (and everything beneath it) to `to`. An existing file at
    /// `to` is replaced; an existing directory is not.
    pub fn rename(&mut self, from: &Utf8Path, to: &Utf8Path) -> Result<(), Error> {
        let Some(is_dir) = self.nodes.get(from).map(Node::is_dir) else {
            return Err(Error::NotFound(from.to_owned()));
        };

        if from == "/" {
            return Err(Error::invalid_argument("cannot rename the backend root"));
        }

        if from == to {
            return Ok(());
        }

        if is_dir && path::is_within(to, from) {
            return Err(Error::invalid_argument(format!(
                "cannot move {from} into itself"
            )));
        }

        self.check_parent(to)?;

        match self.nodes.get(to) {
            Some(Node::Directory { .. }) => return Err(Error::AlreadyExists(to.to_string())),
            Some(Node::File { .. }) if is_dir => {
                return Err(Error::AlreadyExists(to.to_string()));
            }
            _ => {}
        }

        let mut moved = self.descendants(from);
        moved.push(from.to_owned());

        for old in moved {
            if let Some(node) = self.nodes.remove(&old) {
                let suffix = &old.as_str()[from.as_str().len()..];
                self.nodes
                    .insert(Utf8PathBuf::from(format!("{to}{suffix}")), node);
            }
        }

        Ok(())
    }

    fn check_parent(&self, path: &Utf8Path) -> Result<(), Error> {
        let Some(parent) = path::parent(path) else {
            return Err(Error::IsADirectory(path.to_owned()));
        };

        match self.nodes.get(&parent) {
            Some(Node::Directory { .. }) => Ok(()),
            Some(Node::File { .. }) => Err(Error::NotADirectory(parent)),
            None => Err(Error::NotFound(parent)),
        }
    }

    fn children<'a>(
        &'a self,
        dir: &'a Utf8Path,
    ) -> impl Iterator<Item = (&'a Utf8PathBuf, &'a Node<T>)> + 'a {
        self.nodes
            .iter()
            .filter(move |(path, _)| path::parent(path).as_deref() == Some(dir))
    }

    fn descendants(&self, dir: &Utf8Path) -> Vec<Utf8PathBuf> {
        self.nodes
            .keys()
            .filter(|path| path.as_path() != dir && path::is_within(path, dir))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(path: &str) -> &Utf8Path {
        Utf8Path::new(path)
    }

    #[test]
    fn write_requires_parent() {
        let tree = Tree::<Vec<u8>>::new();
        let err = tree.check_write(p("/missing/a.txt"), WriteFlags::OVERWRITE);
        assert!(matches!(err, Err(Error::NotFound(_))));
    }

    #[test]
    fn recursive_mkdir_creates_ancestors() {
        let mut tree = Tree::<Vec<u8>>::new();
        tree.mkdir(p("/a/b/c"), true).unwrap();

        assert!(tree.stat(p("/a")).unwrap().is_dir());
        assert!(tree.stat(p("/a/b")).unwrap().is_dir());
        assert!(tree.stat(p("/a/b/c")).unwrap().is_dir());
        assert!(matches!(
            tree.mkdir(p("/a/b"), false),
            Err(Error::AlreadyExists(_))
        ));
    }

    #[test]
    fn rename_moves_subtree() {
        let mut tree = Tree::<Vec<u8>>::new();
        tree.mkdir(p("/src/nested"), true).unwrap();
        tree.put_file(p("/src/nested/f"), b"x".to_vec());

        tree.rename(p("/src"), p("/dst")).unwrap();

        assert!(!tree.exists(p("/src")));
        assert!(!tree.exists(p("/src/nested/f")));
        assert_eq!(tree.file(p("/dst/nested/f")).unwrap(), b"x");
    }

    #[test]
    fn rename_into_self_is_rejected() {
        let mut tree = Tree::<Vec<u8>>::new();
        tree.mkdir(p("/a"), false).unwrap();

        assert!(matches!(
            tree.rename(p("/a"), p("/a/b")),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn list_only_direct_children() {
        let mut tree = Tree::<Vec<u8>>::new();
        tree.mkdir(p("/a/b"), true).unwrap();
        tree.put_file(p("/a/one"), Vec::new());
        tree.put_file(p("/a/b/two"), Vec::new());

        let names: Vec<_> = tree
            .list(p("/a"))
            .unwrap()
            .into_iter()
            .map(|entry| entry.name)
            .collect();
        assert_eq!(names, ["b", "one"]);
    }

    #[test]
    fn remove_non_empty_dir_needs_recursive() {
        let mut tree = Tree::<Vec<u8>>::new();
        tree.mkdir(p("/a"), false).unwrap();
        tree.put_file(p("/a/f"), b"1".to_vec());

        assert!(matches!(
            tree.remove_dir(p("/a"), false),
            Err(Error::DirectoryNotEmpty(_))
        ));

        let removed = tree.remove_dir(p("/a"), true).unwrap();
        assert_eq!(removed, vec![b"1".to_vec()]);
        assert!(!tree.exists(p("/a")));
    }
}
