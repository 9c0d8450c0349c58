//! Virtual filesystem façade
//!
//! A node tree dispatched by backend variant: plain directories,
//! in-memory files, the console device, and mount points for registered
//! filesystem drivers. Each backend implies a capability set (readable,
//! writable, listable); the façade checks the capability before
//! dispatching, so a node that cannot perform an operation fails with
//! *not permitted* instead of crashing.
//!
//! The on-disk filesystem and the disk driver are external: they plug in
//! through [`register_filesystem`](Vfs::register_filesystem) /
//! [`mount`](Vfs::mount) and the [`blockdev`] sector interface.

pub mod blockdev;
pub mod file;

use alloc::string::{String, ToString};
use alloc::vec::Vec;

use crate::error::{KernelError, KernelResult};

pub use file::{FileTable, OpenFile, OpenFlags};

/// Maximum path length accepted from user space.
pub const PATH_MAX: usize = 256;

/// Bytes of console output kept for inspection.
const CONSOLE_BACKLOG: usize = 4096;

/// Index of a node in the VFS arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeId(pub usize);

/// Node types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeType {
    File,
    Directory,
    CharDevice,
}

/// Storage and capability variant behind a node.
pub enum NodeBackend {
    /// Plain directory; contents are the child list.
    Directory,
    /// In-memory file contents.
    File { data: Vec<u8> },
    /// The console: writes go to the screen/serial, reads come from the
    /// keyboard driver (external; reads return nothing here).
    Console { backlog: Vec<u8> },
    /// Root of a mounted external filesystem.
    MountPoint { fs: usize },
}

/// One VFS node.
pub struct VfsNode {
    pub name: String,
    pub kind: NodeType,
    pub inode: u32,
    pub permissions: u32,
    pub owner: u32,
    pub group: u32,
    pub created: u64,
    pub modified: u64,
    pub accessed: u64,
    pub backend: NodeBackend,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
}

impl VfsNode {
    pub fn can_read(&self) -> bool {
        matches!(
            self.backend,
            NodeBackend::File { .. } | NodeBackend::Console { .. }
        )
    }

    pub fn can_write(&self) -> bool {
        matches!(
            self.backend,
            NodeBackend::File { .. } | NodeBackend::Console { .. }
        )
    }

    pub fn can_list(&self) -> bool {
        matches!(
            self.backend,
            NodeBackend::Directory | NodeBackend::MountPoint { .. }
        )
    }

    pub fn size(&self) -> u32 {
        match &self.backend {
            NodeBackend::File { data } => data.len() as u32,
            _ => 0,
        }
    }
}

/// A registered filesystem driver.
pub struct FilesystemDriver {
    pub name: String,
}

/// An active mount.
pub struct MountPoint {
    pub device: String,
    pub path: String,
    pub fs: usize,
}

/// The VFS state: node arena, driver registry, mount table.
pub struct Vfs {
    nodes: Vec<Option<VfsNode>>,
    root: NodeId,
    console: NodeId,
    filesystems: Vec<FilesystemDriver>,
    mounts: Vec<MountPoint>,
    next_inode: u32,
}

impl Vfs {
    pub fn new() -> Self {
        let mut vfs = Self {
            nodes: Vec::new(),
            root: NodeId(0),
            console: NodeId(0),
            filesystems: Vec::new(),
            mounts: Vec::new(),
            next_inode: 1,
        };
        vfs.root = vfs.push_node(VfsNode {
            name: "/".to_string(),
            kind: NodeType::Directory,
            inode: 0,
            permissions: 0o755,
            owner: 0,
            group: 0,
            created: 0,
            modified: 0,
            accessed: 0,
            backend: NodeBackend::Directory,
            parent: None,
            children: Vec::new(),
        });
        let dev = vfs
            .mkdir("/dev")
            .expect("fresh tree always has room for /dev");
        let console = vfs.push_node(VfsNode {
            name: "console".to_string(),
            kind: NodeType::CharDevice,
            inode: 0,
            permissions: 0o666,
            owner: 0,
            group: 0,
            created: 0,
            modified: 0,
            accessed: 0,
            backend: NodeBackend::Console {
                backlog: Vec::new(),
            },
            parent: Some(dev),
            children: Vec::new(),
        });
        vfs.attach(dev, console);
        vfs.console = console;
        vfs
    }

    /// The console node wired to descriptors 0/1/2.
    pub fn console(&self) -> NodeId {
        self.console
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node(&self, id: NodeId) -> Option<&VfsNode> {
        self.nodes.get(id.0)?.as_ref()
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut VfsNode> {
        self.nodes.get_mut(id.0)?.as_mut()
    }

    /// Resolve an absolute path to a node.
    pub fn resolve(&self, path: &str) -> Option<NodeId> {
        if !path.starts_with('/') {
            return None;
        }
        let mut current = self.root;
        for component in path.split('/').filter(|c| !c.is_empty()) {
            let node = self.node(current)?;
            current = *node
                .children
                .iter()
                .find(|&&child| self.node(child).map(|n| n.name == component).unwrap_or(false))?;
        }
        Some(current)
    }

    /// Open a file, creating it when `O_CREAT` is set and truncating
    /// when `O_TRUNC` is.
    pub fn open(&mut self, path: &str, flags: OpenFlags) -> KernelResult<NodeId> {
        let id = match self.resolve(path) {
            Some(id) => id,
            None if flags.contains(OpenFlags::CREAT) => self.create_file(path)?,
            None => return Err(KernelError::NotFound),
        };
        let node = self.node_mut(id).ok_or(KernelError::NotFound)?;
        if flags.contains(OpenFlags::TRUNC) {
            if let NodeBackend::File { data } = &mut node.backend {
                data.clear();
            }
        }
        Ok(id)
    }

    /// Create an empty file at `path`; the parent must exist and be
    /// listable.
    pub fn create_file(&mut self, path: &str) -> KernelResult<NodeId> {
        let (parent, name) = self.split_parent(path)?;
        if self.lookup_child(parent, &name).is_some() {
            return Err(KernelError::InvalidArgument);
        }
        let inode = self.next_inode();
        let id = self.push_node(VfsNode {
            name,
            kind: NodeType::File,
            inode,
            permissions: 0o644,
            owner: 0,
            group: 0,
            created: 0,
            modified: 0,
            accessed: 0,
            backend: NodeBackend::File { data: Vec::new() },
            parent: Some(parent),
            children: Vec::new(),
        });
        self.attach(parent, id);
        Ok(id)
    }

    /// Read from a node at `offset`. Console reads return 0 bytes (the
    /// keyboard driver is an external collaborator).
    pub fn read(&mut self, id: NodeId, offset: u32, buf: &mut [u8]) -> KernelResult<usize> {
        let node = self.node(id).ok_or(KernelError::NotFound)?;
        if !node.can_read() {
            return Err(KernelError::NotPermitted);
        }
        match &node.backend {
            NodeBackend::File { data } => {
                let start = (offset as usize).min(data.len());
                let len = buf.len().min(data.len() - start);
                buf[..len].copy_from_slice(&data[start..start + len]);
                Ok(len)
            }
            NodeBackend::Console { .. } => Ok(0),
            _ => Err(KernelError::NotPermitted),
        }
    }

    /// Write to a node at `offset`, extending files as needed. Console
    /// writes append to the backlog and reach the hardware sink.
    pub fn write(&mut self, id: NodeId, offset: u32, bytes: &[u8]) -> KernelResult<usize> {
        let node = self.node_mut(id).ok_or(KernelError::NotFound)?;
        if !node.can_write() {
            return Err(KernelError::NotPermitted);
        }
        match &mut node.backend {
            NodeBackend::File { data } => {
                let start = offset as usize;
                if start + bytes.len() > data.len() {
                    data.resize(start + bytes.len(), 0);
                }
                data[start..start + bytes.len()].copy_from_slice(bytes);
                Ok(bytes.len())
            }
            NodeBackend::Console { backlog } => {
                backlog.extend_from_slice(bytes);
                if backlog.len() > CONSOLE_BACKLOG {
                    let drop = backlog.len() - CONSOLE_BACKLOG;
                    backlog.drain(..drop);
                }
                console_sink(bytes);
                Ok(bytes.len())
            }
            _ => Err(KernelError::NotPermitted),
        }
    }

    /// Create a directory. The parent must already exist.
    pub fn mkdir(&mut self, path: &str) -> KernelResult<NodeId> {
        let (parent, name) = self.split_parent(path)?;
        if self.lookup_child(parent, &name).is_some() {
            return Err(KernelError::InvalidArgument);
        }
        let inode = self.next_inode();
        let id = self.push_node(VfsNode {
            name,
            kind: NodeType::Directory,
            inode,
            permissions: 0o755,
            owner: 0,
            group: 0,
            created: 0,
            modified: 0,
            accessed: 0,
            backend: NodeBackend::Directory,
            parent: Some(parent),
            children: Vec::new(),
        });
        self.attach(parent, id);
        Ok(id)
    }

    /// Remove an empty directory.
    pub fn rmdir(&mut self, path: &str) -> KernelResult<()> {
        let id = self.resolve(path).ok_or(KernelError::NotFound)?;
        let node = self.node(id).ok_or(KernelError::NotFound)?;
        if node.kind != NodeType::Directory {
            return Err(KernelError::InvalidArgument);
        }
        if !node.children.is_empty() {
            return Err(KernelError::NotPermitted);
        }
        if id == self.root {
            return Err(KernelError::NotPermitted);
        }
        self.detach(id);
        self.nodes[id.0] = None;
        Ok(())
    }

    /// Delete a file.
    pub fn unlink(&mut self, path: &str) -> KernelResult<()> {
        let id = self.resolve(path).ok_or(KernelError::NotFound)?;
        let node = self.node(id).ok_or(KernelError::NotFound)?;
        if node.kind == NodeType::Directory {
            return Err(KernelError::InvalidArgument);
        }
        self.detach(id);
        self.nodes[id.0] = None;
        Ok(())
    }

    /// Name of the `index`-th entry of a directory, walking the
    /// in-memory child list.
    pub fn readdir(&self, id: NodeId, index: usize) -> Option<String> {
        let node = self.node(id)?;
        if !node.can_list() {
            return None;
        }
        let child = *node.children.get(index)?;
        Some(self.node(child)?.name.clone())
    }

    /// Register a filesystem driver by name, returning its handle.
    pub fn register_filesystem(&mut self, name: &str) -> usize {
        self.filesystems.push(FilesystemDriver {
            name: name.to_string(),
        });
        self.filesystems.len() - 1
    }

    /// Mount a registered filesystem at an existing directory. The
    /// directory becomes the mount root; the driver populates it through
    /// its own channel.
    pub fn mount(&mut self, device: &str, path: &str, fstype: &str) -> KernelResult<()> {
        let fs = self
            .filesystems
            .iter()
            .position(|f| f.name == fstype)
            .ok_or(KernelError::NotFound)?;
        let id = self.resolve(path).ok_or(KernelError::NotFound)?;
        let node = self.node_mut(id).ok_or(KernelError::NotFound)?;
        if node.kind != NodeType::Directory {
            return Err(KernelError::InvalidArgument);
        }
        node.backend = NodeBackend::MountPoint { fs };
        self.mounts.push(MountPoint {
            device: device.to_string(),
            path: path.to_string(),
            fs,
        });
        Ok(())
    }

    /// Recent console output (diagnostics and tests).
    pub fn console_backlog(&self) -> &[u8] {
        match &self.node(self.console).unwrap().backend {
            NodeBackend::Console { backlog } => backlog,
            _ => &[],
        }
    }

    fn split_parent(&self, path: &str) -> KernelResult<(NodeId, String)> {
        if !path.starts_with('/') || path.len() > PATH_MAX {
            return Err(KernelError::InvalidArgument);
        }
        let trimmed = path.trim_end_matches('/');
        if trimmed.is_empty() {
            return Err(KernelError::InvalidArgument);
        }
        let (dir, name) = match trimmed.rfind('/') {
            Some(0) => ("/", &trimmed[1..]),
            Some(pos) => (&trimmed[..pos], &trimmed[pos + 1..]),
            None => return Err(KernelError::InvalidArgument),
        };
        if name.is_empty() {
            return Err(KernelError::InvalidArgument);
        }
        let parent = self.resolve(dir).ok_or(KernelError::NotFound)?;
        let parent_node = self.node(parent).ok_or(KernelError::NotFound)?;
        if !parent_node.can_list() {
            return Err(KernelError::NotPermitted);
        }
        Ok((parent, name.to_string()))
    }

    fn lookup_child(&self, parent: NodeId, name: &str) -> Option<NodeId> {
        let node = self.node(parent)?;
        node.children
            .iter()
            .copied()
            .find(|&child| self.node(child).map(|n| n.name == name).unwrap_or(false))
    }

    fn push_node(&mut self, node: VfsNode) -> NodeId {
        if let Some(free) = self.nodes.iter().position(|n| n.is_none()) {
            self.nodes[free] = Some(node);
            NodeId(free)
        } else {
            self.nodes.push(Some(node));
            NodeId(self.nodes.len() - 1)
        }
    }

    fn attach(&mut self, parent: NodeId, child: NodeId) {
        if let Some(node) = self.node_mut(parent) {
            node.children.push(child);
        }
    }

    fn detach(&mut self, id: NodeId) {
        let parent = self.node(id).and_then(|n| n.parent);
        if let Some(parent) = parent {
            if let Some(node) = self.node_mut(parent) {
                node.children.retain(|&c| c != id);
            }
        }
    }

    fn next_inode(&mut self) -> u32 {
        let inode = self.next_inode;
        self.next_inode += 1;
        inode
    }
}

impl Default for Vfs {
    fn default() -> Self {
        Self::new()
    }
}

/// Forward console bytes to the hardware sink.
fn console_sink(bytes: &[u8]) {
    #[cfg(target_arch = "x86")]
    crate::arch::x86::serial::write_bytes(bytes);
    #[cfg(not(target_arch = "x86"))]
    let _ = bytes;
}
