#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use hoard_core::location::{FileNode, Folder, Location, Node, NodeMeta};
use hoard_core::interceptor::StorageInterceptor;
use hoard_core::space::{DiskUsage, SpaceProbe};
use hoard_core::stream::BlobWrite;
use hoard_core::{EngineConfig, EngineContext, LocationConfig};
use std::collections::VecDeque;
use std::fs;
use std::io::{self, Read, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

pub fn write_file(path: &Path, contents: &[u8]) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, contents).unwrap();
}

/// Config backing up each of `sources` into `output`, gzip for readable failures.
pub fn config_for(output: &Path, sources: &[&Path]) -> EngineConfig {
    let mut config = EngineConfig::new(output);
    for source in sources {
        config = config.with_location(LocationConfig::new(source.to_string_lossy()));
    }
    config
}

pub fn context_for(output: &Path, sources: &[&Path]) -> EngineContext {
    EngineContext::new(config_for(output, sources))
}

// ── In-memory location ───────────────────────────────────────────

pub fn fixed_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 8, 30, 0).unwrap()
}

#[derive(Debug, Clone)]
pub enum MemNode {
    Folder { name: String, children: Vec<MemNode> },
    File { name: String, data: Vec<u8> },
    /// A file whose bytes cannot be read, like one held open exclusively.
    Locked { name: String, length: u64 },
}

impl MemNode {
    pub fn folder(name: &str, children: Vec<MemNode>) -> Self {
        MemNode::Folder {
            name: name.to_string(),
            children,
        }
    }

    pub fn file(name: &str, data: &[u8]) -> Self {
        MemNode::File {
            name: name.to_string(),
            data: data.to_vec(),
        }
    }

    pub fn locked(name: &str) -> Self {
        MemNode::Locked {
            name: name.to_string(),
            length: 12,
        }
    }

    fn name(&self) -> &str {
        match self {
            MemNode::Folder { name, .. } | MemNode::File { name, .. } | MemNode::Locked { name, .. } => {
                name
            }
        }
    }
}

/// A tree the test can swap out between runs.
pub type SharedTree = Arc<Mutex<MemNode>>;

pub struct MemLocation {
    uri: String,
    tree: SharedTree,
}

impl Location for MemLocation {
    fn uri(&self) -> &str {
        &self.uri
    }

    fn root(&self) -> io::Result<Box<dyn Folder>> {
        let tree = self.tree.lock().unwrap().clone();
        match to_node(&tree, "mem:") {
            Node::Folder(folder) => Ok(folder),
            Node::File(_) => Err(io::Error::new(io::ErrorKind::Other, "root is a file")),
        }
    }
}

fn meta(name: &str, parent: &str) -> NodeMeta {
    NodeMeta {
        name: name.to_string(),
        display_path: format!("{}/{}", parent, name),
        hidden: name.starts_with('.'),
        created: Some(fixed_time()),
        modified: Some(fixed_time()),
    }
}

fn to_node(node: &MemNode, parent: &str) -> Node {
    let meta = meta(node.name(), parent);
    match node {
        MemNode::Folder { children, .. } => Node::Folder(Box::new(MemFolder {
            meta,
            children: children.clone(),
        })),
        MemNode::File { data, .. } => Node::File(Box::new(MemFile {
            meta,
            length: data.len() as u64,
            data: Some(data.clone()),
        })),
        MemNode::Locked { length, .. } => Node::File(Box::new(MemFile {
            meta,
            length: *length,
            data: None,
        })),
    }
}

struct MemFolder {
    meta: NodeMeta,
    children: Vec<MemNode>,
}

impl Folder for MemFolder {
    fn meta(&self) -> &NodeMeta {
        &self.meta
    }

    fn children(&self) -> io::Result<Vec<Node>> {
        // Reverse order, so the runner has to sort
        Ok(self
            .children
            .iter()
            .rev()
            .map(|child| to_node(child, &self.meta.display_path))
            .collect())
    }
}

struct MemFile {
    meta: NodeMeta,
    length: u64,
    data: Option<Vec<u8>>,
}

impl FileNode for MemFile {
    fn meta(&self) -> &NodeMeta {
        &self.meta
    }

    fn length(&self) -> u64 {
        self.length
    }

    fn copy_to(&self, sink: &mut dyn Write) -> io::Result<u64> {
        match &self.data {
            Some(data) => {
                sink.write_all(data)?;
                Ok(data.len() as u64)
            }
            None => Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "file is locked by another process",
            )),
        }
    }
}

/// Register the `mem://` scheme on `ctx`, serving `tree`.
pub fn with_mem_location(ctx: EngineContext, tree: SharedTree) -> EngineContext {
    ctx.with_location_factory(
        "mem",
        Arc::new(move |rest: &str| -> hoard_core::Result<Arc<dyn Location>> {
            Ok(Arc::new(MemLocation {
                uri: format!("mem://{}", rest),
                tree: tree.clone(),
            }))
        }),
    )
}

// ── Interceptors ─────────────────────────────────────────────────

/// XORs every byte with a key; stands in for encryption.
pub struct XorInterceptor {
    pub key: u8,
    pub activations: Mutex<u32>,
    pub destroyed: Mutex<u32>,
}

impl XorInterceptor {
    pub fn new(key: u8) -> Arc<Self> {
        Arc::new(Self {
            key,
            activations: Mutex::new(0),
            destroyed: Mutex::new(0),
        })
    }
}

struct XorWriter {
    inner: Box<dyn BlobWrite>,
    key: u8,
}

impl Write for XorWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mixed: Vec<u8> = buf.iter().map(|b| b ^ self.key).collect();
        self.inner.write_all(&mixed)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl BlobWrite for XorWriter {
    fn finish(self: Box<Self>) -> io::Result<()> {
        self.inner.finish()
    }
}

struct XorReader<'a> {
    inner: Box<dyn Read + 'a>,
    key: u8,
}

impl Read for XorReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        for b in &mut buf[..n] {
            *b ^= self.key;
        }
        Ok(n)
    }
}

impl StorageInterceptor for XorInterceptor {
    fn name(&self) -> &str {
        "xor"
    }

    fn initialize(&self) -> io::Result<()> {
        *self.activations.lock().unwrap() += 1;
        Ok(())
    }

    fn wrap_writer(
        &self,
        inner: Box<dyn BlobWrite>,
        _declared_length: u64,
    ) -> io::Result<Box<dyn BlobWrite>> {
        Ok(Box::new(XorWriter {
            inner,
            key: self.key,
        }))
    }

    fn wrap_reader<'a>(
        &self,
        inner: Box<dyn Read + 'a>,
        _declared_length: u64,
    ) -> io::Result<Box<dyn Read + 'a>> {
        Ok(Box::new(XorReader {
            inner,
            key: self.key,
        }))
    }

    fn destroy(&self) {
        *self.destroyed.lock().unwrap() += 1;
    }
}

/// Refuses to initialize, like a key store that cannot be unlocked.
pub struct BrokenInterceptor;

impl StorageInterceptor for BrokenInterceptor {
    fn name(&self) -> &str {
        "broken"
    }

    fn initialize(&self) -> io::Result<()> {
        Err(io::Error::new(io::ErrorKind::Other, "key store is locked"))
    }

    fn wrap_writer(&self, inner: Box<dyn BlobWrite>, _: u64) -> io::Result<Box<dyn BlobWrite>> {
        Ok(inner)
    }

    fn wrap_reader<'a>(&self, inner: Box<dyn Read + 'a>, _: u64) -> io::Result<Box<dyn Read + 'a>> {
        Ok(inner)
    }
}

// ── Disk space ───────────────────────────────────────────────────

/// Reports a scripted sequence of free-space percentages, repeating the last.
pub struct ScriptedProbe {
    script: Mutex<VecDeque<f64>>,
    last: Mutex<f64>,
    pub calls: Mutex<u32>,
}

impl ScriptedProbe {
    pub fn new(free_percents: &[f64]) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(free_percents.iter().copied().collect()),
            last: Mutex::new(free_percents.last().copied().unwrap_or(100.0)),
            calls: Mutex::new(0),
        })
    }
}

impl SpaceProbe for ScriptedProbe {
    fn usage(&self, _path: &Path) -> io::Result<DiskUsage> {
        *self.calls.lock().unwrap() += 1;
        let percent = match self.script.lock().unwrap().pop_front() {
            Some(p) => {
                *self.last.lock().unwrap() = p;
                p
            }
            None => *self.last.lock().unwrap(),
        };
        Ok(DiskUsage {
            available: (percent * 100.0) as u64,
            total: 10_000,
        })
    }
}

/// Plenty of space for the first `healthy` calls, then the volume stops answering.
pub struct FailingProbe {
    healthy: Mutex<u32>,
}

impl FailingProbe {
    pub fn after(healthy: u32) -> Arc<Self> {
        Arc::new(Self {
            healthy: Mutex::new(healthy),
        })
    }
}

impl SpaceProbe for FailingProbe {
    fn usage(&self, _path: &Path) -> io::Result<DiskUsage> {
        let mut healthy = self.healthy.lock().unwrap();
        if *healthy == 0 {
            return Err(io::Error::new(io::ErrorKind::Other, "volume went away"));
        }
        *healthy -= 1;
        Ok(DiskUsage {
            available: 9_000,
            total: 10_000,
        })
    }
}
