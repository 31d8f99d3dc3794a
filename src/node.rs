//! Object tree: folders, arrays, labels and their attributes

use crate::array::GdsArray;
use crate::block_store::BlockStore;
use crate::compression::CompressionSpec;
use crate::config::OpenOptions;
use crate::error::{GdsError, Result};
use crate::metadata::NodeDescription;
use crate::registry::{ClassRegistry, FOLDER_CLASS, LABEL_CLASS};
use crate::serial::{SerialValue, StructReader, StructWriter};
use crate::types::{AttrValue, ElementKind};
use crate::utils::split_node_path;

/// What a loading node needs besides its own block
#[derive(Debug, Clone, Copy)]
pub struct LoadContext<'a> {
    pub store: &'a BlockStore,
    pub options: &'a OpenOptions,
    pub registry: &'a ClassRegistry,
}

/// Ordered name/value attributes of a node
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Attributes {
    entries: Vec<(String, AttrValue)>,
    read_only: bool,
}

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Position of `name` in insertion order
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|(n, _)| n == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index_of(name).is_some()
    }

    pub fn get(&self, name: &str) -> Option<&AttrValue> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// Attributes loaded from a read-only file reject edits
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    fn check_writable(&self, name: &str) -> Result<()> {
        if self.read_only {
            return Err(GdsError::read_only(format!(
                "cannot change attribute '{}' of a read-only file",
                name
            )));
        }
        Ok(())
    }

    /// Insert or replace; a replaced attribute keeps its position
    pub fn set(&mut self, name: &str, value: impl Into<AttrValue>) -> Result<()> {
        self.check_writable(name)?;
        let value = value.into();
        match self.index_of(name) {
            Some(i) => self.entries[i].1 = value,
            None => self.entries.push((name.to_string(), value)),
        }
        Ok(())
    }

    pub fn remove(&mut self, name: &str) -> Result<Option<AttrValue>> {
        self.check_writable(name)?;
        Ok(self.index_of(name).map(|i| self.entries.remove(i).1))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &AttrValue)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v))
    }

    fn save(&self, w: &mut StructWriter) -> Result<()> {
        for (name, value) in &self.entries {
            let value = match value {
                AttrValue::Null => SerialValue::Null,
                AttrValue::Bool(v) => SerialValue::Bool(*v),
                AttrValue::Int(v) => SerialValue::Int64(*v),
                AttrValue::Float(v) => SerialValue::Float64(*v),
                AttrValue::Str(v) => SerialValue::Str(v.clone()),
            };
            w.write(name, &value)?;
        }
        Ok(())
    }

    fn load(block: &StructReader) -> Result<Self> {
        let mut attrs = Self::new();
        for (name, value) in block.fields() {
            let value = match value {
                SerialValue::Null => AttrValue::Null,
                SerialValue::Bool(v) => AttrValue::Bool(*v),
                SerialValue::Str(v) => AttrValue::Str(v.clone()),
                other => match (other.as_i64(), other.as_f64()) {
                    (Some(v), _) => AttrValue::Int(v),
                    (None, Some(v)) => AttrValue::Float(v),
                    _ => {
                        return Err(GdsError::corrupt(format!(
                            "attribute '{}' has unsupported type {:?}",
                            name,
                            other.type_id()
                        )))
                    }
                },
            };
            attrs.entries.push((name.to_string(), value));
        }
        Ok(attrs)
    }
}

/// Folder body: ordered named children
#[derive(Debug, Default)]
pub struct Folder {
    children: Vec<GdsNode>,
    store: Option<(BlockStore, OpenOptions)>,
}

impl Folder {
    /// Folder whose arrays live on the heap
    pub fn new() -> Self {
        Self::default()
    }

    /// Folder whose arrays are stored in `store`
    pub fn in_store(store: BlockStore, options: OpenOptions) -> Self {
        Self {
            children: Vec::new(),
            store: Some((store, options)),
        }
    }

    pub fn child_count(&self) -> usize {
        self.children.len()
    }

    pub fn children(&self) -> impl Iterator<Item = &GdsNode> {
        self.children.iter()
    }

    pub fn child(&self, index: usize) -> Option<&GdsNode> {
        self.children.get(index)
    }

    pub fn child_mut(&mut self, index: usize) -> Option<&mut GdsNode> {
        self.children.get_mut(index)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.children.iter().position(|c| c.name == name)
    }

    pub fn get(&self, name: &str) -> Option<&GdsNode> {
        self.children.iter().find(|c| c.name == name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut GdsNode> {
        self.children.iter_mut().find(|c| c.name == name)
    }

    fn check_writable(&self) -> Result<()> {
        match &self.store {
            Some((store, _)) if store.is_read_only() => {
                Err(GdsError::read_only("the file is open read-only"))
            }
            _ => Ok(()),
        }
    }

    fn check_name(&self, name: &str) -> Result<()> {
        if name.is_empty() || name.contains('/') {
            return Err(GdsError::invalid_dimension(format!(
                "'{}' is not a valid node name",
                name
            )));
        }
        if self.index_of(name).is_some() {
            return Err(GdsError::AlreadyExists(name.to_string()));
        }
        Ok(())
    }

    /// Attach a node built elsewhere
    pub fn add_node(&mut self, node: GdsNode) -> Result<&mut GdsNode> {
        self.check_writable()?;
        self.check_name(&node.name)?;
        self.children.push(node);
        let last = self.children.len() - 1;
        Ok(&mut self.children[last])
    }

    pub fn add_folder(&mut self, name: &str) -> Result<&mut GdsNode> {
        let folder = match &self.store {
            Some((store, options)) => Folder::in_store(store.clone(), options.clone()),
            None => Folder::new(),
        };
        self.add_node(GdsNode::new(name, NodeKind::Folder(folder)))
    }

    pub fn add_label(&mut self, name: &str) -> Result<&mut GdsNode> {
        self.add_node(GdsNode::new(name, NodeKind::Label))
    }

    /// Create an array; `compression` is a coder name such as `"ZIP"`, or
    /// empty for raw storage
    pub fn add_array(
        &mut self,
        name: &str,
        kind: ElementKind,
        dims: &[u64],
        compression: &str,
    ) -> Result<&mut GdsNode> {
        self.check_writable()?;
        self.check_name(name)?;
        let spec = CompressionSpec::parse(compression)?;
        let array = match &self.store {
            Some((store, options)) => {
                let id = store.new_stream()?;
                tracing::debug!(name, class = %kind, stream = id, coder = %spec, "allocated array stream");
                GdsArray::new_streamed(kind, dims, store.stream(id)?, spec, options)?
            }
            None if spec.is_none() => GdsArray::new(kind, dims)?,
            None => {
                return Err(GdsError::Configuration(format!(
                    "compressed array '{}' needs a file-backed folder",
                    name
                )))
            }
        };
        self.add_node(GdsNode::new(name, NodeKind::Array(array)))
    }

    /// Remove a child and release the streams of every array under it
    pub fn delete(&mut self, name: &str) -> Result<GdsNode> {
        self.check_writable()?;
        let index = self
            .index_of(name)
            .ok_or_else(|| GdsError::NotFound(name.to_string()))?;
        let node = self.children.remove(index);
        if let Some((store, _)) = &self.store {
            node.release_streams(store)?;
        }
        Ok(node)
    }

    pub fn rename(&mut self, name: &str, new_name: &str) -> Result<()> {
        self.check_writable()?;
        let index = self
            .index_of(name)
            .ok_or_else(|| GdsError::NotFound(name.to_string()))?;
        if name != new_name {
            self.check_name(new_name)?;
        }
        self.children[index].name = new_name.to_string();
        Ok(())
    }

    fn folder_at(&self, path: &str) -> Result<&Folder> {
        let mut folder = self;
        for part in split_node_path(path) {
            folder = folder
                .get(part)
                .ok_or_else(|| GdsError::NotFound(path.to_string()))?
                .folder()?;
        }
        Ok(folder)
    }

    fn folder_at_mut(&mut self, path: &str) -> Result<&mut Folder> {
        let mut folder = self;
        for part in split_node_path(path) {
            folder = folder
                .get_mut(part)
                .ok_or_else(|| GdsError::NotFound(path.to_string()))?
                .folder_mut()?;
        }
        Ok(folder)
    }

    /// Move the node at `path` to `dest`, both relative to this folder. The
    /// last part of `dest` names the moved node.
    pub fn move_node(&mut self, path: &str, dest: &str) -> Result<()> {
        self.check_writable()?;
        let (from_dir, name) = split_parent(path)?;
        let (to_dir, new_name) = split_parent(dest)?;
        if from_dir == to_dir && name == new_name {
            return Ok(());
        }
        let source = join_parts(path);
        if to_dir == source || to_dir.starts_with(&format!("{}/", source)) {
            return Err(GdsError::invalid_dimension(format!(
                "cannot move '{}' into its own subtree",
                source
            )));
        }
        let from = self.folder_at(&from_dir)?;
        if from.index_of(name).is_none() {
            return Err(GdsError::NotFound(path.to_string()));
        }
        self.folder_at(&to_dir)?.check_name(new_name)?;

        let from = self.folder_at_mut(&from_dir)?;
        let index = from
            .index_of(name)
            .ok_or_else(|| GdsError::NotFound(path.to_string()))?;
        let mut node = from.children.remove(index);
        node.name = new_name.to_string();
        self.folder_at_mut(&to_dir)?.children.push(node);
        tracing::debug!(from = %source, to = dest, "moved node");
        Ok(())
    }

    /// Deep copy of the node at `path` placed at `dest`. Copied arrays get
    /// streams of their own.
    pub fn copy_node(&mut self, path: &str, dest: &str) -> Result<&mut GdsNode> {
        self.check_writable()?;
        let (from_dir, name) = split_parent(path)?;
        let (to_dir, new_name) = split_parent(dest)?;
        self.folder_at(&to_dir)?.check_name(new_name)?;
        let source = self
            .folder_at(&from_dir)?
            .get(name)
            .ok_or_else(|| GdsError::NotFound(path.to_string()))?;
        let copy = source.duplicate(new_name, self.store.as_ref())?;
        self.folder_at_mut(&to_dir)?.add_node(copy)
    }

    fn save(&self, w: &mut StructWriter) -> Result<()> {
        w.write_u64("COUNT", self.children.len() as u64)?;
        w.begin_field_struct("CHILDREN")?;
        for (i, child) in self.children.iter().enumerate() {
            w.begin_field_struct(&i.to_string())?;
            child.save_fields(w)?;
            w.end_struct()?;
        }
        w.end_struct()
    }

    /// Rebuild a folder and its subtree from its block
    pub(crate) fn load(ctx: &LoadContext<'_>, block: &StructReader) -> Result<Self> {
        let count = block.u64("COUNT")?;
        let children = block.struct_field("CHILDREN")?;
        let mut folder = Folder::in_store(ctx.store.clone(), ctx.options.clone());
        for i in 0..count {
            let child = GdsNode::load(ctx, children.struct_field(&i.to_string())?)?;
            folder.children.push(child);
        }
        Ok(folder)
    }
}

/// Node body
#[derive(Debug)]
pub enum NodeKind {
    Folder(Folder),
    Array(GdsArray),
    /// Attribute-only node
    Label,
}

/// Named node of the object tree
#[derive(Debug)]
pub struct GdsNode {
    name: String,
    attrs: Attributes,
    kind: NodeKind,
}

impl GdsNode {
    pub fn new(name: &str, kind: NodeKind) -> Self {
        Self {
            name: name.to_string(),
            attrs: Attributes::new(),
            kind,
        }
    }

    /// Unnamed folder with heap-backed arrays
    pub fn new_root() -> Self {
        Self::new("", NodeKind::Folder(Folder::new()))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn class_name(&self) -> String {
        match &self.kind {
            NodeKind::Folder(_) => FOLDER_CLASS.to_string(),
            NodeKind::Label => LABEL_CLASS.to_string(),
            NodeKind::Array(array) => array.class_name(),
        }
    }

    pub fn attrs(&self) -> &Attributes {
        &self.attrs
    }

    pub fn attrs_mut(&mut self) -> &mut Attributes {
        &mut self.attrs
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn is_folder(&self) -> bool {
        matches!(self.kind, NodeKind::Folder(_))
    }

    pub fn folder(&self) -> Result<&Folder> {
        match &self.kind {
            NodeKind::Folder(folder) => Ok(folder),
            _ => Err(self.not_a("folder")),
        }
    }

    pub fn folder_mut(&mut self) -> Result<&mut Folder> {
        match &mut self.kind {
            NodeKind::Folder(folder) => Ok(folder),
            _ => Err(GdsError::unsupported_type(format!(
                "'{}' is not a folder",
                self.name
            ))),
        }
    }

    pub fn array(&self) -> Result<&GdsArray> {
        match &self.kind {
            NodeKind::Array(array) => Ok(array),
            _ => Err(self.not_a("array")),
        }
    }

    pub fn array_mut(&mut self) -> Result<&mut GdsArray> {
        match &mut self.kind {
            NodeKind::Array(array) => Ok(array),
            _ => Err(GdsError::unsupported_type(format!(
                "'{}' is not an array",
                self.name
            ))),
        }
    }

    fn not_a(&self, what: &str) -> GdsError {
        GdsError::unsupported_type(format!("'{}' ({}) is not a {}", self.name, self.class_name(), what))
    }

    /// Find a descendant by `/`-separated path. A missing node is an error
    /// when `must_exist` is set, `None` otherwise.
    pub fn resolve(&self, path: &str, must_exist: bool) -> Result<Option<&GdsNode>> {
        let mut node = self;
        for part in split_node_path(path) {
            match node.folder()?.get(part) {
                Some(child) => node = child,
                None if must_exist => return Err(GdsError::NotFound(path.to_string())),
                None => return Ok(None),
            }
        }
        Ok(Some(node))
    }

    pub fn resolve_mut(&mut self, path: &str, must_exist: bool) -> Result<Option<&mut GdsNode>> {
        let mut node = self;
        for part in split_node_path(path) {
            match node.folder_mut()?.get_mut(part) {
                Some(child) => node = child,
                None if must_exist => return Err(GdsError::NotFound(path.to_string())),
                None => return Ok(None),
            }
        }
        Ok(Some(node))
    }

    /// Summary of this node
    pub fn describe(&self) -> NodeDescription {
        match &self.kind {
            NodeKind::Array(array) => array.describe(&self.name),
            _ => NodeDescription {
                name: self.name.clone(),
                class_name: self.class_name(),
                dims: Vec::new(),
                total_count: 0,
                current_count: 0,
                bit_width: 0,
                coder: String::new(),
                raw_size: 0,
                stored_size: 0,
                writer_open: false,
            },
        }
    }

    /// Call `f` with the path and body of every array in the subtree
    pub fn visit_arrays_mut<F>(&mut self, f: &mut F) -> Result<()>
    where
        F: FnMut(&str, &mut GdsArray) -> Result<()>,
    {
        self.visit_inner("", f)
    }

    fn visit_inner<F>(&mut self, prefix: &str, f: &mut F) -> Result<()>
    where
        F: FnMut(&str, &mut GdsArray) -> Result<()>,
    {
        let path = if prefix.is_empty() {
            self.name.clone()
        } else {
            format!("{}/{}", prefix, self.name)
        };
        match &mut self.kind {
            NodeKind::Array(array) => f(&path, array),
            NodeKind::Folder(folder) => {
                for child in &mut folder.children {
                    child.visit_inner(&path, f)?;
                }
                Ok(())
            }
            NodeKind::Label => Ok(()),
        }
    }

    fn duplicate(&self, name: &str, store: Option<&(BlockStore, OpenOptions)>) -> Result<GdsNode> {
        let kind = match &self.kind {
            NodeKind::Label => NodeKind::Label,
            NodeKind::Array(array) => NodeKind::Array(array.duplicate(store)?),
            NodeKind::Folder(folder) => {
                let mut copy = match store {
                    Some((store, options)) => Folder::in_store(store.clone(), options.clone()),
                    None => Folder::new(),
                };
                for child in &folder.children {
                    copy.children.push(child.duplicate(&child.name, store)?);
                }
                NodeKind::Folder(copy)
            }
        };
        let mut attrs = self.attrs.clone();
        attrs.read_only = false;
        Ok(GdsNode {
            name: name.to_string(),
            attrs,
            kind,
        })
    }

    fn release_streams(&self, store: &BlockStore) -> Result<()> {
        match &self.kind {
            NodeKind::Array(array) => match array.stream_id() {
                Some(id) => store.delete_stream(id),
                None => Ok(()),
            },
            NodeKind::Folder(folder) => folder
                .children
                .iter()
                .try_for_each(|child| child.release_streams(store)),
            NodeKind::Label => Ok(()),
        }
    }

    /// Write `NAME`, `CLASS`, `ATTR` and the body fields into the open block
    pub fn save_fields(&self, w: &mut StructWriter) -> Result<()> {
        w.write_str("NAME", &self.name)?;
        w.write_str("CLASS", &self.class_name())?;
        w.begin_field_struct("ATTR")?;
        self.attrs.save(w)?;
        w.end_struct()?;
        match &self.kind {
            NodeKind::Folder(folder) => folder.save(w),
            NodeKind::Array(array) => array.save_fields(w),
            NodeKind::Label => Ok(()),
        }
    }

    /// Rebuild a node through the registry factory of its `CLASS`
    pub fn load(ctx: &LoadContext<'_>, block: &StructReader) -> Result<Self> {
        let name = block.str("NAME")?.to_string();
        let class = block.str("CLASS")?;
        let mut attrs = match block.get("ATTR") {
            Some(SerialValue::Struct(attr_block)) => Attributes::load(attr_block)?,
            _ => Attributes::new(),
        };
        attrs.read_only = ctx.store.is_read_only();
        let kind = ctx.registry.construct(class, ctx, block)?;
        Ok(Self { name, attrs, kind })
    }
}

/// Normalized `/`-joined path
fn join_parts(path: &str) -> String {
    split_node_path(path).collect::<Vec<_>>().join("/")
}

/// `(parent folder path, node name)` of a node path
fn split_parent(path: &str) -> Result<(String, &str)> {
    let mut parts: Vec<&str> = split_node_path(path).collect();
    let name = parts
        .pop()
        .ok_or_else(|| GdsError::invalid_dimension(format!("'{}' does not name a node", path)))?;
    Ok((parts.join("/"), name))
}
