/// Packs per-vertex attribute arrays into one buffer per element kind.
///
/// Contributors are registered under a dense index per kind. At build time
/// the contributors of a kind are written vertex by vertex into a single CPU
/// buffer, and each contributor gets a window descriptor: its offset and own
/// stride into the packed buffer, plus the packed vertex stride. All windows
/// of a kind share the packed buffer, so the registry uploads it once.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use rustc_hash::FxHashMap;
use crate::error::{Error, Result};
use crate::{engine_bail, engine_debug, engine_error, engine_trace};
use crate::graphics_device::{BufferTarget, GraphicsDevice, PrimitiveTopology};
use crate::resource::attribute_set::{AttributeBufferSet, AttributeSlot};
use crate::resource::descriptor::{BufferDescriptor, DescriptorRef};
use crate::resource::element::{CpuBuffer, ElementData, ElementKind};
use crate::resource::registry::RegistryConfig;

const SOURCE: &str = "vbo::InterleavedAttributeBuilder";

/// One attribute array waiting to be interleaved
#[derive(Debug, Clone)]
struct Contribution {
    data: ElementData,
    /// Elements per vertex
    stride: usize,
}

/// Validated layout of one element kind
struct KindLayout {
    kind: ElementKind,
    vertices: usize,
    total: usize,
    vertex_stride: usize,
}

#[derive(Debug, Default)]
pub struct InterleavedAttributeBuilder {
    contributions: FxHashMap<ElementKind, BTreeMap<usize, Contribution>>,
    /// Float contributor index -> attribute slot
    roles: BTreeMap<usize, AttributeSlot>,
    /// Registry keys of windows that fill no attribute slot
    extra_keys: FxHashMap<(ElementKind, usize), usize>,
}

impl InterleavedAttributeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `data` as contributor `index` of its element kind
    ///
    /// `stride` is the number of elements this contributor adds to each
    /// vertex. Registering an index twice replaces the first contributor.
    /// Gaps between indices are only reported by [`build`](Self::build).
    pub fn add_interleaved_data(&mut self, data: impl Into<ElementData>, index: usize, stride: usize) -> Result<()> {
        let data = data.into();
        if stride == 0 {
            engine_bail!(SOURCE, InvalidArgument,
                "Interleaved {:?} contributor {} has a zero stride", data.kind(), index);
        }
        self.contributions
            .entry(data.kind())
            .or_default()
            .insert(index, Contribution { data, stride });
        Ok(())
    }

    /// Positions, three floats per vertex; returns the contributor index
    pub fn add_vertices(&mut self, vertices: &[f32]) -> Result<usize> {
        self.add_role(AttributeSlot::Vertices, vertices, 3)
    }

    pub fn add_normals(&mut self, normals: &[f32]) -> Result<usize> {
        self.add_role(AttributeSlot::Normals, normals, 3)
    }

    pub fn add_texture_coords(&mut self, texture_coords: &[f32]) -> Result<usize> {
        self.add_role(AttributeSlot::TextureCoords, texture_coords, 2)
    }

    pub fn add_colors(&mut self, colors: &[f32]) -> Result<usize> {
        self.add_role(AttributeSlot::Colors, colors, 4)
    }

    /// Number of contributors registered for `kind`
    pub fn contributor_count(&self, kind: ElementKind) -> usize {
        self.contributions.get(&kind).map_or(0, |c| c.len())
    }

    /// Vertex count implied by the positions contributor, if any
    pub fn pending_vertex_count(&self) -> Option<usize> {
        let index = self.roles.iter()
            .find(|(_, slot)| **slot == AttributeSlot::Vertices)
            .map(|(index, _)| *index)?;
        let contribution = self.contributions.get(&ElementKind::Float)?.get(&index)?;
        Some(contribution.data.len() / contribution.stride)
    }

    /// Build every packed buffer and route the windows into `set`
    ///
    /// Kinds are built in [`ElementKind::BUILD_ORDER`]. Windows with a known
    /// role fill the matching attribute slot; the others are registered
    /// after the existing buffers. Windows are registered without upload.
    /// Descriptors replaced by this build release their GPU buffers.
    ///
    /// Every kind is validated before anything is written: a gap in the
    /// indices fails with [`Error::InterleaveGap`], contributors describing
    /// different vertex counts with [`Error::InvalidArgument`].
    ///
    /// Returns the packed descriptor of each built kind, in build order.
    pub fn build(&mut self, set: &mut AttributeBufferSet) -> Result<Vec<DescriptorRef>> {
        let layouts = ElementKind::BUILD_ORDER
            .iter()
            .filter_map(|kind| self.layout(*kind).transpose())
            .collect::<Result<Vec<_>>>()?;

        let usage = set.registry().config().default_usage;
        let mut packed = Vec::with_capacity(layouts.len());
        let mut released: Vec<DescriptorRef> = Vec::new();
        let mut built_vertices: Option<usize> = None;

        for layout in layouts {
            let contributions = match self.contributions.get(&layout.kind) {
                Some(contributions) => contributions,
                None => continue,
            };

            let mut buffer = CpuBuffer::allocate(layout.kind, layout.total);
            for vertex in 0..layout.vertices {
                for contribution in contributions.values() {
                    buffer.put(&contribution.data, vertex * contribution.stride, contribution.stride)?;
                }
            }
            buffer.rewind();
            let shared = buffer.into_shared();

            let mut windows = Vec::with_capacity(contributions.len());
            let mut offset = 0;
            for (index, contribution) in contributions {
                let window = BufferDescriptor::window(
                    shared.clone(),
                    BufferTarget::VertexAttributeArray,
                    usage,
                    offset,
                    contribution.stride,
                    layout.vertex_stride,
                ).into_ref();
                offset += contribution.stride;
                windows.push((*index, window));
            }

            for (index, window) in windows {
                let role = match layout.kind {
                    ElementKind::Float => self.roles.get(&index).copied(),
                    _ => None,
                };
                match role {
                    Some(slot) => released.extend(set.install_slot(slot, window, false)?),
                    None => released.extend(Self::register_extra(&mut self.extra_keys, set, layout.kind, index, window)?),
                }
            }

            if let Some(previous) = built_vertices {
                if previous != layout.vertices {
                    engine_debug!(SOURCE, "{:?} data describes {} vertices, overriding {} from an earlier kind",
                        layout.kind, layout.vertices, previous);
                }
            }
            built_vertices = Some(layout.vertices);
            set.set_vertex_count(layout.vertices);

            engine_trace!(SOURCE, "Interleaved {} {:?} contributor(s): {} vertices, stride {}",
                contributions.len(), layout.kind, layout.vertices, layout.vertex_stride);
            packed.push(BufferDescriptor::window(shared, BufferTarget::VertexAttributeArray, usage, 0, 0, 0).into_ref());
        }

        set.registry().release_replaced(released)?;
        Ok(packed)
    }

    /// Forget registry keys, after the target set was destroyed
    pub fn clear_registrations(&mut self) {
        self.extra_keys.clear();
    }

    // ===== INTERNALS =====

    fn add_role(&mut self, slot: AttributeSlot, values: &[f32], stride: usize) -> Result<usize> {
        let index = self.roles.iter()
            .find(|(_, s)| **s == slot)
            .map(|(index, _)| *index)
            .unwrap_or_else(|| self.next_float_index());
        self.add_interleaved_data(values, index, stride)?;
        self.roles.insert(index, slot);
        Ok(index)
    }

    fn next_float_index(&self) -> usize {
        self.contributions
            .get(&ElementKind::Float)
            .and_then(|c| c.keys().next_back())
            .map_or(0, |last| last + 1)
    }

    /// Check indices and lengths of `kind`; `None` when there is nothing to pack
    fn layout(&self, kind: ElementKind) -> Result<Option<KindLayout>> {
        let contributions = match self.contributions.get(&kind) {
            Some(contributions) if !contributions.is_empty() => contributions,
            _ => return Ok(None),
        };

        for (position, index) in contributions.keys().enumerate() {
            if *index != position {
                engine_error!(SOURCE, "There is a gap in interleaved {:?} data at index {}", kind, position);
                return Err(Error::InterleaveGap { kind, index: position });
            }
        }

        let total: usize = contributions.values().map(|c| c.data.len()).sum();
        if total == 0 {
            engine_debug!(SOURCE, "No {:?} data to interleave", kind);
            return Ok(None);
        }

        let mut vertices = None;
        for (index, contribution) in contributions {
            let len = contribution.data.len();
            let count = len / contribution.stride;
            if len % contribution.stride != 0 || vertices.is_some_and(|v| v != count) {
                engine_bail!(SOURCE, InvalidArgument,
                    "Interleaved {:?} contributor {} holds {} elements, not a whole number of {} vertices of {}",
                    kind, index, len, vertices.unwrap_or(count), contribution.stride);
            }
            vertices = Some(count);
        }

        Ok(Some(KindLayout {
            kind,
            vertices: vertices.unwrap_or(0),
            total,
            vertex_stride: contributions.values().map(|c| c.stride).sum(),
        }))
    }

    /// Register a window that fills no slot, reusing its key from an earlier build
    fn register_extra(
        extra_keys: &mut FxHashMap<(ElementKind, usize), usize>,
        set: &mut AttributeBufferSet,
        kind: ElementKind,
        index: usize,
        window: DescriptorRef,
    ) -> Result<Option<DescriptorRef>> {
        let registry = set.registry_mut();
        match extra_keys.get(&(kind, index)) {
            Some(key) if registry.has_buffer(*key) => Ok(registry.set_buffer_info(*key, window)),
            _ => {
                let key = registry.append_buffer_info(window)?;
                extra_keys.insert((kind, index), key);
                Ok(None)
            }
        }
    }
}

// ===== INTERLEAVED GEOMETRY =====

/// Attribute set whose buffers come from an [`InterleavedAttributeBuilder`]
#[derive(Debug)]
pub struct InterleavedGeometry {
    attributes: AttributeBufferSet,
    builder: InterleavedAttributeBuilder,
}

impl InterleavedGeometry {
    pub fn new(device: Arc<Mutex<dyn GraphicsDevice>>) -> Self {
        Self::with_config(device, RegistryConfig::default())
    }

    pub fn with_config(device: Arc<Mutex<dyn GraphicsDevice>>, config: RegistryConfig) -> Self {
        Self {
            attributes: AttributeBufferSet::with_config(device, config),
            builder: InterleavedAttributeBuilder::new(),
        }
    }

    pub fn attributes(&self) -> &AttributeBufferSet {
        &self.attributes
    }

    pub fn attributes_mut(&mut self) -> &mut AttributeBufferSet {
        &mut self.attributes
    }

    pub fn builder(&self) -> &InterleavedAttributeBuilder {
        &self.builder
    }

    pub fn builder_mut(&mut self) -> &mut InterleavedAttributeBuilder {
        &mut self.builder
    }

    /// Indices sized for the built vertex count, or the pending one before a build
    pub fn set_indices(&mut self, indices: &[i32], replace_data: bool) -> Result<()> {
        let vertex_count = if self.attributes.has_vertex_data() {
            Some(self.attributes.vertex_count())
        } else {
            self.builder.pending_vertex_count()
        };
        self.attributes.indexed_mut().set_indices(indices, replace_data, vertex_count)
    }

    /// Build the packed buffers, then upload everything
    pub fn create_buffers(&mut self) -> Result<()> {
        self.builder.build(&mut self.attributes)?;
        self.attributes.create_buffers()
    }

    pub fn validate_buffers(&mut self) -> Result<()> {
        if !self.attributes.registry().buffers_created() {
            return self.create_buffers();
        }
        self.attributes.validate_buffers()
    }

    pub fn reload(&mut self) -> Result<()> {
        self.attributes.reload()
    }

    pub fn destroy(&mut self) -> Result<()> {
        self.attributes.destroy()?;
        self.builder.clear_registrations();
        Ok(())
    }

    pub fn is_valid(&self) -> bool {
        self.attributes.is_valid()
    }

    pub fn issue_draw_calls(&self, topology: PrimitiveTopology) -> Result<()> {
        self.attributes.issue_draw_calls(topology)
    }
}

#[cfg(test)]
#[path = "interleaved_tests.rs"]
mod tests;
