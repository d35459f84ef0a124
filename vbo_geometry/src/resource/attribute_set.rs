//! Non-interleaved vertex attributes on top of an index buffer.
//!
//! [`AttributeBufferSet`] keeps one float buffer per attribute (positions,
//! normals, texture coordinates, colors) plus the index buffer of its
//! [`IndexedBufferSet`]. Descriptors are created lazily the first time an
//! attribute is written and registered without upload; `create_buffers` or
//! `validate_buffers` pushes them to the device.
//!
//! A set can alias another set's buffers with [`AttributeBufferSet::copy_from`].
//! Aliased entries are borrowed: the clone never uploads, resizes or deletes
//! them, and writing an attribute of a clone gives it its own buffer.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::sync::{Arc, Mutex};
use bitflags::bitflags;
use glam::Vec3;
use crate::error::Result;
use crate::{engine_bail, engine_debug, engine_err};
use crate::graphics_device::{BufferTarget, BufferUsage, GraphicsDevice, IndexType, PrimitiveTopology};
use crate::resource::descriptor::{BufferDescriptor, DescriptorRef};
use crate::resource::element::{CpuBuffer, ElementData, ElementKind};
use crate::resource::indexed::IndexedBufferSet;
use crate::resource::registry::{BufferRegistry, Ownership, RegistryConfig, RegistryId};

const SOURCE: &str = "vbo::AttributeBufferSet";

bitflags! {
    /// Optional attributes a geometry has received
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct AttributeFlags: u8 {
        const NORMALS = 1 << 0;
        const TEXTURE_COORDS = 1 << 1;
        const VERTEX_COLORS = 1 << 2;
    }
}

/// Attribute slot of a non-interleaved geometry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttributeSlot {
    Vertices,
    Normals,
    TextureCoords,
    Colors,
}

impl AttributeSlot {
    pub const ALL: [AttributeSlot; 4] = [
        AttributeSlot::Vertices,
        AttributeSlot::Normals,
        AttributeSlot::TextureCoords,
        AttributeSlot::Colors,
    ];

    /// Presence flag raised when the slot is written
    fn flag(&self) -> AttributeFlags {
        match self {
            AttributeSlot::Vertices => AttributeFlags::empty(),
            AttributeSlot::Normals => AttributeFlags::NORMALS,
            AttributeSlot::TextureCoords => AttributeFlags::TEXTURE_COORDS,
            AttributeSlot::Colors => AttributeFlags::VERTEX_COLORS,
        }
    }
}

// ===== GEOMETRY DATA =====

/// Everything `set_data` needs in one value
#[derive(Debug, Clone, Default)]
pub struct GeometryData {
    pub vertices: Vec<f32>,
    pub vertices_usage: BufferUsage,
    pub normals: Option<Vec<f32>>,
    pub normals_usage: BufferUsage,
    pub texture_coords: Option<Vec<f32>>,
    pub texture_coords_usage: BufferUsage,
    pub colors: Option<Vec<f32>>,
    pub colors_usage: BufferUsage,
    pub indices: Vec<i32>,
    pub indices_usage: BufferUsage,
}

impl GeometryData {
    /// Positions and indices with static usage everywhere
    pub fn new(vertices: Vec<f32>, indices: Vec<i32>) -> Self {
        Self { vertices, indices, ..Self::default() }
    }

    pub fn with_normals(mut self, normals: Vec<f32>) -> Self {
        self.normals = Some(normals);
        self
    }

    pub fn with_texture_coords(mut self, texture_coords: Vec<f32>) -> Self {
        self.texture_coords = Some(texture_coords);
        self
    }

    pub fn with_colors(mut self, colors: Vec<f32>) -> Self {
        self.colors = Some(colors);
        self
    }
}

// ===== ATTRIBUTE BUFFER SET =====

pub struct AttributeBufferSet {
    indexed: IndexedBufferSet,
    vertex_key: Option<usize>,
    normal_key: Option<usize>,
    texture_key: Option<usize>,
    color_key: Option<usize>,
    vertex_count: usize,
    flags: AttributeFlags,
    source_geometry: Option<Rc<RefCell<AttributeBufferSet>>>,
}

impl AttributeBufferSet {
    pub fn new(device: Arc<Mutex<dyn GraphicsDevice>>) -> Self {
        Self::with_config(device, RegistryConfig::default())
    }

    pub fn with_config(device: Arc<Mutex<dyn GraphicsDevice>>, config: RegistryConfig) -> Self {
        Self {
            indexed: IndexedBufferSet::with_config(device, config),
            vertex_key: None,
            normal_key: None,
            texture_key: None,
            color_key: None,
            vertex_count: 0,
            flags: AttributeFlags::empty(),
            source_geometry: None,
        }
    }

    pub fn into_shared(self) -> Rc<RefCell<AttributeBufferSet>> {
        Rc::new(RefCell::new(self))
    }

    // ===== ACCESSORS =====

    pub fn indexed(&self) -> &IndexedBufferSet {
        &self.indexed
    }

    pub(crate) fn indexed_mut(&mut self) -> &mut IndexedBufferSet {
        &mut self.indexed
    }

    pub fn registry(&self) -> &BufferRegistry {
        self.indexed.registry()
    }

    pub fn registry_mut(&mut self) -> &mut BufferRegistry {
        self.indexed.registry_mut()
    }

    pub fn vertex_count(&self) -> usize {
        self.vertex_count
    }

    pub(crate) fn set_vertex_count(&mut self, vertex_count: usize) {
        self.vertex_count = vertex_count;
    }

    pub fn flags(&self) -> AttributeFlags {
        self.flags
    }

    pub fn has_normals(&self) -> bool {
        self.flags.contains(AttributeFlags::NORMALS)
    }

    pub fn has_texture_coordinates(&self) -> bool {
        self.flags.contains(AttributeFlags::TEXTURE_COORDS)
    }

    pub fn has_vertex_colors(&self) -> bool {
        self.flags.contains(AttributeFlags::VERTEX_COLORS)
    }

    pub fn has_vertex_data(&self) -> bool {
        self.vertex_buffer_info().is_some()
    }

    pub fn source_geometry(&self) -> Option<&Rc<RefCell<AttributeBufferSet>>> {
        self.source_geometry.as_ref()
    }

    pub fn index_count(&self) -> usize {
        self.indexed.index_count()
    }

    pub fn triangle_count(&self) -> usize {
        self.indexed.triangle_count()
    }

    pub fn index_type(&self) -> Option<IndexType> {
        self.indexed.index_type()
    }

    pub fn indices(&self) -> Option<ElementData> {
        self.indexed.indices()
    }

    pub fn index_buffer_info(&self) -> Option<DescriptorRef> {
        self.indexed.index_buffer_info()
    }

    pub fn set_index_buffer_info(&mut self, descriptor: DescriptorRef) -> Result<()> {
        self.indexed.set_index_buffer_info(descriptor)
    }

    /// Descriptor currently filling `slot`
    pub fn slot_info(&self, slot: AttributeSlot) -> Option<DescriptorRef> {
        self.slot_key(slot).and_then(|key| self.registry().buffer_info(key))
    }

    pub fn vertex_buffer_info(&self) -> Option<DescriptorRef> {
        self.slot_info(AttributeSlot::Vertices)
    }

    pub fn normal_buffer_info(&self) -> Option<DescriptorRef> {
        self.slot_info(AttributeSlot::Normals)
    }

    pub fn texture_coord_buffer_info(&self) -> Option<DescriptorRef> {
        self.slot_info(AttributeSlot::TextureCoords)
    }

    pub fn color_buffer_info(&self) -> Option<DescriptorRef> {
        self.slot_info(AttributeSlot::Colors)
    }

    /// Positions as `x y z` triples
    pub fn vertices(&self) -> Option<Vec<f32>> {
        self.read_slot(AttributeSlot::Vertices)
    }

    pub fn normals(&self) -> Option<Vec<f32>> {
        self.read_slot(AttributeSlot::Normals)
    }

    pub fn texture_coords(&self) -> Option<Vec<f32>> {
        self.read_slot(AttributeSlot::TextureCoords)
    }

    pub fn colors(&self) -> Option<Vec<f32>> {
        self.read_slot(AttributeSlot::Colors)
    }

    // ===== ATTRIBUTE WRITES =====

    /// Write positions; `vertex_count` becomes capacity / 3
    pub fn set_vertices(&mut self, vertices: &[f32], override_data: bool) -> Result<()> {
        let descriptor = self.write_slot(AttributeSlot::Vertices, vertices, override_data)?;
        self.vertex_count = descriptor.borrow().capacity() / 3;
        Ok(())
    }

    pub fn set_normals(&mut self, normals: &[f32], override_data: bool) -> Result<()> {
        self.write_slot(AttributeSlot::Normals, normals, override_data)?;
        Ok(())
    }

    pub fn set_texture_coords(&mut self, texture_coords: &[f32], override_data: bool) -> Result<()> {
        self.write_slot(AttributeSlot::TextureCoords, texture_coords, override_data)?;
        Ok(())
    }

    pub fn set_colors(&mut self, colors: &[f32], override_data: bool) -> Result<()> {
        self.write_slot(AttributeSlot::Colors, colors, override_data)?;
        Ok(())
    }

    /// Fill the color buffer with one RGBA value per vertex
    ///
    /// A fresh buffer holds `vertex_count * 4` floats. An existing buffer is
    /// filled in place, whole colors only.
    pub fn set_color(&mut self, r: f32, g: f32, b: f32, a: f32, override_data: bool) -> Result<()> {
        if !self.has_vertex_data() {
            engine_bail!(SOURCE, InvalidState,
                "'{}': no vertex data, vertices must be set before a uniform color", self.label());
        }
        let len = match self.reusable_capacity(AttributeSlot::Colors) {
            Some(capacity) if !override_data => capacity / 4 * 4,
            _ => self.vertex_count * 4,
        };
        let colors: Vec<f32> = [r, g, b, a].into_iter().cycle().take(len).collect();
        self.write_slot(AttributeSlot::Colors, &colors, override_data)?;
        Ok(())
    }

    /// Uniform color from a packed `0xAARRGGBB` value
    pub fn set_packed_color(&mut self, argb: u32) -> Result<()> {
        let channel = |shift: u32| ((argb >> shift) & 0xFF) as f32 / 255.0;
        self.set_color(channel(16), channel(8), channel(0), channel(24), false)
    }

    /// Store indices sized for the current vertex count
    pub fn set_indices(&mut self, indices: &[i32], replace_data: bool) -> Result<()> {
        let vertex_count = self.has_vertex_data().then_some(self.vertex_count);
        self.indexed.set_indices(indices, replace_data, vertex_count)
    }

    /// Replace every attribute and the indices in one call
    ///
    /// Buffers are always reallocated. Missing or empty optional attributes
    /// are left as they are.
    pub fn set_data(&mut self, data: GeometryData, create_buffers: bool) -> Result<()> {
        self.set_vertices(&data.vertices, true)?;
        if let Some(normals) = data.normals.as_deref().filter(|n| !n.is_empty()) {
            self.set_normals(normals, true)?;
        }
        if let Some(texture_coords) = data.texture_coords.as_deref().filter(|t| !t.is_empty()) {
            self.set_texture_coords(texture_coords, true)?;
        }
        if let Some(colors) = data.colors.as_deref().filter(|c| !c.is_empty()) {
            self.set_colors(colors, true)?;
        }
        self.set_indices(&data.indices, true)?;

        let usages = [
            (AttributeSlot::Vertices, data.vertices_usage),
            (AttributeSlot::Normals, data.normals_usage),
            (AttributeSlot::TextureCoords, data.texture_coords_usage),
            (AttributeSlot::Colors, data.colors_usage),
        ];
        for (slot, usage) in usages {
            if let Some(descriptor) = self.slot_info(slot) {
                descriptor.borrow_mut().set_usage(usage);
            }
        }
        if let Some(descriptor) = self.index_buffer_info() {
            descriptor.borrow_mut().set_usage(data.indices_usage);
        }

        if create_buffers {
            self.create_buffers()?;
        }
        Ok(())
    }

    /// Build on vertex and normal descriptors owned by the registry `owner`
    ///
    /// The shared descriptors are borrowed: this set never uploads, resizes
    /// or deletes them, so the owner has to create their buffers. Missing
    /// texture coordinates are zero-filled, two per vertex. Missing colors
    /// are left unset. Any previous source geometry is dropped.
    #[allow(clippy::too_many_arguments)]
    pub fn set_data_with_shared(
        &mut self,
        owner: RegistryId,
        vertex_info: DescriptorRef,
        normal_info: Option<DescriptorRef>,
        texture_coords: Option<&[f32]>,
        colors: Option<&[f32]>,
        indices: &[i32],
        create_buffers: bool,
    ) -> Result<()> {
        let mut released: Vec<DescriptorRef> = Vec::new();
        released.extend(self.borrow_slot(AttributeSlot::Vertices, vertex_info, owner)?);
        if let Some(normal_info) = normal_info {
            released.extend(self.borrow_slot(AttributeSlot::Normals, normal_info, owner)?);
        }
        self.registry().release_replaced(released)?;
        self.vertex_count = self.vertex_buffer_info().map_or(0, |d| d.borrow().capacity() / 3);

        match texture_coords.filter(|t| !t.is_empty()) {
            Some(texture_coords) => self.set_texture_coords(texture_coords, false)?,
            None => {
                let zeros = vec![0.0; self.vertex_count * 2];
                self.set_texture_coords(&zeros, true)?;
            }
        }
        if let Some(colors) = colors.filter(|c| !c.is_empty()) {
            self.set_colors(colors, false)?;
        }
        self.set_indices(indices, false)?;

        self.source_geometry = None;
        if create_buffers {
            self.create_buffers()?;
        }
        Ok(())
    }

    // ===== EXTERNAL DESCRIPTORS =====

    /// Install a vertex descriptor; `vertex_count` follows its capacity
    ///
    /// An empty slot uploads and registers, an occupied slot is replaced
    /// without GPU work.
    pub fn set_vertex_buffer_info(&mut self, descriptor: DescriptorRef) -> Result<()> {
        let capacity = descriptor.borrow().capacity();
        self.install_slot(AttributeSlot::Vertices, descriptor, true)?;
        self.vertex_count = capacity / 3;
        Ok(())
    }

    pub fn set_normal_buffer_info(&mut self, descriptor: DescriptorRef) -> Result<()> {
        self.install_slot(AttributeSlot::Normals, descriptor, true).map(|_| ())
    }

    pub fn set_texture_coord_buffer_info(&mut self, descriptor: DescriptorRef) -> Result<()> {
        self.install_slot(AttributeSlot::TextureCoords, descriptor, true).map(|_| ())
    }

    pub fn set_color_buffer_info(&mut self, descriptor: DescriptorRef) -> Result<()> {
        self.install_slot(AttributeSlot::Colors, descriptor, true).map(|_| ())
    }

    // ===== ALIASING =====

    /// Alias every buffer of `source` and remember it as the source geometry
    ///
    /// The source is never mutated. Buffers this set owned in the aliased
    /// slots are released.
    pub fn copy_from(&mut self, source: &Rc<RefCell<AttributeBufferSet>>) -> Result<()> {
        let src = source.try_borrow()
            .map_err(|_| engine_err!(SOURCE, InvalidArgument, "A geometry cannot copy from itself"))?;
        let owner = src.registry().id();

        let mut released: Vec<DescriptorRef> = Vec::new();
        for slot in AttributeSlot::ALL {
            if let Some(descriptor) = src.slot_info(slot) {
                released.extend(self.borrow_slot(slot, descriptor, owner)?);
            }
        }
        self.indexed.copy_index_from(&src.indexed)?;
        self.registry().release_replaced(released)?;

        self.vertex_count = src.vertex_count;
        self.flags = src.flags;
        engine_debug!(SOURCE, "'{}': aliasing {} buffer(s) of '{}'",
            self.label(), src.registry().buffer_count(), src.label());
        drop(src);

        self.source_geometry = Some(source.clone());
        Ok(())
    }

    // ===== GPU LIFECYCLE =====

    pub fn create_buffers(&mut self) -> Result<()> {
        self.registry_mut().create_buffers()
    }

    /// Validate the source geometry first, then this set's own buffers
    pub fn validate_buffers(&mut self) -> Result<()> {
        if let Some(source) = &self.source_geometry {
            Self::borrow_source(source)?.validate_buffers()?;
        }
        self.registry_mut().validate_buffers()
    }

    /// Recover after context loss
    ///
    /// With a source geometry the source is reloaded when it is no longer
    /// valid and its buffers are aliased again.
    pub fn reload(&mut self) -> Result<()> {
        if let Some(source) = self.source_geometry.clone() {
            {
                let mut src = Self::borrow_source(&source)?;
                if !src.is_valid() {
                    src.reload()?;
                }
            }
            self.copy_from(&source)?;
        }
        self.registry_mut().reload()
    }

    /// Delete owned buffers, drop aliases and forget the source geometry
    pub fn destroy(&mut self) -> Result<()> {
        self.source_geometry = None;
        self.indexed.destroy()?;
        self.vertex_key = None;
        self.normal_key = None;
        self.texture_key = None;
        self.color_key = None;
        self.vertex_count = 0;
        self.flags = AttributeFlags::empty();
        Ok(())
    }

    /// Compact and upload only positions and normals
    pub fn create_vertex_and_normal_buffers_only(&mut self) -> Result<()> {
        let (vertex, normal) = match (self.vertex_buffer_info(), self.normal_buffer_info()) {
            (Some(vertex), Some(normal)) => (vertex, normal),
            _ => engine_bail!(SOURCE, InvalidState,
                "'{}': cannot create vertex and normal buffers when no data has been provided", self.label()),
        };
        for descriptor in [&vertex, &normal] {
            if let Some(buffer) = descriptor.borrow().cpu_buffer() {
                buffer.borrow_mut().compact();
            }
            self.registry().create_buffer_object(descriptor)?;
        }

        let mut device = self.registry().lock_device()?;
        device.bind_buffer(BufferTarget::ElementIndexArray, None)?;
        device.bind_buffer(BufferTarget::VertexAttributeArray, None)?;
        Ok(())
    }

    /// Vertex and index buffers have CPU data and live handles on the device
    pub fn is_valid(&self) -> bool {
        let (vertex, index) = match (self.vertex_buffer_info(), self.index_buffer_info()) {
            (Some(vertex), Some(index)) => (vertex, index),
            _ => return false,
        };
        let device = match self.registry().lock_device() {
            Ok(device) => device,
            Err(_) => return false,
        };
        [vertex, index].iter().all(|descriptor| {
            let descriptor = descriptor.borrow();
            descriptor.cpu_buffer().is_some()
                && descriptor.gpu_handle().id().is_some_and(|id| device.is_buffer(id))
        })
    }

    // ===== QUERIES =====

    /// Axis-aligned bounds of the positions
    ///
    /// Without positions the sentinels `(f32::MAX, -f32::MAX)` come back
    /// unchanged.
    pub fn calculate_aa_bounds(&self) -> (Vec3, Vec3) {
        let mut min = Vec3::splat(f32::MAX);
        let mut max = Vec3::splat(-f32::MAX);
        if let Some(vertices) = self.vertices() {
            for vertex in vertices.chunks_exact(3) {
                let vertex = Vec3::from_slice(vertex);
                min = min.min(vertex);
                max = max.max(vertex);
            }
        }
        (min, max)
    }

    /// Bind the index buffer and draw `index_count` indices
    pub fn issue_draw_calls(&self, topology: PrimitiveTopology) -> Result<()> {
        let descriptor = match self.index_buffer_info() {
            Some(descriptor) => descriptor,
            None => engine_bail!(SOURCE, InvalidState, "'{}': no index buffer to draw with", self.label()),
        };
        let descriptor = descriptor.borrow();
        let index_type = match descriptor.element_kind().index_type() {
            Some(index_type) => index_type,
            None => engine_bail!(SOURCE, InvalidState,
                "'{}': {:?} buffer cannot be used as indices", self.label(), descriptor.element_kind()),
        };
        let id = match descriptor.gpu_handle().id() {
            Some(id) => id,
            None => engine_bail!(SOURCE, InvalidState,
                "'{}': index buffer is not uploaded ({:?})", self.label(), descriptor.gpu_handle()),
        };

        let mut device = self.registry().lock_device()?;
        device.bind_buffer(BufferTarget::ElementIndexArray, Some(id))?;
        device.draw_elements(topology, self.index_count(), index_type)
    }

    // ===== INTERNALS =====

    fn label(&self) -> &str {
        &self.registry().config().label
    }

    fn slot_key(&self, slot: AttributeSlot) -> Option<usize> {
        match slot {
            AttributeSlot::Vertices => self.vertex_key,
            AttributeSlot::Normals => self.normal_key,
            AttributeSlot::TextureCoords => self.texture_key,
            AttributeSlot::Colors => self.color_key,
        }
    }

    fn slot_key_mut(&mut self, slot: AttributeSlot) -> &mut Option<usize> {
        match slot {
            AttributeSlot::Vertices => &mut self.vertex_key,
            AttributeSlot::Normals => &mut self.normal_key,
            AttributeSlot::TextureCoords => &mut self.texture_key,
            AttributeSlot::Colors => &mut self.color_key,
        }
    }

    fn read_slot(&self, slot: AttributeSlot) -> Option<Vec<f32>> {
        self.slot_info(slot)?.borrow().read_f32()
    }

    /// Owned, tightly packed descriptor whose float storage can be overwritten
    fn reusable_slot(&self, slot: AttributeSlot) -> Option<DescriptorRef> {
        let key = self.slot_key(slot)?;
        if self.registry().ownership(key) != Some(Ownership::Owned) {
            return None;
        }
        let descriptor = self.registry().buffer_info(key)?;
        let reusable = {
            let d = descriptor.borrow();
            !d.is_interleaved() && d.element_kind() == ElementKind::Float && d.cpu_buffer().is_some()
        };
        reusable.then_some(descriptor)
    }

    fn reusable_capacity(&self, slot: AttributeSlot) -> Option<usize> {
        self.reusable_slot(slot).map(|d| d.borrow().capacity())
    }

    /// Write `values` into `slot`, creating the descriptor on first use
    ///
    /// Reallocates on `override_data`, when the slot has no CPU data, or when
    /// the slot is an interleaved window or an alias. Otherwise the existing
    /// buffer is overwritten from the start.
    fn write_slot(&mut self, slot: AttributeSlot, values: &[f32], override_data: bool) -> Result<DescriptorRef> {
        let reusable = if override_data { None } else { self.reusable_slot(slot) };
        if let Some(descriptor) = &reusable {
            let capacity = descriptor.borrow().capacity();
            if values.len() > capacity {
                engine_bail!(SOURCE, InvalidArgument,
                    "'{}': {} values do not fit the existing {:?} buffer of {} elements",
                    self.label(), values.len(), slot, capacity);
            }
        }

        let data = ElementData::from(values);
        let descriptor = match reusable {
            Some(descriptor) => {
                if let Some(buffer) = descriptor.borrow().cpu_buffer() {
                    let mut buffer = buffer.borrow_mut();
                    buffer.rewind();
                    buffer.write_at(0, &data, 0, data.len())?;
                    buffer.rewind();
                }
                descriptor
            }
            None => {
                let descriptor = match self.slot_info(slot) {
                    // Interleaved windows are swapped out, never rewritten
                    Some(descriptor) if self.is_owned(slot) && !descriptor.borrow().is_interleaved() => descriptor,
                    _ => self.declare_slot(slot)?,
                };
                {
                    let mut d = descriptor.borrow_mut();
                    d.set_cpu_buffer(Some(CpuBuffer::new(data).into_shared()));
                    d.set_layout(0, 0, 0);
                }
                descriptor
            }
        };

        self.flags |= slot.flag();
        Ok(descriptor)
    }

    fn is_owned(&self, slot: AttributeSlot) -> bool {
        self.slot_key(slot)
            .and_then(|key| self.registry().ownership(key))
            == Some(Ownership::Owned)
    }

    /// Fresh float descriptor in `slot`, registered without upload
    fn declare_slot(&mut self, slot: AttributeSlot) -> Result<DescriptorRef> {
        let usage = self.registry().config().default_usage;
        let descriptor = BufferDescriptor::new(ElementKind::Float, BufferTarget::VertexAttributeArray, usage).into_ref();
        self.install_slot(slot, descriptor.clone(), false)?;
        Ok(descriptor)
    }

    /// Put `descriptor` in `slot`
    ///
    /// With `upload_new`, an empty slot goes through `add_buffer` (uploading
    /// when the descriptor has data). An occupied slot is always replaced
    /// register-only; a replaced descriptor this set owned is handed back so
    /// the caller can release its GPU buffer.
    pub(crate) fn install_slot(
        &mut self,
        slot: AttributeSlot,
        descriptor: DescriptorRef,
        upload_new: bool,
    ) -> Result<Option<DescriptorRef>> {
        let mut released = None;
        match self.slot_key(slot) {
            Some(key) => {
                let owned = self.registry().ownership(key) == Some(Ownership::Owned);
                let previous = self.registry_mut().set_buffer_info(key, descriptor);
                if owned {
                    released = previous;
                }
            }
            None => {
                let key = if upload_new {
                    self.registry_mut().add_buffer(descriptor)?
                } else {
                    self.registry_mut().append_buffer_info(descriptor)?
                };
                *self.slot_key_mut(slot) = Some(key);
            }
        }
        self.flags |= slot.flag();
        Ok(released)
    }

    /// Alias `descriptor` in `slot`, handing back a replaced descriptor this set owned
    fn borrow_slot(
        &mut self,
        slot: AttributeSlot,
        descriptor: DescriptorRef,
        owner: RegistryId,
    ) -> Result<Option<DescriptorRef>> {
        let released = match self.slot_key(slot) {
            Some(key) => {
                let owned = self.registry().ownership(key) == Some(Ownership::Owned);
                let previous = self.registry_mut().set_borrowed(key, descriptor, owner);
                previous.filter(|_| owned)
            }
            None => {
                let key = self.registry_mut().add_borrowed(descriptor, owner)?;
                *self.slot_key_mut(slot) = Some(key);
                None
            }
        };
        self.flags |= slot.flag();
        Ok(released)
    }

    fn borrow_source(source: &Rc<RefCell<AttributeBufferSet>>) -> Result<std::cell::RefMut<'_, AttributeBufferSet>> {
        source.try_borrow_mut()
            .map_err(|_| engine_err!(SOURCE, InvalidState, "Source geometry is already borrowed"))
    }
}

impl fmt::Display for AttributeBufferSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AttributeBufferSet '{}': {} vertices", self.label(), self.vertex_count)?;
        let parts = [
            ("normals", AttributeSlot::Normals),
            ("uvs", AttributeSlot::TextureCoords),
            ("colors", AttributeSlot::Colors),
        ];
        for (name, slot) in parts {
            if let Some(descriptor) = self.slot_info(slot) {
                write!(f, ", {}: {}", name, descriptor.borrow().capacity())?;
            }
        }
        writeln!(f, ", indices: {}", self.index_count())?;
        write!(f, "{}", self.registry())
    }
}

impl fmt::Debug for AttributeBufferSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AttributeBufferSet")
            .field("label", &self.label())
            .field("vertex_count", &self.vertex_count)
            .field("index_count", &self.index_count())
            .field("flags", &self.flags)
            .field("has_source", &self.source_geometry.is_some())
            .finish()
    }
}

#[cfg(test)]
#[path = "attribute_set_tests.rs"]
mod tests;
