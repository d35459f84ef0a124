/// Unit tests for attribute_set.rs
///
/// Uses MockGraphicsDevice, no GPU required.

use std::rc::Rc;
use std::sync::{Arc, Mutex};
use glam::Vec3;
use crate::error::Error;
use crate::graphics_device::{BufferTarget, BufferUsage, IndexType, MockGraphicsDevice, PrimitiveTopology};
use crate::resource::attribute_set::{AttributeBufferSet, AttributeFlags, GeometryData};
use crate::resource::descriptor::{BufferDescriptor, GpuHandle};
use crate::resource::element::{CpuBuffer, ElementData, ElementKind};
use crate::resource::registry::Ownership;

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

fn create_set() -> (AttributeBufferSet, Arc<Mutex<MockGraphicsDevice>>) {
    let mock = Arc::new(Mutex::new(MockGraphicsDevice::new()));
    (AttributeBufferSet::new(mock.clone()), mock)
}

/// One triangle with normals, ready to upload
fn triangle(set: &mut AttributeBufferSet) {
    set.set_vertices(&[0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0], false).unwrap();
    set.set_normals(&[0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 0.0, 0.0, 1.0], false).unwrap();
    set.set_indices(&[0, 1, 2], false).unwrap();
}

// ============================================================================
// ATTRIBUTE WRITES
// ============================================================================

#[test]
fn test_set_vertices_declares_descriptor_without_upload() {
    let (mut set, mock) = create_set();

    set.set_vertices(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], false).unwrap();

    let descriptor = set.vertex_buffer_info().unwrap();
    assert_eq!(descriptor.borrow().element_kind(), ElementKind::Float);
    assert_eq!(descriptor.borrow().target(), BufferTarget::VertexAttributeArray);
    assert_eq!(descriptor.borrow().gpu_handle(), GpuHandle::Unset);
    assert_eq!(set.vertex_count(), 2);
    assert_eq!(set.vertices(), Some(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]));
    assert_eq!(mock.lock().unwrap().live_buffer_count(), 0);
}

#[test]
fn test_set_vertices_empty_gives_zero_vertices() {
    let (mut set, _mock) = create_set();

    set.set_vertices(&[], false).unwrap();

    assert!(set.has_vertex_data());
    assert_eq!(set.vertex_count(), 0);
    assert_eq!(set.vertices(), Some(vec![]));
}

#[test]
fn test_overwrite_in_place_keeps_capacity() {
    let (mut set, _mock) = create_set();
    set.set_vertices(&[1.0; 6], false).unwrap();

    set.set_vertices(&[2.0, 2.0, 2.0], false).unwrap();

    assert_eq!(set.vertices(), Some(vec![2.0, 2.0, 2.0, 1.0, 1.0, 1.0]));
    assert_eq!(set.vertex_count(), 2);
}

#[test]
fn test_overwrite_overrun_is_rejected() {
    let (mut set, _mock) = create_set();
    set.set_normals(&[0.0; 3], false).unwrap();

    let result = set.set_normals(&[1.0; 6], false);

    assert!(matches!(result, Err(Error::InvalidArgument(_))));
    assert_eq!(set.normals(), Some(vec![0.0; 3]));
}

#[test]
fn test_override_reallocates() {
    let (mut set, _mock) = create_set();
    set.set_vertices(&[1.0; 3], false).unwrap();
    let key = set.vertex_buffer_info().unwrap().borrow().registry_key();

    set.set_vertices(&[2.0; 9], true).unwrap();

    assert_eq!(set.vertex_count(), 3);
    assert_eq!(set.vertex_buffer_info().unwrap().borrow().registry_key(), key);
    assert_eq!(set.registry().buffer_count(), 1);
}

#[test]
fn test_presence_flags_are_sticky() {
    let (mut set, _mock) = create_set();
    assert_eq!(set.flags(), AttributeFlags::empty());

    set.set_vertices(&[0.0; 3], false).unwrap();
    assert_eq!(set.flags(), AttributeFlags::empty());

    set.set_normals(&[0.0; 3], false).unwrap();
    set.set_texture_coords(&[0.0; 2], false).unwrap();
    set.set_colors(&[0.0; 4], false).unwrap();
    set.set_normals(&[1.0; 3], true).unwrap();

    assert!(set.has_normals());
    assert!(set.has_texture_coordinates());
    assert!(set.has_vertex_colors());
}

#[test]
fn test_set_color_needs_vertices() {
    let (mut set, _mock) = create_set();
    let result = set.set_color(1.0, 0.0, 0.0, 1.0, false);
    assert!(matches!(result, Err(Error::InvalidState(_))));
}

#[test]
fn test_set_color_fills_one_rgba_per_vertex() {
    let (mut set, _mock) = create_set();
    set.set_vertices(&[0.0; 6], false).unwrap();

    set.set_color(0.25, 0.5, 0.75, 1.0, false).unwrap();

    assert_eq!(set.colors(), Some(vec![0.25, 0.5, 0.75, 1.0, 0.25, 0.5, 0.75, 1.0]));
    assert!(set.has_vertex_colors());
}

#[test]
fn test_set_packed_color_unpacks_argb() {
    let (mut set, _mock) = create_set();
    set.set_vertices(&[0.0; 3], false).unwrap();

    set.set_packed_color(0xFF_FF_00_33).unwrap();

    assert_eq!(set.colors(), Some(vec![1.0, 0.0, 0.2, 1.0]));
}

// ============================================================================
// INDICES
// ============================================================================

#[test]
fn test_indices_before_vertices_fail() {
    let (mut set, _mock) = create_set();
    let result = set.set_indices(&[0, 1, 2], false);
    assert!(matches!(result, Err(Error::InvalidState(_))));
}

#[test]
fn test_index_width_from_vertex_count() {
    let (mut set, _mock) = create_set();
    set.set_vertices(&vec![0.0; 256 * 3], false).unwrap();

    set.set_indices(&[0, 1, 255], false).unwrap();

    assert_eq!(set.index_type(), Some(IndexType::U16));
    assert_eq!(set.indices(), Some(ElementData::Short(vec![0, 1, 255])));
}

// ============================================================================
// BULK DATA
// ============================================================================

#[test]
fn test_set_data_applies_usages_and_creates() {
    let (mut set, mock) = create_set();
    let mut data = GeometryData::new(vec![0.0; 9], vec![0, 1, 2])
        .with_normals(vec![1.0; 9])
        .with_texture_coords(vec![])
        .with_colors(vec![1.0; 12]);
    data.vertices_usage = BufferUsage::DynamicDraw;
    data.indices_usage = BufferUsage::StreamDraw;

    set.set_data(data, true).unwrap();

    assert_eq!(set.vertex_buffer_info().unwrap().borrow().usage(), BufferUsage::DynamicDraw);
    assert_eq!(set.normal_buffer_info().unwrap().borrow().usage(), BufferUsage::StaticDraw);
    assert_eq!(set.index_buffer_info().unwrap().borrow().usage(), BufferUsage::StreamDraw);
    // Empty texture coordinates are skipped
    assert!(set.texture_coord_buffer_info().is_none());
    assert!(set.registry().buffers_created());
    assert!(set.is_valid());
    assert_eq!(mock.lock().unwrap().live_buffer_count(), 4);
}

#[test]
fn test_set_data_without_create_leaves_device_alone() {
    let (mut set, mock) = create_set();

    set.set_data(GeometryData::new(vec![0.0; 9], vec![0, 1, 2]), false).unwrap();

    assert!(!set.registry().buffers_created());
    assert!(!set.is_valid());
    assert_eq!(mock.lock().unwrap().live_buffer_count(), 0);
}

#[test]
fn test_set_data_with_shared_reuses_descriptors() {
    let (mut owner, mock) = create_set();
    triangle(&mut owner);
    owner.create_buffers().unwrap();
    let mut set = AttributeBufferSet::new(mock.clone());

    set.set_data_with_shared(
        owner.registry().id(),
        owner.vertex_buffer_info().unwrap(),
        owner.normal_buffer_info(),
        None,
        None,
        &[2, 1, 0],
        true,
    ).unwrap();

    assert!(Rc::ptr_eq(&set.vertex_buffer_info().unwrap(), &owner.vertex_buffer_info().unwrap()));
    let vertex_key = set.vertex_buffer_info().unwrap().borrow().registry_key().unwrap();
    assert_eq!(set.registry().ownership(vertex_key), Some(Ownership::Borrowed(owner.registry().id())));
    assert_eq!(set.vertex_count(), 3);
    assert!(set.has_normals());
    // Missing texture coordinates become zeros, two per vertex
    assert_eq!(set.texture_coords(), Some(vec![0.0; 6]));
    assert!(!set.has_vertex_colors());
    assert!(set.is_valid());
    // Owner: vertices, normals, indices. Set: texture coordinates, indices.
    assert_eq!(mock.lock().unwrap().live_buffer_count(), 5);
}

#[test]
fn test_set_data_with_shared_destroy_keeps_owner_data() {
    let (mut owner, mock) = create_set();
    triangle(&mut owner);
    owner.create_buffers().unwrap();
    let mut set = AttributeBufferSet::new(mock.clone());
    set.set_data_with_shared(
        owner.registry().id(),
        owner.vertex_buffer_info().unwrap(),
        owner.normal_buffer_info(),
        None,
        None,
        &[0, 1, 2],
        true,
    ).unwrap();

    set.destroy().unwrap();

    assert_eq!(owner.vertices(), Some(vec![0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0]));
    assert!(owner.normal_buffer_info().unwrap().borrow().gpu_handle().is_live());
    assert!(owner.is_valid());
    assert_eq!(mock.lock().unwrap().live_buffer_count(), 3);
}

#[test]
fn test_set_data_with_shared_releases_replaced_owned_buffers() {
    let (mut owner, mock) = create_set();
    triangle(&mut owner);
    owner.create_buffers().unwrap();
    let mut set = AttributeBufferSet::new(mock.clone());
    triangle(&mut set);
    set.create_buffers().unwrap();
    let own_vertices = set.vertex_buffer_info().unwrap();
    assert_eq!(mock.lock().unwrap().live_buffer_count(), 6);

    set.set_data_with_shared(
        owner.registry().id(),
        owner.vertex_buffer_info().unwrap(),
        owner.normal_buffer_info(),
        Some(&[0.0; 6]),
        None,
        &[0, 1, 2],
        false,
    ).unwrap();

    assert_eq!(own_vertices.borrow().gpu_handle(), GpuHandle::Invalid);
    // The set's own vertices and normals are gone, its indices stay
    assert_eq!(mock.lock().unwrap().live_buffer_count(), 4);
}

#[test]
fn test_create_vertex_and_normal_buffers_only() {
    let (mut set, mock) = create_set();
    triangle(&mut set);
    set.set_texture_coords(&[0.0; 6], false).unwrap();

    set.create_vertex_and_normal_buffers_only().unwrap();

    assert!(set.vertex_buffer_info().unwrap().borrow().gpu_handle().is_live());
    assert!(set.normal_buffer_info().unwrap().borrow().gpu_handle().is_live());
    assert_eq!(set.texture_coord_buffer_info().unwrap().borrow().gpu_handle(), GpuHandle::Unset);
    let device = mock.lock().unwrap();
    assert_eq!(device.live_buffer_count(), 2);
    assert_eq!(device.bound_buffer(BufferTarget::VertexAttributeArray), None);
    assert_eq!(device.bound_buffer(BufferTarget::ElementIndexArray), None);
}

#[test]
fn test_create_vertex_and_normal_buffers_only_requires_both() {
    let (mut set, _mock) = create_set();
    set.set_vertices(&[0.0; 3], false).unwrap();

    let result = set.create_vertex_and_normal_buffers_only();
    assert!(matches!(result, Err(Error::InvalidState(_))));
}

// ============================================================================
// EXTERNAL DESCRIPTORS
// ============================================================================

#[test]
fn test_set_vertex_buffer_info_uploads_into_empty_slot() {
    let (mut set, _mock) = create_set();
    let descriptor = BufferDescriptor::with_data(ElementData::Float(vec![0.0; 12]), BufferTarget::VertexAttributeArray, BufferUsage::StaticDraw).into_ref();

    set.set_vertex_buffer_info(descriptor.clone()).unwrap();

    assert!(descriptor.borrow().gpu_handle().is_live());
    assert_eq!(set.vertex_count(), 4);
}

#[test]
fn test_set_normal_buffer_info_replaces_register_only() {
    let (mut set, _mock) = create_set();
    set.set_normals(&[0.0; 3], false).unwrap();
    let replacement = BufferDescriptor::with_data(ElementData::Float(vec![1.0; 3]), BufferTarget::VertexAttributeArray, BufferUsage::StaticDraw).into_ref();

    set.set_normal_buffer_info(replacement.clone()).unwrap();

    assert!(Rc::ptr_eq(&set.normal_buffer_info().unwrap(), &replacement));
    assert_eq!(replacement.borrow().gpu_handle(), GpuHandle::Unset);
    assert_eq!(set.registry().buffer_count(), 1);
}

#[test]
fn test_rewriting_interleaved_window_swaps_descriptor() {
    let (mut set, _mock) = create_set();
    let shared = CpuBuffer::new(ElementData::Float(vec![0.0, 0.0, 0.0, 9.0, 9.0, 9.0])).into_shared();
    let window = BufferDescriptor::window(shared.clone(), BufferTarget::VertexAttributeArray, BufferUsage::StaticDraw, 3, 3, 6).into_ref();
    set.set_normal_buffer_info(window.clone()).unwrap();

    set.set_normals(&[1.0, 1.0, 1.0], false).unwrap();

    // The shared packed buffer is untouched
    assert_eq!(shared.borrow().data(), &ElementData::Float(vec![0.0, 0.0, 0.0, 9.0, 9.0, 9.0]));
    assert!(!Rc::ptr_eq(&set.normal_buffer_info().unwrap(), &window));
    assert_eq!(set.normals(), Some(vec![1.0, 1.0, 1.0]));
}

// ============================================================================
// ALIASING
// ============================================================================

#[test]
fn test_copy_from_aliases_every_buffer() {
    let (mut source, mock) = create_set();
    triangle(&mut source);
    source.set_color(1.0, 1.0, 1.0, 1.0, false).unwrap();
    source.create_buffers().unwrap();
    let source = source.into_shared();
    let mut clone = AttributeBufferSet::new(mock.clone());

    clone.copy_from(&source).unwrap();

    let src = source.borrow();
    assert!(Rc::ptr_eq(&clone.vertex_buffer_info().unwrap(), &src.vertex_buffer_info().unwrap()));
    assert!(Rc::ptr_eq(&clone.index_buffer_info().unwrap(), &src.index_buffer_info().unwrap()));
    assert_eq!(clone.vertex_count(), 3);
    assert_eq!(clone.index_count(), 3);
    assert!(clone.has_normals());
    assert!(clone.has_vertex_colors());
    assert!(!clone.has_texture_coordinates());
    let key = clone.vertex_buffer_info().unwrap().borrow().registry_key().unwrap();
    assert_eq!(src.registry().ownership(key), Some(Ownership::Owned));
    for key in clone.registry().keys() {
        assert_eq!(clone.registry().ownership(key), Some(Ownership::Borrowed(src.registry().id())));
    }
    assert!(clone.is_valid());
    assert!(clone.source_geometry().is_some());
}

#[test]
fn test_copy_from_releases_owned_buffers_it_replaces() {
    let (mut source, mock) = create_set();
    triangle(&mut source);
    source.create_buffers().unwrap();
    let source = source.into_shared();
    let mut clone = AttributeBufferSet::new(mock.clone());
    triangle(&mut clone);
    clone.create_buffers().unwrap();
    let own_vertices = clone.vertex_buffer_info().unwrap();
    let own_indices = clone.index_buffer_info().unwrap();
    assert_eq!(mock.lock().unwrap().live_buffer_count(), 6);

    clone.copy_from(&source).unwrap();

    assert_eq!(own_vertices.borrow().gpu_handle(), GpuHandle::Invalid);
    assert_eq!(own_indices.borrow().gpu_handle(), GpuHandle::Invalid);
    assert_eq!(mock.lock().unwrap().live_buffer_count(), 3);
    assert!(source.borrow().is_valid());
    assert!(clone.is_valid());
}

#[test]
fn test_copy_from_itself_is_rejected() {
    let (set, _mock) = create_set();
    let shared = set.into_shared();
    let mut guard = shared.borrow_mut();

    let result = guard.copy_from(&shared);
    assert!(matches!(result, Err(Error::InvalidArgument(_))));
}

#[test]
fn test_clone_destroy_leaves_source_intact() {
    let (mut source, mock) = create_set();
    triangle(&mut source);
    source.create_buffers().unwrap();
    let source = source.into_shared();
    let mut clone = AttributeBufferSet::new(mock.clone());
    clone.copy_from(&source).unwrap();
    clone.create_buffers().unwrap();
    let buffers_before = mock.lock().unwrap().live_buffer_count();

    clone.destroy().unwrap();

    assert!(clone.source_geometry().is_none());
    assert_eq!(clone.registry().buffer_count(), 0);
    assert!(!clone.is_valid());
    assert!(source.borrow().is_valid());
    assert_eq!(mock.lock().unwrap().live_buffer_count(), buffers_before);
}

#[test]
fn test_clone_validate_creates_source_buffers() {
    let (mut source, mock) = create_set();
    triangle(&mut source);
    let source = source.into_shared();
    let mut clone = AttributeBufferSet::new(mock.clone());
    clone.copy_from(&source).unwrap();

    clone.validate_buffers().unwrap();

    assert!(source.borrow().registry().buffers_created());
    assert!(clone.is_valid());
    // The clone uploaded nothing of its own
    assert_eq!(mock.lock().unwrap().live_buffer_count(), 3);
}

#[test]
fn test_clone_reload_after_context_loss() {
    let (mut source, mock) = create_set();
    triangle(&mut source);
    source.create_buffers().unwrap();
    let source = source.into_shared();
    let mut clone = AttributeBufferSet::new(mock.clone());
    clone.copy_from(&source).unwrap();

    mock.lock().unwrap().lose_context();
    assert!(!clone.is_valid());

    clone.reload().unwrap();

    assert!(source.borrow().is_valid());
    assert!(clone.is_valid());
}

#[test]
fn test_writing_clone_attribute_never_touches_source() {
    let (mut source, mock) = create_set();
    triangle(&mut source);
    let source = source.into_shared();
    let mut clone = AttributeBufferSet::new(mock);
    clone.copy_from(&source).unwrap();

    clone.set_normals(&[1.0; 9], false).unwrap();

    assert_eq!(source.borrow().normals(), Some(vec![0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 0.0, 0.0, 1.0]));
    assert_eq!(clone.normals(), Some(vec![1.0; 9]));
    let key = clone.normal_buffer_info().unwrap().borrow().registry_key().unwrap();
    assert_eq!(clone.registry().ownership(key), Some(Ownership::Owned));
}

// ============================================================================
// LIFECYCLE
// ============================================================================

#[test]
fn test_destroy_resets_everything() {
    let (mut set, mock) = create_set();
    triangle(&mut set);
    set.create_buffers().unwrap();
    let vertex = set.vertex_buffer_info().unwrap();

    set.destroy().unwrap();

    assert_eq!(set.registry().buffer_count(), 0);
    assert_eq!(vertex.borrow().gpu_handle(), GpuHandle::Invalid);
    assert!(vertex.borrow().cpu_buffer().is_none());
    assert!(!set.has_vertex_data());
    assert_eq!(set.vertex_count(), 0);
    assert_eq!(set.index_count(), 0);
    assert_eq!(mock.lock().unwrap().live_buffer_count(), 0);
}

#[test]
fn test_reload_after_context_loss() {
    let (mut set, mock) = create_set();
    triangle(&mut set);
    set.create_buffers().unwrap();
    mock.lock().unwrap().lose_context();
    assert!(!set.is_valid());

    set.reload().unwrap();

    assert!(set.is_valid());
    assert_eq!(mock.lock().unwrap().live_buffer_count(), 3);
}

// ============================================================================
// QUERIES
// ============================================================================

#[test]
fn test_aa_bounds() {
    let (mut set, _mock) = create_set();
    set.set_vertices(&[-1.0, 2.0, 0.5, 3.0, -4.0, 0.0, 0.0, 0.0, 7.0], false).unwrap();

    let (min, max) = set.calculate_aa_bounds();

    assert_eq!(min, Vec3::new(-1.0, -4.0, 0.0));
    assert_eq!(max, Vec3::new(3.0, 2.0, 7.0));
}

#[test]
fn test_aa_bounds_of_empty_geometry_are_sentinels() {
    let (set, _mock) = create_set();

    let (min, max) = set.calculate_aa_bounds();

    assert_eq!(min, Vec3::splat(f32::MAX));
    assert_eq!(max, Vec3::splat(-f32::MAX));
}

#[test]
fn test_issue_draw_calls() {
    let (mut set, mock) = create_set();
    triangle(&mut set);
    set.create_buffers().unwrap();

    set.issue_draw_calls(PrimitiveTopology::TriangleList).unwrap();

    let device = mock.lock().unwrap();
    assert_eq!(device.count_commands("draw_elements:TriangleList:3:U8"), 1);
    assert_eq!(set.triangle_count(), 1);
}

#[test]
fn test_issue_draw_calls_requires_uploaded_indices() {
    let (mut set, _mock) = create_set();
    assert!(matches!(set.issue_draw_calls(PrimitiveTopology::TriangleList), Err(Error::InvalidState(_))));

    triangle(&mut set);
    assert!(matches!(set.issue_draw_calls(PrimitiveTopology::TriangleList), Err(Error::InvalidState(_))));
}

#[test]
fn test_display_summary() {
    let (mut set, _mock) = create_set();
    triangle(&mut set);

    let text = set.to_string();

    assert!(text.starts_with("AttributeBufferSet 'geometry': 3 vertices, normals: 9, indices: 3"));
    assert!(text.contains("BufferRegistry 'geometry'"));
}
