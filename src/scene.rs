// =============================================================================
// SCENE - the textured quad and its transforms
// =============================================================================

use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec2, Vec3};
use std::mem::{offset_of, size_of};

use crate::config::SceneConfig;

/// Vertex layout shared with `shaders/shader.vert`
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub pos: Vec2,
    pub color: Vec3,
    pub tex_coord: Vec2,
}

impl Vertex {
    pub const fn new(pos: [f32; 2], color: [f32; 3], tex_coord: [f32; 2]) -> Self {
        Self {
            pos: Vec2::new(pos[0], pos[1]),
            color: Vec3::new(color[0], color[1], color[2]),
            tex_coord: Vec2::new(tex_coord[0], tex_coord[1]),
        }
    }

    /// One interleaved binding, advanced per vertex
    pub fn binding_description() -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription::builder()
            .binding(0)
            .stride(size_of::<Self>() as u32)
            .input_rate(vk::VertexInputRate::VERTEX)
            .build()
    }

    /// Locations 0..=2: position, color, texture coordinate
    pub fn attribute_descriptions() -> [vk::VertexInputAttributeDescription; 3] {
        [
            vk::VertexInputAttributeDescription::builder()
                .binding(0)
                .location(0)
                .format(vk::Format::R32G32_SFLOAT)
                .offset(offset_of!(Self, pos) as u32)
                .build(),
            vk::VertexInputAttributeDescription::builder()
                .binding(0)
                .location(1)
                .format(vk::Format::R32G32B32_SFLOAT)
                .offset(offset_of!(Self, color) as u32)
                .build(),
            vk::VertexInputAttributeDescription::builder()
                .binding(0)
                .location(2)
                .format(vk::Format::R32G32_SFLOAT)
                .offset(offset_of!(Self, tex_coord) as u32)
                .build(),
        ]
    }
}

pub const QUAD_VERTICES: [Vertex; 4] = [
    Vertex::new([-0.5, -0.5], [1.0, 0.0, 0.0], [1.0, 0.0]),
    Vertex::new([0.5, -0.5], [0.0, 1.0, 0.0], [0.0, 0.0]),
    Vertex::new([0.5, 0.5], [0.0, 0.0, 1.0], [0.0, 1.0]),
    Vertex::new([-0.5, 0.5], [1.0, 1.0, 1.0], [1.0, 1.0]),
];

/// Two counter-clockwise triangles. u16 is plenty below 65536 vertices.
pub const QUAD_INDICES: [u16; 6] = [0, 1, 2, 2, 3, 0];

pub const INDEX_TYPE: vk::IndexType = vk::IndexType::UINT16;

/// Model/view/projection block read by the vertex shader (std140 compatible)
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct UniformBufferObject {
    pub model: Mat4,
    pub view: Mat4,
    pub proj: Mat4,
}

impl UniformBufferObject {
    pub fn animated(scene: &SceneConfig, elapsed_seconds: f32, extent: vk::Extent2D) -> Self {
        let angle = elapsed_seconds * scene.rotation_degrees_per_second.to_radians();
        let model = Mat4::from_rotation_z(angle);

        let view = Mat4::look_at_rh(
            Vec3::from(scene.camera_eye),
            Vec3::from(scene.camera_target),
            Vec3::from(scene.camera_up),
        );

        let aspect = extent.width as f32 / extent.height.max(1) as f32;
        let mut proj = Mat4::perspective_rh(scene.fov_degrees.to_radians(), aspect, scene.near, scene.far);
        // Vulkan clip space has Y pointing down
        proj.y_axis.y *= -1.0;

        Self { model, view, proj }
    }

    pub fn size() -> vk::DeviceSize {
        size_of::<Self>() as vk::DeviceSize
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use glam::Vec4;

    const EPSILON: f32 = 1e-5;

    fn extent(width: u32, height: u32) -> vk::Extent2D {
        vk::Extent2D { width, height }
    }

    #[test]
    fn vertex_layout_is_tightly_packed() {
        assert_eq!(size_of::<Vertex>(), 28);

        let binding = Vertex::binding_description();
        assert_eq!(binding.stride, 28);
        assert_eq!(binding.input_rate, vk::VertexInputRate::VERTEX);

        let attrs = Vertex::attribute_descriptions();
        let offsets: Vec<u32> = attrs.iter().map(|a| a.offset).collect();
        let locations: Vec<u32> = attrs.iter().map(|a| a.location).collect();
        assert_eq!(offsets, vec![0, 8, 20]);
        assert_eq!(locations, vec![0, 1, 2]);
        assert_eq!(attrs[1].format, vk::Format::R32G32B32_SFLOAT);
    }

    #[test]
    fn quad_indices_reference_existing_vertices() {
        assert!(QUAD_INDICES.iter().all(|&i| (i as usize) < QUAD_VERTICES.len()));
        assert_eq!(QUAD_INDICES.len() % 3, 0);
    }

    #[test]
    fn quad_triangles_wind_counter_clockwise() {
        for tri in QUAD_INDICES.chunks(3) {
            let a = QUAD_VERTICES[tri[0] as usize].pos;
            let b = QUAD_VERTICES[tri[1] as usize].pos;
            let c = QUAD_VERTICES[tri[2] as usize].pos;
            assert!((b - a).perp_dot(c - a) > 0.0);
        }
    }

    #[test]
    fn uniform_block_is_three_matrices() {
        assert_eq!(UniformBufferObject::size(), 192);
        assert_eq!(std::mem::align_of::<UniformBufferObject>() % 16, 0);
    }

    #[test]
    fn model_is_identity_at_start() {
        let ubo = UniformBufferObject::animated(&SceneConfig::default(), 0.0, extent(800, 600));
        assert!(ubo.model.abs_diff_eq(Mat4::IDENTITY, EPSILON));
    }

    #[test]
    fn model_rotates_a_quarter_turn_per_second() {
        let ubo = UniformBufferObject::animated(&SceneConfig::default(), 1.0, extent(800, 600));
        let rotated = ubo.model.transform_point3(Vec3::X);
        assert!(rotated.abs_diff_eq(Vec3::Y, EPSILON));
    }

    #[test]
    fn projection_flips_y_and_uses_aspect() {
        let scene = SceneConfig::default();
        let ubo = UniformBufferObject::animated(&scene, 0.0, extent(800, 600));

        let unflipped = Mat4::perspective_rh(scene.fov_degrees.to_radians(), 800.0 / 600.0, 0.1, 10.0);
        assert_relative_eq!(ubo.proj.y_axis.y, -unflipped.y_axis.y, epsilon = EPSILON);
        assert_relative_eq!(ubo.proj.x_axis.x, unflipped.x_axis.x, epsilon = EPSILON);
        assert!(ubo.proj.y_axis.y < 0.0);
    }

    #[test]
    fn camera_target_lands_in_view_center() {
        let ubo = UniformBufferObject::animated(&SceneConfig::default(), 0.0, extent(800, 600));
        let clip = ubo.proj * ubo.view * Vec4::new(0.0, 0.0, 0.0, 1.0);
        let ndc = clip / clip.w;

        assert_relative_eq!(ndc.x, 0.0, epsilon = EPSILON);
        assert_relative_eq!(ndc.y, 0.0, epsilon = EPSILON);
        // Depth lands in Vulkan's [0, 1] range
        assert!(ndc.z > 0.0 && ndc.z < 1.0);
    }

    #[test]
    fn zero_height_extent_does_not_divide_by_zero() {
        let ubo = UniformBufferObject::animated(&SceneConfig::default(), 0.0, extent(800, 0));
        assert!(ubo.proj.is_finite());
    }
}
