// Geometry and per-frame uniform data
//
// A single textured quad, drawn indexed, spun around Z by the model matrix.

use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};
use std::mem::{offset_of, size_of};

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub pos: [f32; 2],
    pub color: [f32; 3],
    pub tex_coord: [f32; 2],
}

impl Vertex {
    pub const fn new(pos: [f32; 2], color: [f32; 3], tex_coord: [f32; 2]) -> Self {
        Self { pos, color, tex_coord }
    }

    pub fn binding_description() -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription {
            binding: 0,
            stride: size_of::<Self>() as u32,
            input_rate: vk::VertexInputRate::VERTEX,
        }
    }

    /// Locations 0..=2: position, colour, texture coordinate
    pub fn attribute_descriptions() -> [vk::VertexInputAttributeDescription; 3] {
        [
            vk::VertexInputAttributeDescription {
                binding: 0,
                location: 0,
                format: vk::Format::R32G32_SFLOAT,
                offset: offset_of!(Vertex, pos) as u32,
            },
            vk::VertexInputAttributeDescription {
                binding: 0,
                location: 1,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: offset_of!(Vertex, color) as u32,
            },
            vk::VertexInputAttributeDescription {
                binding: 0,
                location: 2,
                format: vk::Format::R32G32_SFLOAT,
                offset: offset_of!(Vertex, tex_coord) as u32,
            },
        ]
    }
}

pub const QUAD_VERTICES: [Vertex; 4] = [
    Vertex::new([-0.5, -0.5], [1.0, 0.0, 0.0], [1.0, 0.0]),
    Vertex::new([0.5, -0.5], [0.0, 1.0, 0.0], [0.0, 0.0]),
    Vertex::new([0.5, 0.5], [0.0, 0.0, 1.0], [0.0, 1.0]),
    Vertex::new([-0.5, 0.5], [1.0, 1.0, 1.0], [1.0, 1.0]),
];

pub const QUAD_INDICES: [u16; 6] = [0, 1, 2, 2, 3, 0];

/// Matches the `UniformBufferObject` block at set 0, binding 0 of the vertex shader
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct UniformBufferObject {
    pub model: Mat4,
    pub view: Mat4,
    pub proj: Mat4,
}

impl UniformBufferObject {
    /// Rotation speed of the quad, radians per second
    pub const SPIN_RATE: f32 = std::f32::consts::FRAC_PI_2;

    pub fn at_time(elapsed_secs: f32, extent: vk::Extent2D) -> Self {
        let model = Mat4::from_rotation_z(elapsed_secs * Self::SPIN_RATE);
        let view = Mat4::look_at_rh(Vec3::splat(2.0), Vec3::ZERO, Vec3::Z);

        let aspect = extent.width as f32 / extent.height.max(1) as f32;
        let mut proj = Mat4::perspective_rh(45f32.to_radians(), aspect, 0.1, 10.0);
        // Vulkan clip space has Y pointing down
        proj.y_axis.y *= -1.0;

        Self { model, view, proj }
    }

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec4;

    #[test]
    fn vertex_layout_is_tightly_packed() {
        assert_eq!(size_of::<Vertex>(), 28);
        assert_eq!(Vertex::binding_description().stride, 28);

        let offsets: Vec<u32> = Vertex::attribute_descriptions().iter().map(|a| a.offset).collect();
        assert_eq!(offsets, vec![0, 8, 20]);
    }

    #[test]
    fn quad_indices_stay_in_range() {
        assert!(QUAD_INDICES.iter().all(|&i| (i as usize) < QUAD_VERTICES.len()));
        assert_eq!(QUAD_INDICES.len() % 3, 0);
    }

    #[test]
    fn uniform_block_is_three_matrices() {
        assert_eq!(size_of::<UniformBufferObject>(), 3 * 64);
        let ubo = UniformBufferObject::at_time(0.0, vk::Extent2D { width: 800, height: 600 });
        assert_eq!(ubo.as_bytes().len(), 192);
    }

    #[test]
    fn model_starts_unrotated() {
        let ubo = UniformBufferObject::at_time(0.0, vk::Extent2D { width: 800, height: 600 });
        assert!(ubo.model.abs_diff_eq(Mat4::IDENTITY, 1e-6));
    }

    #[test]
    fn projection_flips_y_for_vulkan() {
        let extent = vk::Extent2D { width: 800, height: 600 };
        let ubo = UniformBufferObject::at_time(0.0, extent);
        let reference = Mat4::perspective_rh(45f32.to_radians(), 800.0 / 600.0, 0.1, 10.0);

        assert!(ubo.proj.y_axis.y < 0.0);
        assert!((ubo.proj.y_axis.y + reference.y_axis.y).abs() < 1e-6);
        assert_eq!(ubo.proj.x_axis, reference.x_axis);
    }

    #[test]
    fn zero_height_extent_does_not_divide_by_zero() {
        let ubo = UniformBufferObject::at_time(1.0, vk::Extent2D { width: 800, height: 0 });
        assert!(ubo.proj.to_cols_array().iter().all(|v| v.is_finite()));
    }

    #[test]
    fn model_spins_around_z() {
        let quarter_turn = 1.0;
        let ubo = UniformBufferObject::at_time(quarter_turn, vk::Extent2D { width: 1, height: 1 });
        let rotated = ubo.model * Vec4::new(1.0, 0.0, 0.0, 1.0);

        assert!((rotated.x).abs() < 1e-5);
        assert!((rotated.y - 1.0).abs() < 1e-5);
        assert_eq!(rotated.z, 0.0);
    }
}
