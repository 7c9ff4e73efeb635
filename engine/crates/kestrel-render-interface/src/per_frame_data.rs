use ash::vk;

use crate::{pipeline_settings::PipelineSettings, scene::CameraState};

/// 每帧写入 uniform buffer 的参数块，与 shader 中的布局一一对应
///
/// 全部使用 16 字节对齐的类型，避免 std140 的隐式 padding
#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct PerFrameData {
    pub view: glam::Mat4,
    pub projection: glam::Mat4,
    pub view_projection: glam::Mat4,
    pub inv_view_projection: glam::Mat4,
    /// 上一帧的 view_projection，用于时域重投影
    pub prev_view_projection: glam::Mat4,
    pub model: glam::Mat4,

    pub camera_position: glam::Vec4,
    pub sun_direction: glam::Vec4,
    /// w: intensity
    pub sun_color: glam::Vec4,
    pub ambient: glam::Vec4,

    /// x: radius, y: history_weight, z: disocclusion_threshold, w: bloom_threshold
    pub ao_params: glam::Vec4,
    /// x: ray_count, y: denoise_iterations, z: debug_view, w: frame_counter
    pub ao_counts: glam::UVec4,
    /// x: width, y: height, z: 1/width, w: 1/height
    pub extent: glam::Vec4,
    /// x: exposure, y: gamma, z: bloom_intensity, w: 0
    pub post_params: glam::Vec4,
    /// x: phi_depth, y: phi_normal
    pub denoise_params: glam::Vec4,
}

impl PerFrameData {
    pub fn new(
        camera: &CameraState,
        model: glam::Mat4,
        prev_view_projection: glam::Mat4,
        settings: &PipelineSettings,
        frame_id: u64,
        extent: vk::Extent2D,
    ) -> Self {
        let view_projection = camera.view_projection();
        let width = extent.width.max(1) as f32;
        let height = extent.height.max(1) as f32;
        let lighting = &settings.lighting;
        let rtao = &settings.rtao;

        Self {
            view: camera.view,
            projection: camera.projection,
            view_projection,
            inv_view_projection: view_projection.inverse(),
            prev_view_projection,
            model,

            camera_position: camera.position.extend(1.0),
            sun_direction: lighting.sun_direction.normalize_or_zero().extend(0.0),
            sun_color: lighting.sun_color.extend(lighting.sun_intensity),
            ambient: lighting.ambient.extend(1.0),

            ao_params: glam::vec4(
                rtao.radius,
                rtao.history_weight,
                rtao.disocclusion_threshold,
                settings.bloom.threshold,
            ),
            ao_counts: glam::uvec4(
                rtao.ray_count,
                rtao.denoise_iterations,
                settings.debug_view.as_u32(),
                frame_id as u32,
            ),
            extent: glam::vec4(width, height, 1.0 / width, 1.0 / height),
            post_params: glam::vec4(settings.tonemap.exposure, settings.tonemap.gamma, settings.bloom.intensity, 0.0),
            denoise_params: glam::vec4(rtao.phi_depth, rtao.phi_normal, 0.0, 0.0),
        }
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline_settings::DebugView;

    #[test]
    fn layout_is_std140_friendly() {
        assert_eq!(size_of::<PerFrameData>(), 6 * 64 + 9 * 16);
        assert_eq!(size_of::<PerFrameData>() % 16, 0);
        assert_eq!(std::mem::offset_of!(PerFrameData, camera_position), 6 * 64);
    }

    #[test]
    fn packs_camera_and_settings() {
        let camera = CameraState {
            position: glam::vec3(1.0, 2.0, 3.0),
            view: glam::Mat4::from_translation(glam::vec3(-1.0, -2.0, -3.0)),
            projection: glam::Mat4::perspective_rh(1.0, 16.0 / 9.0, 0.1, 100.0),
        };
        let mut settings = PipelineSettings::default();
        settings.debug_view = DebugView::Bloom;
        let prev = glam::Mat4::from_scale(glam::Vec3::splat(2.0));

        let data = PerFrameData::new(
            &camera,
            glam::Mat4::IDENTITY,
            prev,
            &settings,
            42,
            vk::Extent2D { width: 200, height: 100 },
        );

        assert_eq!(data.prev_view_projection, prev);
        assert_eq!(data.view_projection, camera.projection * camera.view);
        assert_eq!(data.ao_counts, glam::uvec4(4, 5, 3, 42));
        assert_eq!(data.extent, glam::vec4(200.0, 100.0, 0.005, 0.01));
        assert_eq!(data.sun_color.w, settings.lighting.sun_intensity);
        assert_eq!(data.as_bytes().len(), size_of::<PerFrameData>());
    }
}
