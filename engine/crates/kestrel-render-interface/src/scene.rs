//! 外部协作者（资产加载、相机、场景管理）提供给渲染核心的数据
//!
//! 这里只有句柄与少量的元数据，渲染核心不关心它们是如何产生的。

use ash::vk;
use kestrel_gfx::commands::{GfxDrawIndexed, GfxTlasUpdate};

/// 相机矩阵，相机的数学计算由外部完成
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct CameraState {
    pub position: glam::Vec3,
    pub view: glam::Mat4,
    pub projection: glam::Mat4,
}
impl Default for CameraState {
    fn default() -> Self {
        Self {
            position: glam::Vec3::ZERO,
            view: glam::Mat4::IDENTITY,
            projection: glam::Mat4::IDENTITY,
        }
    }
}
impl CameraState {
    #[inline]
    pub fn view_projection(&self) -> glam::Mat4 {
        self.projection * self.view
    }
}

/// 一次 draw 的元数据
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct GpuDrawRecord {
    pub vertex_offset: i32,
    pub first_index: u32,
    pub index_count: u32,
    pub material_index: u32,
}

/// 一帧内可见的场景：几何 buffer、draw 列表与加速结构
#[derive(Clone, Debug)]
pub struct GpuSceneView {
    pub vertex_buffer: vk::Buffer,
    pub index_buffer: vk::Buffer,
    pub index_type: vk::IndexType,
    pub draws: Vec<GpuDrawRecord>,
    /// occlusion cull 写入、forward 读取的 indirect draw 参数
    pub indirect_buffer: vk::Buffer,
    /// 材质与纹理的 bindless descriptor set
    pub material_set: vk::DescriptorSet,
    /// 每帧需要 refit 的 TLAS，`None` 时 AO 视为无遮挡
    pub tlas: Option<GfxTlasUpdate>,
}
impl Default for GpuSceneView {
    fn default() -> Self {
        Self {
            vertex_buffer: vk::Buffer::null(),
            index_buffer: vk::Buffer::null(),
            index_type: vk::IndexType::UINT32,
            draws: vec![],
            indirect_buffer: vk::Buffer::null(),
            material_set: vk::DescriptorSet::null(),
            tlas: None,
        }
    }
}
impl GpuSceneView {
    pub fn indexed_draws(&self) -> impl Iterator<Item = GfxDrawIndexed> + '_ {
        self.draws.iter().map(|draw| GfxDrawIndexed {
            index_count: draw.index_count,
            instance_count: 1,
            first_index: draw.first_index,
            vertex_offset: draw.vertex_offset,
            first_instance: draw.material_index,
        })
    }

    #[inline]
    pub fn has_geometry(&self) -> bool {
        !self.draws.is_empty() && self.vertex_buffer != vk::Buffer::null()
    }
}

/// 每帧向渲染器提供场景数据
pub trait SceneSource {
    fn camera(&self) -> CameraState;

    fn model_transform(&self) -> glam::Mat4 {
        glam::Mat4::IDENTITY
    }

    fn scene_view(&self) -> &GpuSceneView;
}
