use ash::vk;
use serde::{Deserialize, Serialize};

/// 渲染器默认配置
pub struct DefaultRendererSettings;
impl DefaultRendererSettings {
    pub const DEFAULT_SURFACE_FORMAT: vk::SurfaceFormatKHR = vk::SurfaceFormatKHR {
        // shader 输出会被自动改变： liner -> sRGB
        format: vk::Format::B8G8R8A8_SRGB,
        // 通知 OS，将数值按照 sRGB 空间进行处理和显示
        color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
    };
    pub const DEFAULT_PRESENT_MODE: vk::PresentModeKHR = vk::PresentModeKHR::FIFO;
    pub const HDR_COLOR_FORMAT: vk::Format = vk::Format::R16G16B16A16_SFLOAT;
    pub const DEPTH_FORMAT: vk::Format = vk::Format::D32_SFLOAT;
    pub const DEFAULT_FIF_COUNT: usize = 2;
}

/// 帧级渲染配置
#[derive(Copy, Clone, Debug)]
pub struct FrameSettings {
    pub color_format: vk::Format,
    pub depth_format: vk::Format,
    pub frame_extent: vk::Extent2D,
}
impl FrameSettings {
    pub fn new(frame_extent: vk::Extent2D) -> Self {
        Self {
            color_format: DefaultRendererSettings::HDR_COLOR_FORMAT,
            depth_format: DefaultRendererSettings::DEPTH_FORMAT,
            frame_extent,
        }
    }
}

/// 渲染器创建时的配置，运行期间不可变
#[derive(Copy, Clone, Debug)]
pub struct RendererConfig {
    pub fif_count: usize,
    pub present_mode: vk::PresentModeKHR,
    pub surface_format: vk::SurfaceFormatKHR,
}
impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            fif_count: DefaultRendererSettings::DEFAULT_FIF_COUNT,
            present_mode: DefaultRendererSettings::DEFAULT_PRESENT_MODE,
            surface_format: DefaultRendererSettings::DEFAULT_SURFACE_FORMAT,
        }
    }
}

/// 光追 AO 设置
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RtaoSettings {
    pub enabled: bool,
    /// 每个像素的半球采样射线数量
    pub ray_count: u32,
    /// 射线的最大长度（世界空间）
    pub radius: f32,
    /// 历史帧的混合权重
    pub history_weight: f32,
    /// 当前帧与历史帧的差异超过该阈值时丢弃历史
    pub disocclusion_threshold: f32,
    /// à-trous 滤波的迭代次数
    pub denoise_iterations: u32,
    /// 在半分辨率下追踪与降噪
    pub half_resolution: bool,
    /// 深度差异的权重参数
    pub phi_depth: f32,
    /// 法线差异的权重参数
    pub phi_normal: f32,
}
impl Default for RtaoSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            ray_count: 4,
            radius: 1.0,
            history_weight: 0.8,
            disocclusion_threshold: 0.25,
            denoise_iterations: 5,
            half_resolution: true,
            phi_depth: 1.0,
            phi_normal: 128.0,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BloomSettings {
    pub enabled: bool,
    /// 亮度高于该值的像素参与 bloom
    pub threshold: f32,
    pub intensity: f32,
}
impl Default for BloomSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: 1.0,
            intensity: 0.05,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TonemapSettings {
    pub exposure: f32,
    pub gamma: f32,
}
impl Default for TonemapSettings {
    fn default() -> Self {
        Self {
            exposure: 1.0,
            gamma: 2.2,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LightingSettings {
    pub sun_direction: glam::Vec3,
    pub sun_color: glam::Vec3,
    pub sun_intensity: f32,
    pub ambient: glam::Vec3,
}
impl Default for LightingSettings {
    fn default() -> Self {
        Self {
            sun_direction: glam::vec3(-0.3, -1.0, -0.2),
            sun_color: glam::Vec3::ONE,
            sun_intensity: 3.0,
            ambient: glam::Vec3::splat(0.03),
        }
    }
}

/// tonemap 最终输出的内容
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DebugView {
    #[default]
    Final,
    AmbientOcclusion,
    Depth,
    Bloom,
}
impl DebugView {
    #[inline]
    pub fn as_u32(self) -> u32 {
        self as u32
    }
}

/// 管线级配置，运行时可调
///
/// 由各个 pass 读取，不参与 render graph 的调度
#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineSettings {
    pub debug_view: DebugView,
    /// 记录每个 pass 的 CPU 耗时
    pub profiling_enabled: bool,
    pub rtao: RtaoSettings,
    pub bloom: BloomSettings,
    pub tonemap: TonemapSettings,
    pub lighting: LightingSettings,
}
impl PipelineSettings {
    /// 缺失的字段使用默认值，未知字段报错
    pub fn from_toml_str(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    /// AO 缓冲相对于帧分辨率的缩放因子，改变后需要重新编译 render graph
    #[inline]
    pub fn resolution_divisor(&self) -> u32 {
        if self.rtao.half_resolution { 2 } else { 1 }
    }
}
