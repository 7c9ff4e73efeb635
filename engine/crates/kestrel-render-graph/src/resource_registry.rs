//! 资源注册表
//!
//! 按名字管理 graph 中的图像资源：名字唯一，句柄是 slotmap key，
//! 名字索引保持声明顺序。

use ash::vk;
use indexmap::IndexMap;
use itertools::Itertools;
use kestrel_gfx::{
    barrier::GfxImageBarrier,
    device::{GfxCommandRecorder, GfxDevice},
    handles::GfxImage,
};
use slotmap::SlotMap;

use crate::{
    barrier::{RgBarrierEngine, RgBarrierRecord},
    error::{RgError, RgResult},
    image_resource::{RgImageResource, RgImageSource},
    pass::RgFrameContext,
    state::RgImageState,
};

slotmap::new_key_type! {
    /// 图像资源句柄
    pub struct RgImageHandle;
}

#[derive(Default)]
pub struct RgResourceRegistry {
    images: SlotMap<RgImageHandle, RgImageResource>,
    names: IndexMap<String, RgImageHandle>,
    /// 每次有内部资源被（重新）创建时加一，之前的图像内容不再有效
    generation: u64,
}

// new & init
impl RgResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, resource: RgImageResource) -> RgResult<RgImageHandle> {
        if self.names.contains_key(&resource.name) {
            return Err(RgError::DuplicateResource(resource.name));
        }
        let name = resource.name.clone();
        let handle = self.images.insert(resource);
        self.names.insert(name, handle);
        Ok(handle)
    }
}

// getters
impl RgResourceRegistry {
    #[inline]
    pub fn handle(&self, name: &str) -> Option<RgImageHandle> {
        self.names.get(name).copied()
    }

    #[inline]
    pub fn get(&self, handle: RgImageHandle) -> Option<&RgImageResource> {
        self.images.get(handle)
    }

    #[inline]
    pub fn get_by_name(&self, name: &str) -> Option<&RgImageResource> {
        self.handle(name).and_then(|handle| self.images.get(handle))
    }

    /// 按声明顺序遍历
    pub fn iter(&self) -> impl Iterator<Item = (RgImageHandle, &RgImageResource)> {
        self.names.values().filter_map(|&handle| self.images.get(handle).map(|resource| (handle, resource)))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    #[inline]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// 内部资源的 view；外部资源或未注册的名字返回 null handle
    pub fn image_view(&self, name: &str) -> vk::ImageView {
        self.get_by_name(name).and_then(|resource| resource.image()).map(|image| image.view).unwrap_or_default()
    }

    /// 本帧 `name` 对应的具体 image
    pub fn resolve_image(&self, name: &str, frame: &RgFrameContext) -> Option<GfxImage> {
        let resource = self.get_by_name(name)?;
        match &resource.source {
            RgImageSource::Internal { image, .. } => *image,
            RgImageSource::External { .. } => frame.external_image(name).copied(),
        }
    }

    /// 本帧 `name` 的当前状态
    pub fn state(&self, name: &str, frame: &RgFrameContext) -> Option<RgImageState> {
        let resource = self.get_by_name(name)?;
        let image = self.resolve_image(name, frame)?;
        Some(resource.state_of(image.handle))
    }
}

// tools
impl RgResourceRegistry {
    /// 为所有尚未分配的内部资源创建 image，状态重置为 `Undefined`
    pub fn allocate(&mut self, device: &dyn GfxDevice) -> RgResult<()> {
        let mut allocated = false;
        for &handle in self.names.values() {
            let resource = &mut self.images[handle];
            let RgImageSource::Internal { image, current_state } = &mut resource.source else {
                continue;
            };
            if image.is_some() {
                continue;
            }

            let gfx_image = device.create_image(&resource.desc.to_gfx_desc(&resource.name))?;
            log::debug!(
                "allocate render graph image \"{}\": {}x{} {:?}",
                resource.name,
                gfx_image.width(),
                gfx_image.height(),
                resource.desc.format
            );
            *image = Some(gfx_image);
            *current_state = RgImageState::Undefined;
            allocated = true;
        }
        if allocated {
            self.generation += 1;
        }
        Ok(())
    }

    /// 释放所有内部资源的内存；名字与句柄保留
    pub fn release(&mut self, device: &dyn GfxDevice) {
        for resource in self.images.values_mut() {
            match &mut resource.source {
                RgImageSource::Internal { image, current_state } => {
                    if let Some(image) = image.take() {
                        device.destroy_image(image);
                    }
                    *current_state = RgImageState::Undefined;
                }
                RgImageSource::External { states } => states.clear(),
            }
        }
    }

    /// 以新的基准尺寸重新创建所有内部资源
    pub fn recompile(&mut self, device: &dyn GfxDevice, extent: vk::Extent2D) -> RgResult<()> {
        self.release(device);
        for resource in self.images.values_mut() {
            resource.desc.base_extent = extent;
        }
        self.allocate(device)?;
        log::info!(
            "render graph resources recreated at {}x{}: [{}]",
            extent.width,
            extent.height,
            self.names.keys().join(", ")
        );
        Ok(())
    }

    /// 把一组资源转换到目标状态，所有 barrier 合并为一次录制
    ///
    /// `requests` 中状态为 `None` 的资源使用其声明的 final state。
    /// 未注册或本帧没有 image 的资源直接跳过。返回录制的 barrier 数量。
    pub(crate) fn transition(
        &mut self,
        cmd: &mut dyn GfxCommandRecorder,
        engine: &mut RgBarrierEngine,
        frame: &RgFrameContext,
        requests: &[(&str, Option<RgImageState>)],
        records: &mut Vec<RgBarrierRecord>,
    ) -> RgResult<usize> {
        let mut barriers: Vec<GfxImageBarrier> = Vec::with_capacity(requests.len());
        let mut count = 0;

        for &(name, state) in requests {
            let Some(image) = self.resolve_image(name, frame) else {
                log::trace!("skip transition of \"{name}\": no image this frame");
                continue;
            };
            let Some(resource) = self.handle(name).and_then(|handle| self.images.get_mut(handle)) else {
                continue;
            };

            let target = state.unwrap_or(resource.final_state());
            let current = resource.state_of(image.handle);
            let Some((barrier, record)) = engine.image_barrier(name, &image, current, target)? else {
                continue;
            };

            // 同一 image 在一批里出现两次时，两次 layout 转换之间没有顺序保证
            if barriers.iter().any(|pending| pending.image_handle() == image.handle) {
                cmd.image_barriers(&barriers);
                barriers.clear();
            }

            log::trace!("barrier \"{name}\": {current} -> {target}");
            resource.set_state(image.handle, target);
            barriers.push(barrier);
            records.push(record);
            count += 1;
        }

        if !barriers.is_empty() {
            cmd.image_barriers(&barriers);
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image_resource::RgImageDesc;
    use kestrel_gfx::mock::{MockCommand, MockGfxDevice};

    const EXTENT: vk::Extent2D = vk::Extent2D { width: 64, height: 32 };

    fn color_desc() -> RgImageDesc {
        RgImageDesc::new_2d(
            vk::Format::R16G16B16A16_SFLOAT,
            vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::SAMPLED,
            EXTENT,
            RgImageState::ShaderRead,
        )
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut registry = RgResourceRegistry::new();
        registry.register(RgImageResource::internal("color", color_desc())).unwrap();
        let err = registry.register(RgImageResource::internal("color", color_desc())).unwrap_err();
        assert!(matches!(err, RgError::DuplicateResource(name) if name == "color"));
    }

    #[test]
    fn recompile_keeps_handles_and_resizes() {
        let device = MockGfxDevice::new();
        let mut registry = RgResourceRegistry::new();
        let half = registry.register(RgImageResource::internal("ao", color_desc().with_divisor(2))).unwrap();
        let full = registry.register(RgImageResource::internal("color", color_desc())).unwrap();
        registry.allocate(&device).unwrap();
        assert_eq!(device.live_image_count(), 2);
        assert_eq!(registry.get(half).unwrap().image().unwrap().extent, vk::Extent2D { width: 32, height: 16 });

        let old_view = registry.image_view("color");
        let generation = registry.generation();
        registry.recompile(&device, vk::Extent2D { width: 100, height: 3 }).unwrap();
        assert_eq!(registry.generation(), generation + 1);

        assert_eq!(device.live_image_count(), 2);
        assert_eq!(registry.handle("ao"), Some(half));
        assert_eq!(registry.handle("color"), Some(full));
        assert_eq!(registry.get(half).unwrap().image().unwrap().extent, vk::Extent2D { width: 50, height: 1 });
        assert_ne!(registry.image_view("color"), old_view);
        assert_eq!(registry.get(full).unwrap().current_state(), Some(RgImageState::Undefined));
    }

    #[test]
    fn generation_changes_only_when_images_are_created() {
        let device = MockGfxDevice::new();
        let mut registry = RgResourceRegistry::new();
        registry.register(RgImageResource::internal("color", color_desc())).unwrap();
        assert_eq!(registry.generation(), 0);

        registry.allocate(&device).unwrap();
        assert_eq!(registry.generation(), 1);
        // 已经分配过，不会重新创建
        registry.allocate(&device).unwrap();
        assert_eq!(registry.generation(), 1);

        // 尺寸不变的重建同样使旧内容失效
        registry.recompile(&device, EXTENT).unwrap();
        assert_eq!(registry.generation(), 2);
    }

    #[test]
    fn unknown_and_external_views_are_null() {
        let mut registry = RgResourceRegistry::new();
        registry
            .register(RgImageResource::external(
                "swapchain",
                RgImageDesc::new_2d(
                    vk::Format::B8G8R8A8_SRGB,
                    vk::ImageUsageFlags::COLOR_ATTACHMENT,
                    EXTENT,
                    RgImageState::Present,
                ),
            ))
            .unwrap();
        assert_eq!(registry.image_view("swapchain"), vk::ImageView::null());
        assert_eq!(registry.image_view("missing"), vk::ImageView::null());
    }

    #[test]
    fn transition_batches_and_skips_missing() {
        let device = MockGfxDevice::new();
        let mut registry = RgResourceRegistry::new();
        registry.register(RgImageResource::internal("a", color_desc())).unwrap();
        registry.register(RgImageResource::internal("b", color_desc())).unwrap();
        registry.allocate(&device).unwrap();

        let cmd_buffer = device.allocate_command_buffer("test").unwrap();
        let mut cmd = device.command_recorder(&cmd_buffer);
        let mut engine = RgBarrierEngine::default();
        let mut records = vec![];
        let frame = RgFrameContext::default();

        let count = registry
            .transition(
                &mut *cmd,
                &mut engine,
                &frame,
                &[("a", Some(RgImageState::ColorAttachment)), ("missing", None), ("b", None)],
                &mut records,
            )
            .unwrap();
        assert_eq!(count, 2);

        let commands = device.commands();
        assert_eq!(commands.len(), 1);
        let MockCommand::ImageBarriers(barriers) = &commands[0] else {
            panic!("expected one batched barrier call");
        };
        assert_eq!(barriers.len(), 2);
        assert_eq!(barriers[1].new_layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        assert_eq!(registry.state("a", &frame), Some(RgImageState::ColorAttachment));
        assert_eq!(registry.state("b", &frame), Some(RgImageState::ShaderRead));
    }
}
