use std::ffi::CString;

use ash::vk;
use itertools::Itertools;

use crate::{
    barrier::{GfxBarrierMask, GfxBufferBarrier, GfxImageBarrier},
    commands::{GfxDrawIndexed, GfxImageBinding, GfxPipeline, GfxRenderingInfo, GfxTlasUpdate},
    device::GfxCommandRecorder,
    vulkan::VulkanCore,
};

/// 录制到一个处于 recording 状态的 `vk::CommandBuffer`
pub struct VulkanCommandRecorder<'a> {
    core: &'a VulkanCore,
    command_buffer: vk::CommandBuffer,
}

impl<'a> VulkanCommandRecorder<'a> {
    pub fn new(core: &'a VulkanCore, command_buffer: vk::CommandBuffer) -> Self {
        Self { core, command_buffer }
    }
}

impl GfxCommandRecorder for VulkanCommandRecorder<'_> {
    fn begin_label(&mut self, label: &str, color: [f32; 4]) {
        let Some(debug_utils) = &self.core.debug_utils else {
            return;
        };
        let name = CString::new(label).unwrap_or_default();
        let label = vk::DebugUtilsLabelEXT::default().label_name(&name).color(color);
        unsafe { debug_utils.cmd_begin_debug_utils_label(self.command_buffer, &label) };
    }

    fn end_label(&mut self) {
        if let Some(debug_utils) = &self.core.debug_utils {
            unsafe { debug_utils.cmd_end_debug_utils_label(self.command_buffer) };
        }
    }

    fn image_barriers(&mut self, barriers: &[GfxImageBarrier]) {
        if barriers.is_empty() {
            return;
        }
        let barriers = barriers.iter().map(|b| *b.inner()).collect_vec();
        let dependency_info = vk::DependencyInfo::default().image_memory_barriers(&barriers);
        unsafe { self.core.device.cmd_pipeline_barrier2(self.command_buffer, &dependency_info) };
    }

    fn buffer_barriers(&mut self, barriers: &[GfxBufferBarrier]) {
        if barriers.is_empty() {
            return;
        }
        let barriers = barriers.iter().map(|b| *b.inner()).collect_vec();
        let dependency_info = vk::DependencyInfo::default().buffer_memory_barriers(&barriers);
        unsafe { self.core.device.cmd_pipeline_barrier2(self.command_buffer, &dependency_info) };
    }

    fn memory_barrier(&mut self, mask: GfxBarrierMask) {
        let barrier = mask.to_memory_barrier();
        let dependency_info = vk::DependencyInfo::default().memory_barriers(std::slice::from_ref(&barrier));
        unsafe { self.core.device.cmd_pipeline_barrier2(self.command_buffer, &dependency_info) };
    }

    fn begin_rendering(&mut self, info: &GfxRenderingInfo) {
        let render_area = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: info.extent,
        };
        let color_attachments = info.color_attachments.iter().map(|a| a.to_vk()).collect_vec();
        let depth_attachment = info.depth_attachment.map(|a| a.to_vk());

        let mut rendering_info = vk::RenderingInfo::default()
            .render_area(render_area)
            .layer_count(1)
            .color_attachments(&color_attachments);
        if let Some(depth) = depth_attachment.as_ref() {
            rendering_info = rendering_info.depth_attachment(depth);
        }

        // 翻转 y 轴，保持与 OpenGL 相同的 NDC 朝向
        let viewport = vk::Viewport {
            x: 0.0,
            y: info.extent.height as f32,
            width: info.extent.width as f32,
            height: -(info.extent.height as f32),
            min_depth: 0.0,
            max_depth: 1.0,
        };
        unsafe {
            self.core.device.cmd_begin_rendering(self.command_buffer, &rendering_info);
            self.core.device.cmd_set_viewport(self.command_buffer, 0, std::slice::from_ref(&viewport));
            self.core.device.cmd_set_scissor(self.command_buffer, 0, std::slice::from_ref(&render_area));
        }
    }

    fn end_rendering(&mut self) {
        unsafe { self.core.device.cmd_end_rendering(self.command_buffer) };
    }

    fn bind_pipeline(&mut self, pipeline: &GfxPipeline) {
        unsafe { self.core.device.cmd_bind_pipeline(self.command_buffer, pipeline.bind_point, pipeline.pipeline) };
    }

    fn push_images(&mut self, pipeline: &GfxPipeline, set: u32, bindings: &[GfxImageBinding]) {
        let image_infos = bindings
            .iter()
            .map(|b| vk::DescriptorImageInfo {
                sampler: b.sampler,
                image_view: b.view,
                image_layout: b.layout,
            })
            .collect_vec();
        let writes = bindings
            .iter()
            .zip(image_infos.iter())
            .map(|(b, info)| {
                vk::WriteDescriptorSet::default()
                    .dst_binding(b.binding)
                    .descriptor_type(b.descriptor_type)
                    .image_info(std::slice::from_ref(info))
            })
            .collect_vec();
        unsafe {
            self.core.push_descriptor.cmd_push_descriptor_set(
                self.command_buffer,
                pipeline.bind_point,
                pipeline.layout,
                set,
                &writes,
            );
        }
    }

    fn bind_descriptor_set(&mut self, pipeline: &GfxPipeline, set: u32, descriptor_set: vk::DescriptorSet) {
        unsafe {
            self.core.device.cmd_bind_descriptor_sets(
                self.command_buffer,
                pipeline.bind_point,
                pipeline.layout,
                set,
                std::slice::from_ref(&descriptor_set),
                &[],
            );
        }
    }

    fn push_constants(&mut self, pipeline: &GfxPipeline, offset: u32, data: &[u8]) {
        unsafe {
            self.core.device.cmd_push_constants(
                self.command_buffer,
                pipeline.layout,
                pipeline.push_constant_stages,
                offset,
                data,
            );
        }
    }

    fn bind_vertex_buffer(&mut self, buffer: vk::Buffer, offset: vk::DeviceSize) {
        unsafe {
            self.core.device.cmd_bind_vertex_buffers(
                self.command_buffer,
                0,
                std::slice::from_ref(&buffer),
                std::slice::from_ref(&offset),
            );
        }
    }

    fn bind_index_buffer(&mut self, buffer: vk::Buffer, offset: vk::DeviceSize, index_type: vk::IndexType) {
        unsafe { self.core.device.cmd_bind_index_buffer(self.command_buffer, buffer, offset, index_type) };
    }

    fn draw(&mut self, vertex_count: u32, instance_count: u32) {
        unsafe { self.core.device.cmd_draw(self.command_buffer, vertex_count, instance_count, 0, 0) };
    }

    fn draw_indexed(&mut self, draw: &GfxDrawIndexed) {
        unsafe {
            self.core.device.cmd_draw_indexed(
                self.command_buffer,
                draw.index_count,
                draw.instance_count,
                draw.first_index,
                draw.vertex_offset,
                draw.first_instance,
            );
        }
    }

    fn draw_indexed_indirect(&mut self, buffer: vk::Buffer, offset: vk::DeviceSize, draw_count: u32, stride: u32) {
        unsafe {
            self.core.device.cmd_draw_indexed_indirect(self.command_buffer, buffer, offset, draw_count, stride);
        }
    }

    fn dispatch(&mut self, group_count: [u32; 3]) {
        unsafe { self.core.device.cmd_dispatch(self.command_buffer, group_count[0], group_count[1], group_count[2]) };
    }

    fn build_tlas(&mut self, update: &GfxTlasUpdate) {
        let Some(acceleration_structure) = &self.core.acceleration_structure else {
            log::warn!("ray query is disabled, skip tlas update");
            return;
        };

        let instances = vk::AccelerationStructureGeometryInstancesDataKHR::default()
            .array_of_pointers(false)
            .data(vk::DeviceOrHostAddressConstKHR {
                device_address: update.instance_data,
            });
        let geometry = vk::AccelerationStructureGeometryKHR::default()
            .geometry_type(vk::GeometryTypeKHR::INSTANCES)
            .geometry(vk::AccelerationStructureGeometryDataKHR { instances });
        // refit：src 与 dst 是同一个 tlas
        let build_info = vk::AccelerationStructureBuildGeometryInfoKHR::default()
            .ty(vk::AccelerationStructureTypeKHR::TOP_LEVEL)
            .flags(
                vk::BuildAccelerationStructureFlagsKHR::PREFER_FAST_TRACE
                    | vk::BuildAccelerationStructureFlagsKHR::ALLOW_UPDATE,
            )
            .mode(vk::BuildAccelerationStructureModeKHR::UPDATE)
            .src_acceleration_structure(update.tlas)
            .dst_acceleration_structure(update.tlas)
            .geometries(std::slice::from_ref(&geometry))
            .scratch_data(vk::DeviceOrHostAddressKHR {
                device_address: update.scratch_data,
            });
        let range = vk::AccelerationStructureBuildRangeInfoKHR::default().primitive_count(update.instance_count);
        let ranges = [std::slice::from_ref(&range)];
        unsafe {
            acceleration_structure.cmd_build_acceleration_structures(
                self.command_buffer,
                std::slice::from_ref(&build_info),
                &ranges,
            );
        }
    }
}
